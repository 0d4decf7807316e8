use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use mimeo::{
    ControllerConfig, Engine, ErrorDecision, Page, PlaybackController, PlaybackStatus,
    PolicyOverlay, Scenario,
};

#[derive(Parser)]
#[command(name = "mimeo")]
#[command(about = "Replay recorded web sessions against page snapshots")]
#[command(version)]
struct Cli {
    /// Scenario file (YAML, or JSON for exported recordings)
    scenario: PathBuf,

    /// HTML snapshot of the page to replay against
    #[arg(long, value_name = "FILE")]
    page: Option<PathBuf>,

    /// URL reported for the snapshot page
    #[arg(long, default_value = "about:snapshot")]
    url: String,

    /// Start at this command index (0-based)
    #[arg(long, default_value_t = 0)]
    start: usize,

    /// What to do when a step fails
    #[arg(long, value_enum, default_value = "skip")]
    on_error: OnError,

    /// Delay between steps in milliseconds
    #[arg(long, default_value_t = 300)]
    delay_ms: u64,

    /// Validate the scenario without replaying
    #[arg(long)]
    check: bool,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum OnError {
    Skip,
    Stop,
}

#[tokio::main]
async fn main() -> mimeo::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let scenario = Scenario::load(&cli.scenario)?;

    if cli.check {
        println!("Scenario valid: {}", scenario.name);
        println!("  Commands: {}", scenario.len());
        if let Some(ref created) = scenario.created {
            println!("  Created: {created}");
        }
        let disabled = scenario.commands.iter().filter(|c| c.disabled).count();
        if disabled > 0 {
            println!("  Disabled: {disabled}");
        }
        for (i, cmd) in scenario.commands.iter().enumerate() {
            println!("    {:>3}. {}", i, cmd.summary());
        }
        return Ok(());
    }

    let page = match cli.page {
        Some(ref path) => {
            let html = std::fs::read_to_string(path)?;
            Page::from_html(&html, &cli.url)
        }
        None => Page::from_html("<html><body></body></html>", &cli.url),
    };

    let decision = match cli.on_error {
        OnError::Skip => ErrorDecision::Skip,
        OnError::Stop => ErrorDecision::Stop,
    };
    let controller = PlaybackController::with_config(
        Engine::new(),
        Arc::new(PolicyOverlay::new(decision)),
        ControllerConfig {
            inter_step_delay_ms: cli.delay_ms,
            ..ControllerConfig::default()
        },
    );

    println!("Replaying: {}", scenario.name);
    controller.start(page, scenario, cli.start).await?;
    let result = controller.wait().await;

    println!();
    let clean = result.status == PlaybackStatus::Completed && result.skipped.is_empty();
    if clean {
        println!("✓ Completed");
    } else {
        println!("✗ {}", result.status.name());
        if let Some(ref error) = result.last_error {
            println!("  Last error: {error}");
        }
    }
    println!("  Commands: {}", result.total);
    if !result.skipped.is_empty() {
        let skipped: Vec<String> = result.skipped.iter().map(usize::to_string).collect();
        println!("  Skipped: {}", skipped.join(", "));
    }

    if !clean {
        std::process::exit(1);
    }

    Ok(())
}
