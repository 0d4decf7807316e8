//! # mimeo
//!
//! Record and replay web sessions: durable locators, realistic
//! synthetic input, deterministic playback.
//!
//! The engine records interactions as abstract commands with ranked
//! fallback locators, then replays them tolerating reloads, timing
//! variance and minor DOM drift. Pages are represented by an in-memory
//! document (parsed from real HTML) so replays run anywhere; the
//! embedding shell provides navigation and an operator overlay through
//! narrow traits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mimeo::{Engine, NullOverlay, Page, PlaybackController, Scenario};
//!
//! # #[tokio::main]
//! # async fn main() -> mimeo::Result<()> {
//! let scenario = Scenario::load("checkout.yaml")?;
//! let page = Page::from_html("<button id='go'>Go</button>", "https://shop.example/");
//!
//! let controller = PlaybackController::new(Engine::new(), Arc::new(NullOverlay));
//! controller.start(page, scenario, 0).await?;
//!
//! let result = controller.wait().await;
//! println!("{} ({} skipped)", result.status.name(), result.skipped.len());
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod command;
pub mod dom;
pub mod engine;
pub mod locator;
pub mod page;
pub mod playback;

pub use capture::{
    AuthContext, BridgeConfig, BridgeHandle, BridgeListener, NetworkInterceptor, Recorder,
    RecorderConfig, RequestRecord,
};
pub use command::{Command, CommandKind, Scenario};
pub use engine::{Engine, EngineConfig, StepOutcome};
pub use locator::Locator;
pub use page::{Page, PageHost, SnapshotHost};
pub use playback::{
    ControllerConfig, ErrorDecision, NullOverlay, Overlay, PlaybackController, PlaybackStatus,
    PolicyOverlay, SessionSnapshot,
};

/// Result type for mimeo operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while recording or replaying.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid locator: {0}")]
    LocatorParse(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("element found but not visible: {0}")]
    ElementNotVisible(String),

    #[error("option not found: {0}")]
    OptionNotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("a network capture is already pending")]
    CapturePending,

    #[error("scenario error: {0}")]
    Scenario(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
