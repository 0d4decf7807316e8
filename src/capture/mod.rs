//! Recording: page interaction events become commands.
//!
//! The recorder listens to interaction notifications, debounces and
//! dedupes them, synthesizes locator candidates for the target, and
//! emits abstract commands to the orchestrator over a fire-and-forget
//! channel. The network bridge feeds it captured write requests, which
//! it turns into `api-request` commands (plus a trailing `refresh`,
//! since a successful write typically invalidates the page state the
//! recording continues from).

pub mod bridge;

pub use bridge::{
    bridge as network_bridge, now_ms, AuthContext, BridgeConfig, BridgeHandle, BridgeListener,
    NetworkInterceptor, RequestRecord, BRIDGE_SOURCE,
};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::command::{Command, CommandKind};
use crate::dom::{Document, NodeId};
use crate::locator::synthesize::synthesize;

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Window inside which a repeated click on the same primary
    /// locator is treated as a duplicate.
    pub click_debounce_ms: u64,
    /// How long an armed network capture waits for a matching write.
    pub capture_timeout_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            click_debounce_ms: 150,
            capture_timeout_ms: 10_000,
        }
    }
}

/// Event capture. One per recording session.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Command>,
    config: RecorderConfig,
    bridge: Option<BridgeHandle>,
    last_click: Option<(String, tokio::time::Instant)>,
}

impl Recorder {
    /// Create a recorder and the command stream the orchestrator
    /// appends from.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Command>) {
        Self::with_config(RecorderConfig::default())
    }

    pub fn with_config(config: RecorderConfig) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                config,
                bridge: None,
                last_click: None,
            },
            rx,
        )
    }

    /// Attach the network bridge so submit-style clicks arm a capture.
    pub fn attach_bridge(&mut self, handle: BridgeHandle) {
        self.bridge = Some(handle);
    }

    /// Record the starting navigation so replay opens the same page.
    pub fn record_open(&mut self, url: &str) {
        self.emit(Command::new(CommandKind::Open).with_target(url));
    }

    /// A click was observed on `node`.
    pub fn on_click(&mut self, doc: &Document, node: NodeId) {
        // Checkbox and radio clicks surface as change events and are
        // recorded there as check/uncheck; a click command would
        // double-fire the toggle at replay.
        if doc.tag(node) == Some("input")
            && matches!(doc.attr(node, "type"), Some("checkbox") | Some("radio"))
        {
            return;
        }

        let candidates = synthesize(doc, node);
        let Some(primary) = candidates.first().cloned() else {
            debug!("click target produced no locator candidates; not recorded");
            return;
        };

        let now = tokio::time::Instant::now();
        if let Some((last, at)) = &self.last_click {
            if *last == primary
                && now.duration_since(*at).as_millis() < u128::from(self.config.click_debounce_ms)
            {
                debug!(locator = primary.as_str(), "duplicate click debounced");
                return;
            }
        }
        self.last_click = Some((primary, now));

        if self.is_submit_control(doc, node) {
            self.arm_capture(now_ms());
        }
        self.emit(Command::from_candidates(CommandKind::Click, candidates, ""));
    }

    /// A change event was observed on `node`.
    pub fn on_change(&mut self, doc: &Document, node: NodeId) {
        match doc.tag(node) {
            Some("select") => {
                let value = doc.value(node);
                let label = doc
                    .descendants(node)
                    .into_iter()
                    .filter(|&n| doc.tag(n) == Some("option"))
                    .find(|&o| option_value(doc, o) == value)
                    .map(|o| doc.computed_text(o).trim().to_string())
                    .unwrap_or(value);
                let candidates = synthesize(doc, node);
                self.emit(Command::from_candidates(
                    CommandKind::Select,
                    candidates,
                    &label,
                ));
            }
            Some("input")
                if matches!(doc.attr(node, "type"), Some("checkbox") | Some("radio")) =>
            {
                let kind = if doc.checked(node) {
                    CommandKind::Check
                } else {
                    CommandKind::Uncheck
                };
                let candidates = synthesize(doc, node);
                self.emit(Command::from_candidates(kind, candidates, ""));
            }
            Some("input") | Some("textarea") => {
                // Recording on change rather than per keystroke is the
                // typing debounce: one command with the final value.
                let value = doc.value(node);
                let candidates = synthesize(doc, node);
                self.emit(Command::from_candidates(
                    CommandKind::Type,
                    candidates,
                    &value,
                ));
            }
            _ => {}
        }
    }

    /// Arm the bridge: the next write at or past the watermark becomes
    /// an `api-request` command followed by a `refresh`.
    pub fn arm_capture(&self, since_ts: i64) {
        let Some(handle) = self.bridge.clone() else {
            return;
        };
        let tx = self.tx.clone();
        let timeout_ms = self.config.capture_timeout_ms;
        tokio::spawn(async move {
            match handle.capture_next_write(since_ts, timeout_ms).await {
                Ok(Some(record)) => {
                    info!(url = record.url.as_str(), "captured api write");
                    let mut cmd = Command::new(CommandKind::ApiRequest)
                        .with_target(&record.url)
                        .with_value(&record.body);
                    cmd.method = Some(record.method.clone());
                    cmd.headers = record.headers.clone();
                    let _ = tx.send(cmd);
                    let _ = tx.send(Command::new(CommandKind::Refresh));
                }
                Ok(None) => debug!("network capture expired; no command recorded"),
                Err(e) => warn!(error = %e, "network capture not armed"),
            }
        });
    }

    fn is_submit_control(&self, doc: &Document, node: NodeId) -> bool {
        if doc.attr(node, "type") == Some("submit") {
            return true;
        }
        if doc.tag(node) != Some("button") {
            return false;
        }
        let mut cur = doc.parent(node);
        while let Some(n) = cur {
            if doc.tag(n) == Some("form") {
                return true;
            }
            cur = doc.parent(n);
        }
        false
    }

    fn emit(&self, cmd: Command) {
        debug!(command = cmd.summary().as_str(), "command recorded");
        if self.tx.send(cmd).is_err() {
            // Fire-and-forget contract: an unreachable orchestrator is
            // a soft failure.
            debug!("orchestrator gone; recorded command dropped");
        }
    }
}

fn option_value(doc: &Document, option: NodeId) -> String {
    match doc.attr(option, "value") {
        Some(v) => v.to_string(),
        None => doc.computed_text(option).trim().to_string(),
    }
}
