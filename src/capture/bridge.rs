//! Network capture bridge.
//!
//! Writes issued by the page's own scripts are invisible to anything
//! watching the DOM, so capture runs in two halves across the
//! isolation boundary: the page-context half wraps the page's network
//! primitives and posts one tagged message per outgoing call; the
//! content-context half validates the tag, keeps a bounded ring of
//! recent requests for diagnostics, caches the authorization context
//! from recognized reads, and resolves at most one pending "capture the
//! next write" request.
//!
//! The page side of the boundary is untrusted: anything not carrying
//! the source tag is dropped on receipt, and raw messages are parsed,
//! never assumed well-formed.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{Error, Result};

/// Source tag every legitimate bridge message carries.
pub const BRIDGE_SOURCE: &str = "mimeo-bridge";

/// Current epoch milliseconds, the bridge's watermark clock.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One observed outgoing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
    pub ts: i64,
}

impl RequestRecord {
    /// Whether the method mutates server state.
    pub fn is_write(&self) -> bool {
        matches!(
            self.method.to_ascii_uppercase().as_str(),
            "POST" | "PUT" | "PATCH" | "DELETE"
        )
    }
}

/// Authorization context harvested from an observed read request,
/// reused to authorize a replayed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Ring buffer capacity for recent requests.
    pub capacity: usize,
    /// URL substrings identifying a "read" endpoint whose GETs refresh
    /// the cached authorization context.
    pub read_patterns: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            read_patterns: vec!["/api/".into()],
        }
    }
}

/// Page-context half: call [`observe`](Self::observe) from the code
/// wrapping the page's fetch/XHR primitives. Delivery is best-effort;
/// a torn-down listener is a soft failure.
#[derive(Debug, Clone)]
pub struct NetworkInterceptor {
    tx: mpsc::UnboundedSender<Value>,
}

impl NetworkInterceptor {
    pub fn observe(&self, method: &str, url: &str, headers: &BTreeMap<String, String>, body: &str) {
        self.observe_at(method, url, headers, body, now_ms());
    }

    /// Observe with an explicit timestamp.
    pub fn observe_at(
        &self,
        method: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &str,
        ts: i64,
    ) {
        let msg = serde_json::json!({
            "source": BRIDGE_SOURCE,
            "kind": "request",
            "url": url,
            "method": method,
            "headers": headers,
            "body": body,
            "ts": ts,
        });
        self.post(msg);
    }

    /// Post a raw message across the boundary. Tests use this to model
    /// a page forging bridge traffic.
    pub fn post(&self, msg: Value) {
        if self.tx.send(msg).is_err() {
            trace!("bridge listener gone; request not observed");
        }
    }
}

enum BridgeCmd {
    BeginCapture {
        since_ts: i64,
        reply: oneshot::Sender<Result<oneshot::Receiver<RequestRecord>>>,
    },
    CancelCapture,
    Recent {
        reply: oneshot::Sender<Vec<RequestRecord>>,
    },
}

struct PendingCapture {
    since_ts: i64,
    reply: oneshot::Sender<RequestRecord>,
}

/// Cloneable handle to a running [`BridgeListener`].
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    cmd_tx: mpsc::UnboundedSender<BridgeCmd>,
    auth_rx: watch::Receiver<Option<AuthContext>>,
}

impl BridgeHandle {
    /// Copy of the cached authorization context.
    pub fn auth_context(&self) -> Option<AuthContext> {
        self.auth_rx.borrow().clone()
    }

    /// Wait for the next write request with a timestamp at or past the
    /// watermark.
    ///
    /// Returns `Ok(None)` on timeout (a recording-time condition, not
    /// an error), and [`Error::CapturePending`] if another capture is
    /// already outstanding: a new request must fail fast rather than
    /// silently displace the first.
    pub async fn capture_next_write(
        &self,
        since_ts: i64,
        timeout_ms: u64,
    ) -> Result<Option<RequestRecord>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(BridgeCmd::BeginCapture {
                since_ts,
                reply: reply_tx,
            })
            .map_err(|_| Error::Execution("network bridge is gone".into()))?;
        let capture_rx = reply_rx
            .await
            .map_err(|_| Error::Execution("network bridge is gone".into()))??;

        match tokio::time::timeout(Duration::from_millis(timeout_ms), capture_rx).await {
            Ok(Ok(record)) => Ok(Some(record)),
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                let _ = self.cmd_tx.send(BridgeCmd::CancelCapture);
                debug!("network capture timed out; no command recorded");
                Ok(None)
            }
        }
    }

    /// Snapshot of the diagnostic ring buffer.
    pub async fn recent(&self) -> Vec<RequestRecord> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(BridgeCmd::Recent { reply: reply_tx })
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }
}

/// Content-context half. Owns all bridge state; everyone else talks to
/// it through messages and receives copies.
pub struct BridgeListener {
    rx: mpsc::UnboundedReceiver<Value>,
    cmd_tx: mpsc::UnboundedSender<BridgeCmd>,
    cmd_rx: mpsc::UnboundedReceiver<BridgeCmd>,
    auth_tx: watch::Sender<Option<AuthContext>>,
    recent: VecDeque<RequestRecord>,
    pending: Option<PendingCapture>,
    config: BridgeConfig,
}

/// Wire up the two halves of the bridge.
pub fn bridge(config: BridgeConfig) -> (NetworkInterceptor, BridgeListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (auth_tx, _) = watch::channel(None);
    (
        NetworkInterceptor { tx },
        BridgeListener {
            rx,
            cmd_tx,
            cmd_rx,
            auth_tx,
            recent: VecDeque::new(),
            pending: None,
            config,
        },
    )
}

impl BridgeListener {
    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle {
            cmd_tx: self.cmd_tx.clone(),
            auth_rx: self.auth_tx.subscribe(),
        }
    }

    /// Drain both channels until cancelled or both sides hang up.
    /// Page traffic is drained before control commands so the ring and
    /// caches reflect everything already posted.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.process(msg),
                    None => break,
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_cmd(cmd),
                    None => break,
                },
            }
        }
    }

    fn handle_cmd(&mut self, cmd: BridgeCmd) {
        match cmd {
            BridgeCmd::BeginCapture { since_ts, reply } => {
                if self.pending.is_some() {
                    let _ = reply.send(Err(Error::CapturePending));
                    return;
                }
                let (tx, rx) = oneshot::channel();
                self.pending = Some(PendingCapture {
                    since_ts,
                    reply: tx,
                });
                let _ = reply.send(Ok(rx));
            }
            BridgeCmd::CancelCapture => {
                self.pending = None;
            }
            BridgeCmd::Recent { reply } => {
                let _ = reply.send(self.recent.iter().cloned().collect());
            }
        }
    }

    /// Handle one raw message from the page world.
    fn process(&mut self, msg: Value) {
        let source = msg.get("source").and_then(Value::as_str);
        if source != Some(BRIDGE_SOURCE) {
            trace!("ignoring message without bridge source tag");
            return;
        }
        if msg.get("kind").and_then(Value::as_str) != Some("request") {
            return;
        }
        let record: RequestRecord = match serde_json::from_value(msg) {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "malformed bridge message dropped");
                return;
            }
        };

        if self.recent.len() == self.config.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(record.clone());

        if record.method.eq_ignore_ascii_case("GET")
            && self
                .config
                .read_patterns
                .iter()
                .any(|p| record.url.contains(p.as_str()))
        {
            debug!(url = record.url.as_str(), "authorization context refreshed");
            self.auth_tx.send_replace(Some(AuthContext {
                url: record.url.clone(),
                headers: record.headers.clone(),
            }));
        }

        let matches_pending = self
            .pending
            .as_ref()
            .is_some_and(|p| record.is_write() && record.ts >= p.since_ts);
        if matches_pending {
            if let Some(pending) = self.pending.take() {
                debug!(url = record.url.as_str(), "pending capture resolved");
                let _ = pending.reply.send(record);
            }
        }
    }
}
