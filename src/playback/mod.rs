//! Playback controller.
//!
//! Owns the session state machine and walks a scenario sequentially:
//! one command in flight at a time, each awaited to completion before
//! the index advances. Failures park the session in `error` until the
//! operator decides (or the decision times out and defaults to skip);
//! an explicit stop aborts outstanding waits instead of letting them
//! fire into a torn-down session.

pub mod overlay;

pub use overlay::{ErrorDecision, NullOverlay, Overlay, PolicyOverlay};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::BridgeHandle;
use crate::command::Scenario;
use crate::engine::Engine;
use crate::page::Page;
use crate::Result;

/// Session states. `stopped` and `completed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Paused,
    Error,
    Stopped,
    Completed,
}

impl PlaybackStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Completed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        }
    }
}

/// Read-only copy of the session, safe to hand across contexts.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Current command index, 0-based.
    pub index: usize,
    pub total: usize,
    pub status: PlaybackStatus,
    pub last_error: Option<String>,
    /// Indexes skipped on operator decision after a failure.
    pub skipped: Vec<usize>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            index: 0,
            total: 0,
            status: PlaybackStatus::Idle,
            last_error: None,
            skipped: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Delay between steps, counted down on the overlay when long.
    pub inter_step_delay_ms: u64,
    /// How long an error waits for an operator decision before the
    /// default outcome (skip) applies.
    pub decision_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            inter_step_delay_ms: 300,
            decision_timeout_ms: 30_000,
        }
    }
}

struct ActiveRun {
    cancel: CancellationToken,
    pause_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Coordinates one playback session at a time.
pub struct PlaybackController {
    engine: Arc<Engine>,
    overlay: Arc<dyn Overlay>,
    bridge: Option<BridgeHandle>,
    config: ControllerConfig,
    state: Arc<Mutex<SessionSnapshot>>,
    active: tokio::sync::Mutex<Option<ActiveRun>>,
}

impl PlaybackController {
    pub fn new(engine: Engine, overlay: Arc<dyn Overlay>) -> Self {
        Self::with_config(engine, overlay, ControllerConfig::default())
    }

    pub fn with_config(engine: Engine, overlay: Arc<dyn Overlay>, config: ControllerConfig) -> Self {
        Self {
            engine: Arc::new(engine),
            overlay,
            bridge: None,
            config,
            state: Arc::new(Mutex::new(SessionSnapshot::default())),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Attach the network bridge so `api-request` steps see the cached
    /// authorization context.
    pub fn with_bridge(mut self, bridge: BridgeHandle) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Start replaying `scenario` from `start_index`. A session already
    /// live is stopped first.
    pub async fn start(&self, page: Page, scenario: Scenario, start_index: usize) -> Result<()> {
        scenario.validate()?;
        self.stop().await;

        info!(
            scenario = scenario.name.as_str(),
            commands = scenario.len(),
            start_index,
            "playback starting"
        );
        {
            let mut state = self.lock_state();
            *state = SessionSnapshot {
                index: start_index.min(scenario.len().saturating_sub(1)),
                total: scenario.len(),
                status: PlaybackStatus::Playing,
                last_error: None,
                skipped: Vec::new(),
            };
        }

        let cancel = CancellationToken::new();
        let (pause_tx, pause_rx) = watch::channel(false);
        let run = RunContext {
            engine: Arc::clone(&self.engine),
            overlay: Arc::clone(&self.overlay),
            bridge: self.bridge.clone(),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            cancel: cancel.clone(),
            pause_rx,
        };
        let handle = tokio::spawn(run.run(page, scenario, start_index));

        *self.active.lock().await = Some(ActiveRun {
            cancel,
            pause_tx,
            handle,
        });
        Ok(())
    }

    /// Pause after the in-flight step; no mid-step preemption.
    pub async fn pause(&self) {
        let active = self.active.lock().await;
        if let Some(run) = active.as_ref() {
            let mut state = self.lock_state();
            if state.status == PlaybackStatus::Playing {
                state.status = PlaybackStatus::Paused;
                let _ = run.pause_tx.send(true);
            }
        }
    }

    pub async fn resume(&self) {
        let active = self.active.lock().await;
        if let Some(run) = active.as_ref() {
            let mut state = self.lock_state();
            if state.status == PlaybackStatus::Paused {
                state.status = PlaybackStatus::Playing;
                let _ = run.pause_tx.send(false);
            }
        }
    }

    /// Stop the live session, aborting outstanding waits, and wait for
    /// the run task to wind down.
    pub async fn stop(&self) {
        let run = self.active.lock().await.take();
        if let Some(run) = run {
            run.cancel.cancel();
            let _ = run.pause_tx.send(false);
            let _ = run.handle.await;
            let mut state = self.lock_state();
            if !state.status.is_terminal() {
                state.status = PlaybackStatus::Stopped;
            }
        }
    }

    /// Snapshot of the session.
    pub fn state(&self) -> SessionSnapshot {
        self.lock_state().clone()
    }

    /// Wait for the live session to reach a terminal state.
    pub async fn wait(&self) -> SessionSnapshot {
        let handle = {
            let mut active = self.active.lock().await;
            active.take().map(|run| run.handle)
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.state()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionSnapshot> {
        self.state.lock().expect("session state lock poisoned")
    }
}

/// Everything the spawned run loop owns.
struct RunContext {
    engine: Arc<Engine>,
    overlay: Arc<dyn Overlay>,
    bridge: Option<BridgeHandle>,
    config: ControllerConfig,
    state: Arc<Mutex<SessionSnapshot>>,
    cancel: CancellationToken,
    pause_rx: watch::Receiver<bool>,
}

impl RunContext {
    fn set_state(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        let mut state = self.state.lock().expect("session state lock poisoned");
        f(&mut state);
    }

    fn status(&self) -> PlaybackStatus {
        self.state
            .lock()
            .expect("session state lock poisoned")
            .status
    }

    async fn run(mut self, mut page: Page, scenario: Scenario, start_index: usize) {
        self.overlay.show().await;
        self.overlay.set_status(PlaybackStatus::Playing).await;

        let total = scenario.len();
        let mut index = start_index;
        let mut stopped = false;

        'steps: while index < total {
            if self.cancel.is_cancelled() {
                stopped = true;
                break;
            }
            if !self.pause_gate().await {
                stopped = true;
                break;
            }

            let cmd = &scenario.commands[index];
            self.set_state(|s| s.index = index);
            self.overlay
                .update_progress(index, total, &cmd.summary(), 0)
                .await;

            if cmd.disabled {
                info!(index, command = cmd.name(), "disabled command skipped");
                index += 1;
                continue;
            }

            loop {
                let auth = self.bridge.as_ref().and_then(|b| b.auth_context());
                let result = self
                    .engine
                    .execute(&mut page, cmd, auth.as_ref(), &self.cancel)
                    .await;
                match result {
                    Ok(outcome) => {
                        debug!(
                            index,
                            command = cmd.name(),
                            locator = outcome.locator.as_deref().unwrap_or(""),
                            "step completed"
                        );
                        break;
                    }
                    Err(_) if self.cancel.is_cancelled() => {
                        stopped = true;
                        break 'steps;
                    }
                    Err(e) => {
                        warn!(index, command = cmd.name(), error = %e, "step failed");
                        let message = e.to_string();
                        self.set_state(|s| {
                            s.status = PlaybackStatus::Error;
                            s.last_error = Some(message.clone());
                        });
                        self.overlay.set_status(PlaybackStatus::Error).await;

                        let decision = tokio::select! {
                            _ = self.cancel.cancelled() => ErrorDecision::Stop,
                            decision = tokio::time::timeout(
                                Duration::from_millis(self.config.decision_timeout_ms),
                                self.overlay.show_error(&message),
                            ) => decision.unwrap_or(ErrorDecision::Skip),
                        };
                        self.overlay.hide_error().await;

                        match decision {
                            ErrorDecision::Retry => {
                                info!(index, "retrying step");
                                self.set_state(|s| s.status = PlaybackStatus::Playing);
                                self.overlay.set_status(PlaybackStatus::Playing).await;
                            }
                            ErrorDecision::Skip => {
                                info!(index, "skipping step");
                                self.set_state(|s| {
                                    s.skipped.push(index);
                                    s.status = PlaybackStatus::Playing;
                                });
                                self.overlay.set_status(PlaybackStatus::Playing).await;
                                break;
                            }
                            ErrorDecision::Stop => {
                                stopped = true;
                                break 'steps;
                            }
                        }
                    }
                }
            }

            index += 1;
            if index < total && !self.inter_step_delay(index, total, &scenario).await {
                stopped = true;
                break;
            }
        }

        let final_status = if stopped {
            PlaybackStatus::Stopped
        } else {
            PlaybackStatus::Completed
        };
        self.set_state(|s| {
            if !s.status.is_terminal() {
                s.status = final_status;
            }
        });
        info!(status = self.status().name(), "playback finished");
        self.overlay.set_status(self.status()).await;
        self.overlay.hide().await;
    }

    /// Block while paused. Returns false when stopped instead.
    async fn pause_gate(&mut self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if !*self.pause_rx.borrow() {
                return true;
            }
            self.overlay.set_status(PlaybackStatus::Paused).await;
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = self.pause_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
            if !*self.pause_rx.borrow() {
                self.overlay.set_status(PlaybackStatus::Playing).await;
            }
        }
    }

    /// Inter-step delay, counted down on the overlay in one-second
    /// notches when long enough to matter. Returns false when stopped.
    async fn inter_step_delay(&self, next: usize, total: usize, scenario: &Scenario) -> bool {
        let mut remaining = self.config.inter_step_delay_ms;
        let summary = scenario.commands[next].summary();
        while remaining > 0 {
            if remaining >= 1_000 {
                self.overlay
                    .update_progress(next, total, &summary, remaining)
                    .await;
            }
            let chunk = remaining.min(1_000);
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(Duration::from_millis(chunk)) => {}
            }
            remaining -= chunk;
        }
        true
    }
}
