//! On-page overlay interface.
//!
//! The overlay is a passive renderer: the controller is the sole owner
//! of session state and drives the overlay with explicit updates. The
//! one message flowing back is the operator's decision on a failed
//! step.

use async_trait::async_trait;

use crate::playback::PlaybackStatus;

/// Operator decision for a step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDecision {
    /// Re-execute the same step.
    Retry,
    /// Advance past the step, recording its index as skipped.
    Skip,
    /// End the session.
    Stop,
}

#[async_trait]
pub trait Overlay: Send + Sync {
    async fn show(&self) {}

    async fn hide(&self) {}

    /// Progress update: current step, total, a one-line command
    /// summary, and the remaining inter-step delay when counting down
    /// between steps.
    async fn update_progress(
        &self,
        _current: usize,
        _total: usize,
        _summary: &str,
        _inter_step_delay_ms: u64,
    ) {
    }

    async fn set_status(&self, _status: PlaybackStatus) {}

    /// Present an error and wait for the operator. Implementations
    /// with no operator should pend; the controller applies the
    /// default outcome when its decision timeout expires.
    async fn show_error(&self, message: &str) -> ErrorDecision;

    async fn hide_error(&self) {}
}

/// Overlay with nobody behind it; error prompts pend until the
/// controller's timeout kicks in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOverlay;

#[async_trait]
impl Overlay for NullOverlay {
    async fn show_error(&self, _message: &str) -> ErrorDecision {
        std::future::pending().await
    }
}

/// Overlay that answers every error prompt with a fixed decision,
/// for unattended runs.
#[derive(Debug, Clone, Copy)]
pub struct PolicyOverlay {
    pub decision: ErrorDecision,
}

impl PolicyOverlay {
    pub fn new(decision: ErrorDecision) -> Self {
        Self { decision }
    }
}

#[async_trait]
impl Overlay for PolicyOverlay {
    async fn show_error(&self, _message: &str) -> ErrorDecision {
        self.decision
    }
}
