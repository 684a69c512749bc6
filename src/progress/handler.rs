//! Progress handler trait and events

use crate::pipeline::{PhaseId, PhaseStatus};
use std::time::Duration;

/// Events emitted while a session runs
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Session started
    SessionStarted { session_id: String, project: String },

    /// Phase entered running
    PhaseStarted { phase: PhaseId, attempt: u32 },

    /// Phase went straight from pending to skipped
    PhaseSkipped { phase: PhaseId, reason: String },

    /// Phase succeeded
    PhaseCompleted {
        phase: PhaseId,
        findings: usize,
        duration: Duration,
    },

    /// Phase failed
    PhaseFailed { phase: PhaseId, error: String },

    /// One fan-out unit finished
    UnitCompleted {
        phase: PhaseId,
        unit: String,
        success: bool,
    },

    /// All phases reached a terminal state, or the session was cancelled
    SessionCompleted {
        duration: Duration,
        cancelled: bool,
        statuses: Vec<(PhaseId, PhaseStatus)>,
    },
}

/// Trait for handling progress events during a session
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
