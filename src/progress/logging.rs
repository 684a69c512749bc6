//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::SessionStarted {
                session_id,
                project,
            } => {
                info!(session = %session_id, project = %project, "Starting analysis session");
            }
            ProgressEvent::PhaseStarted { phase, attempt } => {
                if *attempt > 1 {
                    info!(phase = %phase, number = phase.number(), attempt, "Retrying phase");
                } else {
                    info!(phase = %phase, number = phase.number(), "Starting phase");
                }
            }
            ProgressEvent::PhaseSkipped { phase, reason } => {
                warn!(phase = %phase, reason = %reason, "Phase skipped");
            }
            ProgressEvent::PhaseCompleted {
                phase,
                findings,
                duration,
            } => {
                info!(
                    phase = %phase,
                    findings,
                    duration_ms = duration.as_millis(),
                    "Phase complete"
                );
            }
            ProgressEvent::PhaseFailed { phase, error } => {
                warn!(phase = %phase, error = %error, "Phase failed");
            }
            ProgressEvent::UnitCompleted {
                phase,
                unit,
                success,
            } => {
                debug!(phase = %phase, unit = %unit, success, "Unit finished");
            }
            ProgressEvent::SessionCompleted {
                duration,
                cancelled,
                statuses,
            } => {
                let summary: Vec<String> = statuses
                    .iter()
                    .map(|(phase, status)| format!("{}={}", phase, status))
                    .collect();
                if *cancelled {
                    warn!(
                        total_time_ms = duration.as_millis(),
                        phases = %summary.join(" "),
                        "Analysis cancelled"
                    );
                } else {
                    info!(
                        total_time_ms = duration.as_millis(),
                        phases = %summary.join(" "),
                        "Analysis complete"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PhaseId, PhaseStatus};
    use std::time::Duration;

    #[test]
    fn test_logging_all_events() {
        let handler = LoggingHandler;

        let events = vec![
            ProgressEvent::SessionStarted {
                session_id: "s".to_string(),
                project: "/test".to_string(),
            },
            ProgressEvent::PhaseStarted {
                phase: PhaseId::Discovery,
                attempt: 1,
            },
            ProgressEvent::PhaseStarted {
                phase: PhaseId::FileSemantic,
                attempt: 2,
            },
            ProgressEvent::PhaseSkipped {
                phase: PhaseId::StaticAnalysis,
                reason: "discovery failed".to_string(),
            },
            ProgressEvent::PhaseCompleted {
                phase: PhaseId::Discovery,
                findings: 0,
                duration: Duration::from_millis(10),
            },
            ProgressEvent::PhaseFailed {
                phase: PhaseId::Report,
                error: "disk full".to_string(),
            },
            ProgressEvent::UnitCompleted {
                phase: PhaseId::FileSemantic,
                unit: "Vault.sol".to_string(),
                success: false,
            },
            ProgressEvent::SessionCompleted {
                duration: Duration::from_secs(5),
                cancelled: true,
                statuses: vec![(PhaseId::Discovery, PhaseStatus::Succeeded)],
            },
        ];

        for event in events {
            handler.on_progress(&event);
        }
    }
}
