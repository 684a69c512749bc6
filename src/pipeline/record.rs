//! Phase records: the audit trail of a session

use super::phase::PhaseId;
use crate::error::ErrorInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    #[serde(alias = "info")]
    Informational,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Informational,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Informational => "informational",
        }
    }

    /// Lenient parse for model output ("HIGH", "Info", "warning")
    pub fn parse_lenient(value: &str) -> Severity {
        match value.trim().to_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" | "moderate" | "warning" => Severity::Medium,
            "low" => Severity::Low,
            _ => Severity::Informational,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reported issue with its provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub title: String,
    pub severity: Severity,
    pub description: String,
    pub source: PhaseId,
    /// Fan-out unit that produced it, usually a contract file name
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl Finding {
    pub fn new(
        source: PhaseId,
        unit: impl Into<String>,
        title: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            severity,
            description: description.into(),
            source,
            unit: unit.into(),
            location: None,
            tool: None,
            recommendation: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Succeeded => "succeeded",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PhaseStatus::Succeeded | PhaseStatus::Failed | PhaseStatus::Skipped
        )
    }

    pub fn can_transition_to(&self, next: PhaseStatus) -> bool {
        matches!(
            (self, next),
            (PhaseStatus::Pending, PhaseStatus::Running)
                | (PhaseStatus::Pending, PhaseStatus::Skipped)
                | (PhaseStatus::Running, PhaseStatus::Succeeded)
                | (PhaseStatus::Running, PhaseStatus::Failed)
                | (PhaseStatus::Running, PhaseStatus::Skipped)
        )
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid transition for phase {phase}: {from} -> {to}")]
pub struct InvalidTransition {
    pub phase: PhaseId,
    pub from: PhaseStatus,
    pub to: PhaseStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Succeeded,
    Failed,
}

/// Outcome of one fan-out unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub unit: String,
    pub status: UnitStatus,
    pub findings: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl UnitRecord {
    pub fn succeeded(unit: impl Into<String>, findings: usize) -> Self {
        Self {
            unit: unit.into(),
            status: UnitStatus::Succeeded,
            findings,
            error: None,
        }
    }

    pub fn failed(unit: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            unit: unit.into(),
            status: UnitStatus::Failed,
            findings: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UnitStatus::Succeeded
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: PhaseId,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<UnitRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    pub attempts: u32,
}

impl PhaseRecord {
    pub fn new(phase: PhaseId) -> Self {
        Self {
            phase,
            status: PhaseStatus::Pending,
            started_at: None,
            ended_at: None,
            findings: Vec::new(),
            units: Vec::new(),
            error: None,
            notes: Vec::new(),
            attempts: 0,
        }
    }

    /// Moves to `next`, stamping start and end times
    pub fn transition(&mut self, next: PhaseStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                phase: self.phase,
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        if next == PhaseStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    pub fn failed_units(&self) -> usize {
        self.units.iter().filter(|u| !u.is_success()).count()
    }
}

/// One entry of the transition history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub phase: PhaseId,
    pub from: PhaseStatus,
    pub to: PhaseStatus,
    pub at: DateTime<Utc>,
}
