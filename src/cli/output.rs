//! Output formatting for the CLI
//!
//! The session summary is printed as human-readable text or as JSON. Logs go
//! to stderr, so stdout only carries what this module renders.
//!
//! # Example
//!
//! ```ignore
//! use argus::cli::output::{OutputFormat, OutputFormatter};
//!
//! let formatter = OutputFormatter::new(OutputFormat::Human);
//! println!("{}", formatter.format_summary(&summary)?);
//! ```

use anyhow::{Context, Result};
use serde_json::{json, Value};

use crate::pipeline::{PhaseRecord, PhaseStatus, SessionSummary};

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// Human-readable formatted text
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_summary(&self, summary: &SessionSummary) -> Result<String> {
        match self.format {
            OutputFormat::Json => self.format_summary_json(summary),
            OutputFormat::Human => Ok(self.format_summary_human(summary)),
        }
    }

    /// Renders a configuration value; strings print without quotes
    pub fn format_config_value(&self, value: &Value) -> Result<String> {
        match (self.format, value) {
            (OutputFormat::Human, Value::String(s)) => Ok(s.clone()),
            (OutputFormat::Human, Value::Object(_) | Value::Array(_)) | (OutputFormat::Json, _) => {
                serde_json::to_string_pretty(value).context("Failed to serialize configuration")
            }
            (OutputFormat::Human, other) => Ok(other.to_string()),
        }
    }

    fn format_summary_json(&self, summary: &SessionSummary) -> Result<String> {
        let output = json!({
            "session_id": summary.session_id.to_string(),
            "output_dir": summary.output_dir,
            "report_path": summary.report_path,
            "data_path": summary.data_path,
            "cancelled": summary.cancelled,
            "duration_ms": summary.duration.as_millis() as u64,
            "total_findings": summary.total_findings(),
            "phases": summary.records.iter().map(phase_json).collect::<Vec<_>>(),
        });
        serde_json::to_string_pretty(&output).context("Failed to serialize session summary to JSON")
    }

    fn format_summary_human(&self, summary: &SessionSummary) -> String {
        let mut output = String::new();

        if summary.report_produced() {
            output.push_str("\u{2713} Security Analysis Complete\n");
        } else if summary.cancelled {
            output.push_str("\u{26A0} Security Analysis Cancelled\n");
        } else {
            output.push_str("\u{2717} Security Analysis Incomplete\n");
        }
        output.push_str(RULE);
        output.push_str("\n\n");

        output.push_str("Phases:\n");
        for (i, record) in summary.records.iter().enumerate() {
            let connector = if i == summary.records.len() - 1 {
                "\u{2514}"
            } else {
                "\u{251C}"
            };
            output.push_str(&format!(
                "{}\u{2500} {} {}. {:<28} {:<10} {}\n",
                connector,
                status_icon(record.status),
                record.phase.number(),
                record.phase.title(),
                record.status,
                finding_count(record)
            ));
            if let Some(error) = &record.error {
                output.push_str(&format!("      error: {}\n", error));
            } else if record.status == PhaseStatus::Skipped {
                if let Some(reason) = record.notes.last() {
                    output.push_str(&format!("      reason: {}\n", reason));
                }
            }
            if record.failed_units() > 0 {
                output.push_str(&format!(
                    "      {} of {} units failed\n",
                    record.failed_units(),
                    record.units.len()
                ));
            }
        }
        output.push('\n');

        output.push_str(&format!("Findings: {}\n", summary.total_findings()));
        match &summary.report_path {
            Some(path) => output.push_str(&format!("Report:   {}\n", path.display())),
            None => output.push_str("Report:   (not produced)\n"),
        }
        if let Some(path) = &summary.data_path {
            output.push_str(&format!("Data:     {}\n", path.display()));
        }
        output.push_str(&format!("Output:   {}\n", summary.output_dir.display()));
        output.push_str(&format!(
            "\nCompleted in {:.1}s\n",
            summary.duration.as_secs_f64()
        ));

        output
    }
}

fn phase_json(record: &PhaseRecord) -> Value {
    json!({
        "phase": record.phase,
        "status": record.status,
        "findings": record.findings.len(),
        "failed_units": record.failed_units(),
        "error": record.error,
        "duration_ms": record.duration_ms(),
    })
}

fn status_icon(status: PhaseStatus) -> &'static str {
    match status {
        PhaseStatus::Succeeded => "\u{2713}",
        PhaseStatus::Failed => "\u{2717}",
        PhaseStatus::Skipped => "\u{2298}",
        PhaseStatus::Pending | PhaseStatus::Running => "\u{2026}",
    }
}

fn finding_count(record: &PhaseRecord) -> String {
    match record.findings.len() {
        0 => String::new(),
        1 => "1 finding".to_string(),
        n => format!("{} findings", n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorInfo, ErrorKind};
    use crate::pipeline::{Finding, PhaseId, Severity};
    use std::path::PathBuf;
    use std::time::Duration;
    use uuid::Uuid;

    fn summary(report: bool) -> SessionSummary {
        let mut records: Vec<PhaseRecord> =
            PhaseId::ALL.iter().map(|p| PhaseRecord::new(*p)).collect();
        records[0].transition(PhaseStatus::Running).unwrap();
        records[0].findings.push(Finding::new(
            PhaseId::Discovery,
            "Vault.sol",
            "t",
            Severity::Low,
            "d",
        ));
        records[0].transition(PhaseStatus::Succeeded).unwrap();
        records[3].transition(PhaseStatus::Running).unwrap();
        records[3].error = Some(ErrorInfo::new(ErrorKind::ContainerTimeout, "slither ran 300s"));
        records[3].transition(PhaseStatus::Failed).unwrap();

        SessionSummary {
            session_id: Uuid::new_v4(),
            output_dir: PathBuf::from("/p/argus/20250101_000000"),
            records,
            report_path: report
                .then(|| PathBuf::from("/p/argus/20250101_000000/argus-security-report.md")),
            data_path: None,
            cancelled: false,
            duration: Duration::from_millis(1500),
        }
    }

    #[test]
    fn test_human_summary() {
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_summary(&summary(true))
            .unwrap();

        assert!(output.contains("Security Analysis Complete"));
        assert!(output.contains("Contract discovery"));
        assert!(output.contains("1 finding"));
        assert!(output.contains("error: ContainerTimeout: slither ran 300s"));
        assert!(output.contains("argus-security-report.md"));
        assert!(output.contains("1.5s"));
    }

    #[test]
    fn test_human_summary_without_report() {
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_summary(&summary(false))
            .unwrap();
        assert!(output.contains("Security Analysis Incomplete"));
        assert!(output.contains("(not produced)"));
    }

    #[test]
    fn test_json_summary() {
        let output = OutputFormatter::new(OutputFormat::Json)
            .format_summary(&summary(true))
            .unwrap();
        let parsed: Value = serde_json::from_str(&output).unwrap();

        assert_eq!(parsed["total_findings"], 1);
        assert_eq!(parsed["phases"][3]["status"], "failed");
        assert_eq!(parsed["phases"][3]["error"]["kind"], "container_timeout");
        assert_eq!(parsed["phases"].as_array().unwrap().len(), 7);
    }

    #[test]
    fn test_config_value_rendering() {
        let human = OutputFormatter::new(OutputFormat::Human);
        assert_eq!(human.format_config_value(&json!("none")).unwrap(), "none");
        assert_eq!(human.format_config_value(&json!(4)).unwrap(), "4");
        assert!(human
            .format_config_value(&json!({"a": 1}))
            .unwrap()
            .contains("\"a\": 1"));

        let machine = OutputFormatter::new(OutputFormat::Json);
        assert_eq!(machine.format_config_value(&json!("none")).unwrap(), "\"none\"");
    }
}
