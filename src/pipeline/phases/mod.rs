// Analysis phases, in workflow order
//
// Each phase is self-contained with its own prompt builder and execution
// logic. Phases read earlier outputs from the session state and hand their
// own output back to the orchestrator as a `PhaseArtifact`.

pub mod llm_helper;

#[path = "01_discovery.rs"]
pub mod discovery;
#[path = "02_file_semantic.rs"]
pub mod file_semantic;
#[path = "03_project_semantic.rs"]
pub mod project_semantic;
#[path = "04_static_analysis.rs"]
pub mod static_analysis;
#[path = "05_endpoint_extraction.rs"]
pub mod endpoint_extraction;
#[path = "06_test_generation.rs"]
pub mod test_generation;
#[path = "07_report.rs"]
pub mod report;

use super::phase::AnalysisPhase;

pub use discovery::DiscoveryPhase;
pub use endpoint_extraction::EndpointExtractionPhase;
pub use file_semantic::FileSemanticPhase;
pub use project_semantic::ProjectSemanticPhase;
pub use report::ReportPhase;
pub use static_analysis::StaticAnalysisPhase;
pub use test_generation::TestGenerationPhase;

/// The seven phases in execution order
pub fn standard_phases() -> Vec<Box<dyn AnalysisPhase>> {
    vec![
        Box::new(DiscoveryPhase),
        Box::new(FileSemanticPhase),
        Box::new(ProjectSemanticPhase),
        Box::new(StaticAnalysisPhase),
        Box::new(EndpointExtractionPhase),
        Box::new(TestGenerationPhase),
        Box::new(ReportPhase),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PhaseId;

    #[test]
    fn test_standard_phases_follow_workflow_order() {
        let ids: Vec<PhaseId> = standard_phases().iter().map(|p| p.id()).collect();
        assert_eq!(ids, PhaseId::ALL.to_vec());
    }
}
