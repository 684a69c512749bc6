pub mod fanout;
pub mod orchestrator;
pub mod phase;
pub mod phases;
pub mod record;
pub mod session;

pub use fanout::{collect_units, FanOut, UnitResult};
pub use orchestrator::{PhaseOrchestrator, SessionSummary};
pub use phase::{
    AnalysisPhase, PhaseArtifact, PhaseContext, PhaseError, PhaseId, PhaseOutput, PhaseServices,
    PrerequisitePolicy,
};
pub use phases::standard_phases;
pub use record::{
    Finding, InvalidTransition, PhaseRecord, PhaseStatus, PhaseTransition, Severity, UnitRecord,
    UnitStatus,
};
pub use session::{AnalysisSession, SessionState, PHASE_HISTORY_FILE};
