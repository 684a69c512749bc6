use super::phase::{
    AnalysisPhase, PhaseContext, PhaseError, PhaseId, PhaseServices, PrerequisitePolicy,
};
use super::phases::standard_phases;
use super::record::{PhaseRecord, PhaseStatus};
use super::session::AnalysisSession;
use crate::docker::{check_runtime_available, ContainerRuntime};
use crate::error::ArgusError;
use crate::progress::{LoggingHandler, ProgressEvent, ProgressHandler};
use crate::util::RetryPolicy;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What a finished (or cancelled) session produced
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub output_dir: PathBuf,
    pub records: Vec<PhaseRecord>,
    pub report_path: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
    pub cancelled: bool,
    pub duration: Duration,
}

impl SessionSummary {
    pub fn report_produced(&self) -> bool {
        !self.cancelled && self.report_path.is_some()
    }

    pub fn record(&self, phase: PhaseId) -> Option<&PhaseRecord> {
        self.records.iter().find(|r| r.phase == phase)
    }

    pub fn total_findings(&self) -> usize {
        self.records.iter().map(|r| r.findings.len()).sum()
    }
}

/// Drives the fixed phase sequence of one session
pub struct PhaseOrchestrator {
    phases: Vec<Box<dyn AnalysisPhase>>,
    services: PhaseServices,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    progress: Arc<dyn ProgressHandler>,
}

impl PhaseOrchestrator {
    pub fn new(services: PhaseServices) -> Self {
        Self {
            phases: standard_phases(),
            services,
            runtime: None,
            progress: Arc::new(LoggingHandler),
        }
    }

    /// Replaces the phase list; phases must be given in workflow order
    pub fn with_phases(mut self, phases: Vec<Box<dyn AnalysisPhase>>) -> Self {
        self.phases = phases;
        self
    }

    /// Runtime probed before phase 1 when container tools are registered
    pub fn with_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    /// Runs every phase in order
    ///
    /// Only an unreachable sandbox runtime or an unusable output directory
    /// is returned as an error; phase failures end up in the records.
    pub async fn run(&self, session: &mut AnalysisSession) -> Result<SessionSummary, ArgusError> {
        let start = Instant::now();
        info!(
            session = %session.id(),
            project = %session.project_path().display(),
            "Starting analysis"
        );

        self.ensure_sandbox().await?;
        session.prepare_output_dir()?;

        self.progress.on_progress(&ProgressEvent::SessionStarted {
            session_id: session.id().to_string(),
            project: session.project_path().display().to_string(),
        });
        persist(session);

        let policy = session.config().retry_policy();

        for phase in &self.phases {
            if session.is_cancelled() {
                break;
            }

            let id = phase.id();
            if session.status(id) != PhaseStatus::Pending {
                warn!(phase = %id, "Phase already ran in this session, ignoring duplicate");
                continue;
            }

            let unmet: Vec<PhaseId> = phase
                .prerequisites()
                .iter()
                .copied()
                .filter(|p| session.status(*p) != PhaseStatus::Succeeded)
                .collect();

            if !unmet.is_empty() {
                let names: Vec<&str> = unmet.iter().map(|p| p.as_str()).collect();
                let reason = format!("Prerequisites not met: {}", names.join(", "));
                match phase.policy() {
                    PrerequisitePolicy::SkipOnFailure => {
                        self.skip(session, id, reason);
                        persist(session);
                        continue;
                    }
                    PrerequisitePolicy::BestEffort => {
                        debug!(phase = %id, reason = %reason, "Running with degraded input");
                        session
                            .record_mut(id)
                            .notes
                            .push(format!("{}; ran with degraded input", reason));
                    }
                }
            }

            self.run_phase(phase.as_ref(), session, &policy).await;
            persist(session);
        }

        let cancelled = session.is_cancelled();
        if cancelled {
            warn!("Session cancelled, skipping remaining phases");
            for id in PhaseId::ALL {
                if session.status(id) == PhaseStatus::Pending {
                    self.skip(session, id, "Session cancelled".to_string());
                }
            }
            persist(session);
        }

        let duration = start.elapsed();
        self.progress.on_progress(&ProgressEvent::SessionCompleted {
            duration,
            cancelled,
            statuses: session
                .records()
                .iter()
                .map(|r| (r.phase, r.status))
                .collect(),
        });

        let report = session.state().report.as_ref();
        Ok(SessionSummary {
            session_id: session.id(),
            output_dir: session.output_dir().to_path_buf(),
            records: session.records().to_vec(),
            report_path: report.map(|r| r.report_path.clone()),
            data_path: report.map(|r| r.data_path.clone()),
            cancelled,
            duration,
        })
    }

    async fn ensure_sandbox(&self) -> Result<(), ArgusError> {
        if !self.services.dispatcher.registry().has_container_tools() {
            debug!("No container-backed tools registered, skipping sandbox probe");
            return Ok(());
        }
        let Some(runtime) = &self.runtime else {
            return Err(ArgusError::SandboxUnavailable(
                "Container tools are registered but no container runtime is configured".to_string(),
            ));
        };
        check_runtime_available(runtime.as_ref())
            .await
            .map_err(|e| ArgusError::SandboxUnavailable(e.to_string()))
    }

    async fn run_phase(
        &self,
        phase: &dyn AnalysisPhase,
        session: &mut AnalysisSession,
        policy: &RetryPolicy,
    ) {
        let id = phase.id();
        transition(session, id, PhaseStatus::Running);
        let phase_start = Instant::now();
        let attempts = AtomicU32::new(0);

        let result = {
            let ctx = PhaseContext {
                session: &*session,
                services: &self.services,
                progress: &self.progress,
            };
            let (ctx, attempts, progress) = (&ctx, &attempts, &self.progress);
            policy
                .run(
                    id.as_str(),
                    Some(session.cancel_token()),
                    PhaseError::is_transient,
                    move |attempt| {
                        attempts.store(attempt, Ordering::SeqCst);
                        progress.on_progress(&ProgressEvent::PhaseStarted { phase: id, attempt });
                        phase.execute(ctx)
                    },
                )
                .await
        };

        let record = session.record_mut(id);
        record.attempts = attempts.load(Ordering::SeqCst);

        match result {
            Ok(output) => {
                let findings = output.findings.len();
                record.findings.extend(output.findings);
                record.units = output.units;
                record.notes.extend(output.notes);
                if let Some(artifact) = output.artifact {
                    session.state_mut().apply(artifact);
                }
                transition(session, id, PhaseStatus::Succeeded);
                self.progress.on_progress(&ProgressEvent::PhaseCompleted {
                    phase: id,
                    findings,
                    duration: phase_start.elapsed(),
                });
            }
            Err(e) => {
                let info = e.to_info();
                if let PhaseError::AllUnitsFailed { units, .. } = e {
                    record.units = units;
                }
                record.error = Some(info.clone());
                transition(session, id, PhaseStatus::Failed);
                self.progress.on_progress(&ProgressEvent::PhaseFailed {
                    phase: id,
                    error: info.to_string(),
                });
            }
        }
    }

    fn skip(&self, session: &mut AnalysisSession, id: PhaseId, reason: String) {
        session.record_mut(id).notes.push(reason.clone());
        transition(session, id, PhaseStatus::Skipped);
        self.progress
            .on_progress(&ProgressEvent::PhaseSkipped { phase: id, reason });
    }
}

fn transition(session: &mut AnalysisSession, id: PhaseId, to: PhaseStatus) {
    if let Err(e) = session.transition(id, to) {
        error!(error = %e, "Rejected phase transition");
    }
}

fn persist(session: &AnalysisSession) {
    if let Err(e) = session.write_history() {
        warn!(error = %e, "Failed to write phase history");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArgusConfig;
    use crate::docker::InMemoryRuntime;
    use crate::llm::{BackendError, MockLLMClient};
    use crate::pipeline::phase::PhaseOutput;
    use crate::tools::{standard_registry, SandboxServices, ToolDispatcher};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Fixed(PhaseId, bool);

    #[async_trait]
    impl AnalysisPhase for Fixed {
        fn id(&self) -> PhaseId {
            self.0
        }

        async fn execute(&self, _ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PhaseError> {
            if self.1 {
                Ok(PhaseOutput::default())
            } else {
                Err(PhaseError::InvalidInput("broken".into()))
            }
        }
    }

    /// Fails with `error` on the first `failures` attempts
    struct Flaky {
        failures: u32,
        error: fn() -> PhaseError,
        calls: AtomicU32,
    }

    #[async_trait]
    impl AnalysisPhase for Flaky {
        fn id(&self) -> PhaseId {
            PhaseId::Discovery
        }

        async fn execute(&self, _ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PhaseError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err((self.error)())
            } else {
                Ok(PhaseOutput::default())
            }
        }
    }

    fn fast_config() -> ArgusConfig {
        let mut config = ArgusConfig::default();
        config.orchestrator.retry_initial_delay_ms = 1;
        config.orchestrator.retry_max_delay_ms = 2;
        config
    }

    fn services(
        config: &ArgusConfig,
        dir: &TempDir,
        runtime: Option<Arc<InMemoryRuntime>>,
    ) -> PhaseServices {
        let sandbox = runtime.map(|r| SandboxServices::new(r, config));
        let registry = standard_registry(config, dir.path(), dir.path(), sandbox).unwrap();
        let llm: Arc<dyn crate::llm::LLMClient> = Arc::new(MockLLMClient::new());
        PhaseServices {
            analysis_llm: llm.clone(),
            generator_llm: llm,
            dispatcher: Arc::new(ToolDispatcher::new(registry, 1000)),
        }
    }

    #[tokio::test]
    async fn test_unreachable_runtime_aborts_before_phase_one() {
        let dir = TempDir::new().unwrap();
        let config = ArgusConfig::default();
        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.set_reachable(false);

        let orchestrator = PhaseOrchestrator::new(services(&config, &dir, Some(runtime.clone())))
            .with_runtime(runtime);
        let mut session = AnalysisSession::new(dir.path(), Arc::new(config));

        let err = orchestrator.run(&mut session).await.unwrap_err();
        assert!(matches!(err, ArgusError::SandboxUnavailable(_)));
        assert!(!session.output_dir().exists());
        assert_eq!(session.status(PhaseId::Discovery), PhaseStatus::Pending);
    }

    #[tokio::test]
    async fn test_skip_on_failed_prerequisite() {
        let dir = TempDir::new().unwrap();
        let config = ArgusConfig::default();
        let orchestrator = PhaseOrchestrator::new(services(&config, &dir, None)).with_phases(vec![
            Box::new(Fixed(PhaseId::Discovery, false)),
            Box::new(Fixed(PhaseId::StaticAnalysis, true)),
        ]);
        let mut session = AnalysisSession::new(dir.path(), Arc::new(config));

        let summary = orchestrator.run(&mut session).await.unwrap();

        assert_eq!(session.status(PhaseId::Discovery), PhaseStatus::Failed);
        assert_eq!(session.status(PhaseId::StaticAnalysis), PhaseStatus::Skipped);
        assert!(session
            .transitions()
            .iter()
            .filter(|t| t.phase == PhaseId::StaticAnalysis)
            .all(|t| t.to != PhaseStatus::Running));
        assert!(!summary.report_produced());
        assert!(session.history_path().is_file());
    }

    #[tokio::test]
    async fn test_transient_phase_error_reruns_phase() {
        let dir = TempDir::new().unwrap();
        let config = fast_config();
        let orchestrator = PhaseOrchestrator::new(services(&config, &dir, None))
            .with_phases(vec![Box::new(Flaky {
                failures: 1,
                error: || PhaseError::Backend(BackendError::TimeoutError { seconds: 1 }),
                calls: AtomicU32::new(0),
            })]);
        let mut session = AnalysisSession::new(dir.path(), Arc::new(config));

        orchestrator.run(&mut session).await.unwrap();

        let record = session.record(PhaseId::Discovery);
        assert_eq!(record.status, PhaseStatus::Succeeded);
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test]
    async fn test_exhausted_error_is_not_retried_again() {
        let dir = TempDir::new().unwrap();
        let config = fast_config();
        let orchestrator = PhaseOrchestrator::new(services(&config, &dir, None))
            .with_phases(vec![Box::new(Flaky {
                failures: 1,
                error: || {
                    PhaseError::Backend(BackendError::TimeoutError { seconds: 1 }).exhausted()
                },
                calls: AtomicU32::new(0),
            })]);
        let mut session = AnalysisSession::new(dir.path(), Arc::new(config));

        orchestrator.run(&mut session).await.unwrap();

        let record = session.record(PhaseId::Discovery);
        assert_eq!(record.status, PhaseStatus::Failed);
        assert_eq!(record.attempts, 1);
        assert_eq!(
            record.error.as_ref().map(|e| e.kind),
            Some(crate::error::ErrorKind::ExternalServiceFailure)
        );
    }
}
