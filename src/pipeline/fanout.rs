//! Bounded fan-out of independent units within one phase
//!
//! Units run on a semaphore-limited `JoinSet`. Each unit body runs in its own
//! task so a panic becomes that unit's failure. Results come back in
//! submission order regardless of completion order.

use super::phase::{PhaseError, PhaseId};
use super::record::UnitRecord;
use crate::error::{ErrorInfo, ErrorKind};
use crate::progress::{ProgressEvent, ProgressHandler};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct UnitResult<T> {
    pub unit: String,
    pub outcome: Result<T, ErrorInfo>,
}

pub struct FanOut {
    phase: PhaseId,
    limit: usize,
    cancel: CancellationToken,
    progress: Option<Arc<dyn ProgressHandler>>,
}

impl FanOut {
    pub fn new(phase: PhaseId, limit: usize, cancel: CancellationToken) -> Self {
        Self {
            phase,
            limit: limit.max(1),
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Runs `work` once per unit and waits for all of them
    ///
    /// Cancellation is checked before each unit starts; units that never
    /// started are reported as cancelled.
    pub async fn run<I, T, F, Fut>(&self, units: Vec<(String, I)>, work: F) -> Vec<UnitResult<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PhaseError>> + Send + 'static,
    {
        let total = units.len();
        let work = Arc::new(work);
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let mut names = Vec::with_capacity(total);
        let mut finished: BTreeMap<usize, Result<T, ErrorInfo>> = BTreeMap::new();
        let mut join_set = JoinSet::new();

        debug!(phase = %self.phase, units = total, limit = self.limit, "Fanning out");

        for (idx, (name, input)) in units.into_iter().enumerate() {
            names.push(name.clone());

            let permit = tokio::select! {
                _ = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                finished.insert(idx, Err(cancelled(&name)));
                continue;
            };
            if self.cancel.is_cancelled() {
                finished.insert(idx, Err(cancelled(&name)));
                continue;
            }

            let work = Arc::clone(&work);
            join_set.spawn(async move {
                let handle = tokio::spawn(async move { work(input).await });
                let outcome = match handle.await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(e.to_info()),
                    Err(join_error) if join_error.is_panic() => Err(ErrorInfo::new(
                        ErrorKind::Internal,
                        format!("Unit '{}' panicked", name),
                    )),
                    Err(_) => Err(cancelled(&name)),
                };
                drop(permit);
                (idx, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, outcome)) => {
                    self.report(&names[idx], &outcome);
                    finished.insert(idx, outcome);
                }
                // The wrapper only awaits the inner task, so this is an abort
                Err(e) => warn!(phase = %self.phase, error = %e, "Fan-out task aborted"),
            }
        }

        names
            .into_iter()
            .enumerate()
            .map(|(idx, unit)| {
                let outcome = finished.remove(&idx).unwrap_or_else(|| {
                    Err(ErrorInfo::new(ErrorKind::Internal, "Unit produced no result"))
                });
                UnitResult { unit, outcome }
            })
            .collect()
    }

    fn report<T>(&self, unit: &str, outcome: &Result<T, ErrorInfo>) {
        if let Err(e) = outcome {
            warn!(phase = %self.phase, unit, error = %e, "Unit failed");
        }
        if let Some(progress) = &self.progress {
            progress.on_progress(&ProgressEvent::UnitCompleted {
                phase: self.phase,
                unit: unit.to_string(),
                success: outcome.is_ok(),
            });
        }
    }
}

fn cancelled(unit: &str) -> ErrorInfo {
    ErrorInfo::new(
        ErrorKind::Cancelled,
        format!("Unit '{}' not started: session cancelled", unit),
    )
}

/// Splits unit results into successes and per-unit records
///
/// Fails only when there was at least one unit and every unit failed.
pub fn collect_units<T>(
    results: Vec<UnitResult<T>>,
    findings_of: impl Fn(&T) -> usize,
) -> Result<(Vec<(String, T)>, Vec<UnitRecord>), PhaseError> {
    let mut succeeded = Vec::new();
    let mut records = Vec::with_capacity(results.len());
    let mut first_error = None;

    for result in results {
        match result.outcome {
            Ok(value) => {
                records.push(UnitRecord::succeeded(&result.unit, findings_of(&value)));
                succeeded.push((result.unit, value));
            }
            Err(error) => {
                if first_error.is_none() {
                    first_error = Some(error.clone());
                }
                records.push(UnitRecord::failed(result.unit, error));
            }
        }
    }

    match first_error {
        Some(first) if succeeded.is_empty() => Err(PhaseError::AllUnitsFailed {
            first,
            units: records,
        }),
        _ => Ok((succeeded, records)),
    }
}
