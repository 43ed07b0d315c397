//! Concurrent batch assessment
//!
//! At most `max_concurrent` assessments are in flight; outcomes come back in
//! input order whatever the completion order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;

use crate::model::{AssessmentRecord, BatchExitPolicy, Tier, VariantRequest};
use crate::service::assessment::{AssessmentError, AssessmentOrchestrator};
use crate::service::validation::{ValidationInputError, read_json};

/// Cooperative cancellation shared between the caller and a batch run
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Result for one batch item
#[derive(Debug)]
pub enum BatchOutcome {
    Assessed(AssessmentRecord),
    Failed(AssessmentError),
    /// Abandoned because the run was cancelled
    Cancelled(VariantRequest),
}

impl BatchOutcome {
    pub fn record(&self) -> Option<&AssessmentRecord> {
        match self {
            BatchOutcome::Assessed(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_assessed(&self) -> bool {
        matches!(self, BatchOutcome::Assessed(_))
    }

    pub fn request(&self) -> VariantRequest {
        match self {
            BatchOutcome::Assessed(record) => record.request(),
            BatchOutcome::Failed(error) => error.request().clone(),
            BatchOutcome::Cancelled(request) => request.clone(),
        }
    }

    /// Artifact `error_kind`, `None` for assessed items
    pub fn error_kind(&self) -> Option<&'static str> {
        match self {
            BatchOutcome::Assessed(_) => None,
            BatchOutcome::Failed(error) => Some(error.kind()),
            BatchOutcome::Cancelled(_) => Some("cancelled"),
        }
    }
}

/// Runs the orchestrator over many requests with bounded concurrency
pub struct BatchRunner {
    orchestrator: Arc<AssessmentOrchestrator>,
    max_concurrent: usize,
}

impl BatchRunner {
    pub fn new(orchestrator: Arc<AssessmentOrchestrator>, max_concurrent: usize) -> Self {
        Self {
            orchestrator,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Assess every request; the result has one outcome per request, in order
    pub async fn run(
        &self,
        requests: Vec<VariantRequest>,
        cancel: &CancellationToken,
    ) -> Vec<BatchOutcome> {
        let total = requests.len();
        let start_time = std::time::Instant::now();

        tracing::info!(
            total = total,
            max_concurrent = self.max_concurrent,
            "Starting batch assessment"
        );

        let sem = Arc::new(Semaphore::new(self.max_concurrent));
        let mut join_set = JoinSet::new();

        for (slot, request) in requests.iter().cloned().enumerate() {
            let sem = sem.clone();
            let orchestrator = self.orchestrator.clone();
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => BatchOutcome::Cancelled(request),
                    outcome = assess_with_permit(&orchestrator, &sem, &request) => outcome,
                };
                (slot, outcome)
            });
        }

        let mut slots: Vec<Option<BatchOutcome>> = (0..total).map(|_| None).collect();
        let mut completed = 0;
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((slot, outcome)) => {
                    completed += 1;
                    tracing::debug!(
                        slot = slot,
                        completed = completed,
                        total = total,
                        error_kind = outcome.error_kind().unwrap_or("none"),
                        "Batch item finished"
                    );
                    slots[slot] = Some(outcome);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Batch assessment task aborted");
                }
            }
        }

        let outcomes: Vec<BatchOutcome> = slots
            .into_iter()
            .zip(requests)
            .map(|(slot, request)| {
                slot.unwrap_or_else(|| {
                    BatchOutcome::Failed(AssessmentError::Aborted {
                        request,
                        message: "assessment task ended without a result".to_string(),
                    })
                })
            })
            .collect();

        let summary = BatchSummary::from_outcomes(&outcomes);
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            elapsed_ms = start_time.elapsed().as_millis(),
            "Batch assessment finished"
        );

        outcomes
    }
}

async fn assess_with_permit(
    orchestrator: &AssessmentOrchestrator,
    sem: &Semaphore,
    request: &VariantRequest,
) -> BatchOutcome {
    let _permit = match sem.acquire().await {
        Ok(permit) => permit,
        Err(e) => {
            return BatchOutcome::Failed(AssessmentError::Aborted {
                request: request.clone(),
                message: e.to_string(),
            });
        }
    };

    match orchestrator.assess(request).await {
        Ok(record) => BatchOutcome::Assessed(record),
        Err(e) => BatchOutcome::Failed(e),
    }
}

/// Counts over a finished batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub tier_distribution: BTreeMap<Tier, usize>,
    /// Failures keyed by artifact `error_kind`
    pub failures_by_kind: BTreeMap<&'static str, usize>,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[BatchOutcome]) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            ..Self::default()
        };

        for outcome in outcomes {
            match outcome {
                BatchOutcome::Assessed(record) => {
                    summary.succeeded += 1;
                    *summary.tier_distribution.entry(record.tier).or_default() += 1;
                }
                BatchOutcome::Failed(error) => {
                    summary.failed += 1;
                    *summary.failures_by_kind.entry(error.kind()).or_default() += 1;
                }
                BatchOutcome::Cancelled(_) => summary.cancelled += 1,
            }
        }

        summary
    }

    /// Overall status of the run under `policy`
    pub fn is_success(&self, policy: BatchExitPolicy) -> bool {
        match policy {
            BatchExitPolicy::AnySuccess => self.total == 0 || self.succeeded > 0,
            BatchExitPolicy::AllSucceeded => self.succeeded == self.total,
        }
    }
}

/// Failed or cancelled item as written to the artifact
#[derive(Debug, Serialize)]
struct ErrorRow<'a> {
    gene: &'a str,
    variant: &'a str,
    tumor_type: &'a str,
    error_kind: &'static str,
    error_message: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ArtifactRow<'a> {
    Record(&'a AssessmentRecord),
    Error(ErrorRow<'a>),
}

impl<'a> From<&'a BatchOutcome> for ArtifactRow<'a> {
    fn from(outcome: &'a BatchOutcome) -> Self {
        let (request, kind, message) = match outcome {
            BatchOutcome::Assessed(record) => return ArtifactRow::Record(record),
            BatchOutcome::Failed(error) => (error.request(), error.kind(), error.to_string()),
            BatchOutcome::Cancelled(request) => (
                request,
                "cancelled",
                format!("assessment of {request} cancelled"),
            ),
        };

        ArtifactRow::Error(ErrorRow {
            gene: &request.gene,
            variant: &request.variant,
            tumor_type: &request.tumor_type,
            error_kind: kind,
            error_message: message,
        })
    }
}

/// Failure writing a batch artifact
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Render outcomes as the artifact JSON array, in input order
pub fn artifact_json(outcomes: &[BatchOutcome]) -> Result<String, serde_json::Error> {
    let rows: Vec<ArtifactRow<'_>> = outcomes.iter().map(ArtifactRow::from).collect();
    serde_json::to_string_pretty(&rows)
}

/// Write the artifact for a finished batch
pub fn write_artifact(path: &Path, outcomes: &[BatchOutcome]) -> Result<(), ArtifactError> {
    let json = artifact_json(outcomes)?;
    std::fs::write(path, json).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::info!(path = %path.display(), rows = outcomes.len(), "Wrote batch artifact");
    Ok(())
}

/// Load a batch input file: a JSON array of `{gene, variant, tumor_type}`
pub fn load_batch_requests(path: &Path) -> Result<Vec<VariantRequest>, ValidationInputError> {
    let value = read_json(path)?;
    if !value.is_array() {
        return Err(ValidationInputError::UnexpectedShape);
    }
    let requests: Vec<VariantRequest> = serde_json::from_value(value)?;
    tracing::info!(path = %path.display(), requests = requests.len(), "Loaded batch input");
    Ok(requests)
}
