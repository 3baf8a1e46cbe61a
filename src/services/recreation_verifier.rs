//! Live verification of assembled test cases.
//!
//! Every case is replayed through a [`ReplayRuntime`] on a bounded worker
//! pool. A replay that does not reproduce the recorded outcome, fails, or
//! exceeds the timeout leaves the case unrecreated, and an unrecreated case
//! is never emitted. When the pool is done, unfinished workers are aborted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExecutionId, ExecutionTrace, ObservedValue, TestCase, VerificationConfig};
use crate::domain::ports::{ReplayOutcome, ReplayRuntime};

/// What the original run observed for a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExpectedOutcome {
    Returns { value: ObservedValue },
    Throws { exception: String },
}

impl ExpectedOutcome {
    /// Recorded outcome of `target`, as an owned tree so it can cross into
    /// worker tasks.
    pub fn of(trace: &ExecutionTrace, target: ExecutionId) -> DomainResult<Self> {
        let execution = trace.execution(target)?;
        if let Some(exception) = execution.exception() {
            return Ok(Self::Throws {
                exception: exception.to_string(),
            });
        }
        let value = match execution.return_value() {
            Some(value) => trace.to_observed(value)?,
            None => ObservedValue::Null,
        };
        Ok(Self::Returns { value })
    }

    /// Whether a replay reproduced this outcome.
    pub fn matches(&self, outcome: &ReplayOutcome, tolerance: f64) -> bool {
        match (self, outcome) {
            (Self::Returns { value: expected }, ReplayOutcome::Returned { value }) => {
                expected.matches(value, tolerance)
            }
            (Self::Throws { exception: expected }, ReplayOutcome::Threw { exception }) => {
                expected == exception
            }
            _ => false,
        }
    }
}

/// Result of replaying one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationStatus {
    /// Replay reproduced the recorded outcome.
    Recreated,
    /// Replay produced a different outcome.
    Mismatch,
    /// Replay did not finish in time.
    TimedOut,
    /// The runtime could not replay the case.
    Failed(String),
}

impl VerificationStatus {
    /// Whether replay matched the recording.
    pub fn is_recreated(&self) -> bool {
        matches!(self, Self::Recreated)
    }
}

/// One case to verify together with the outcome it must reproduce.
#[derive(Debug, Clone)]
pub struct VerificationJob {
    pub case: TestCase,
    pub expected: ExpectedOutcome,
}

/// Replays assembled cases against a runtime, a bounded number at a time.
pub struct RecreationVerifier {
    runtime: Arc<dyn ReplayRuntime>,
    timeout: Duration,
    max_workers: usize,
    tolerance: f64,
}

impl RecreationVerifier {
    /// Verifier with the configured timeout and worker count.
    pub fn new(runtime: Arc<dyn ReplayRuntime>, config: &VerificationConfig, tolerance: f64) -> Self {
        Self {
            runtime,
            timeout: Duration::from_secs(config.timeout_secs),
            max_workers: config.max_workers.max(1),
            tolerance,
        }
    }

    /// Name of the underlying runtime, for logs.
    pub fn runtime_name(&self) -> &'static str {
        self.runtime.name()
    }

    async fn replay_one(
        runtime: Arc<dyn ReplayRuntime>,
        case: TestCase,
        expected: ExpectedOutcome,
        limit: Duration,
        tolerance: f64,
    ) -> VerificationStatus {
        match timeout(limit, runtime.replay(&case)).await {
            Ok(Ok(outcome)) if expected.matches(&outcome, tolerance) => VerificationStatus::Recreated,
            Ok(Ok(outcome)) => {
                debug!(case = %case.name, ?outcome, "replay outcome differs from the recording");
                VerificationStatus::Mismatch
            }
            Ok(Err(err)) => VerificationStatus::Failed(err.to_string()),
            Err(_) => VerificationStatus::TimedOut,
        }
    }

    /// Verify one case.
    pub async fn verify(&self, case: &TestCase, expected: &ExpectedOutcome) -> VerificationStatus {
        Self::replay_one(
            Arc::clone(&self.runtime),
            case.clone(),
            expected.clone(),
            self.timeout,
            self.tolerance,
        )
        .await
    }

    /// Verify every job on the worker pool. Cases are returned in input
    /// order; recreated ones are marked as such.
    pub async fn verify_all(
        &self,
        jobs: Vec<VerificationJob>,
    ) -> DomainResult<Vec<(TestCase, VerificationStatus)>> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut workers = JoinSet::new();
        let mut cases = Vec::with_capacity(jobs.len());
        let mut statuses: Vec<VerificationStatus> = Vec::with_capacity(jobs.len());

        for (index, job) in jobs.into_iter().enumerate() {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| DomainError::ReplayFailed("worker pool closed".to_string()))?;
            let runtime = Arc::clone(&self.runtime);
            let case = job.case.clone();
            let limit = self.timeout;
            let tolerance = self.tolerance;
            workers.spawn(async move {
                let _permit = permit;
                let status = Self::replay_one(runtime, case, job.expected, limit, tolerance).await;
                (index, status)
            });
            cases.push(job.case);
            statuses.push(VerificationStatus::Failed("worker did not report".to_string()));
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, status)) => {
                    if let Some(slot) = statuses.get_mut(index) {
                        *slot = status;
                    }
                }
                Err(err) => warn!(error = %err, "verification worker failed"),
            }
        }
        workers.shutdown().await;

        Ok(cases
            .into_iter()
            .zip(statuses)
            .map(|(mut case, status)| {
                if status.is_recreated() {
                    case.mark_recreated();
                }
                (case, status)
            })
            .collect())
    }
}
