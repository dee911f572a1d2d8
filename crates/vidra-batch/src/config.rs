use std::time::Duration;

use serde::{Deserialize, Serialize};
use vidra_model::{BatchCounts, BatchStatus};

use crate::validate::MAX_CONCURRENCY;

/// How file failures roll up into the batch status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailurePolicy {
    /// Any failed file fails the batch.
    AnyFailed,
    /// The batch fails only when every file failed; otherwise it completes with partial failures.
    #[default]
    AllFailed,
}

impl FailurePolicy {
    /// Final status of a batch whose files all reached a terminal state.
    pub fn resolve(&self, counts: &BatchCounts) -> BatchStatus {
        let failed = match self {
            FailurePolicy::AnyFailed => counts.failed > 0,
            FailurePolicy::AllFailed => counts.total > 0 && counts.failed == counts.total,
        };
        if failed {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    /// Workers per batch when the request does not ask for a number.
    pub default_concurrency: usize,
    pub max_concurrency: usize,
    pub failure_policy: FailurePolicy,
    /// Retry ceiling of every file task.
    pub task_max_retries: u32,
    #[serde(rename = "taskRetryDelayMs", with = "vidra_model::serde_ms")]
    pub task_retry_delay: Duration,
    /// Finished batches kept for lookup; older ones are dropped on submit.
    /// `None` keeps them until [`crate::BatchOrchestrator::prune_finished`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retain_finished: Option<usize>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_concurrency: 4,
            max_concurrency: MAX_CONCURRENCY,
            failure_policy: FailurePolicy::default(),
            task_max_retries: 3,
            task_retry_delay: Duration::from_secs(1),
            retain_finished: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_default_concurrency(mut self, n: usize) -> Self {
        self.default_concurrency = n;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_task_max_retries(mut self, n: u32) -> Self {
        self.task_max_retries = n;
        self
    }

    pub fn with_task_retry_delay(mut self, delay: Duration) -> Self {
        self.task_retry_delay = delay;
        self
    }

    pub fn with_retain_finished(mut self, n: usize) -> Self {
        self.retain_finished = Some(n);
        self
    }

    /// Workers for one batch given what the supervisor can still admit.
    ///
    /// Never below one: a batch submitted while the supervisor is saturated waits for capacity.
    pub fn effective_concurrency(&self, requested: Option<usize>, available: usize) -> usize {
        let cap = self.max_concurrency.min(MAX_CONCURRENCY);
        requested
            .unwrap_or(self.default_concurrency)
            .min(cap)
            .min(available)
            .max(1)
    }
}
