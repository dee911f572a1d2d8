use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::{BatchId, BatchStatus, FileStatus, Priority, time_serde};

/// Outcome of one batch file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    /// Back-reference to [`crate::BatchFile::id`].
    pub file_id: String,
    /// Id of the persisted analysis record, once one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<String>,
    pub status: FileStatus,
    /// Present only when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processing_time_ms: u64,
    #[serde(default, with = "time_serde::option", skip_serializing_if = "Option::is_none")]
    pub started_at: Option<SystemTime>,
    #[serde(default, with = "time_serde::option", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<SystemTime>,
}

impl BatchResult {
    pub fn pending(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            analysis_id: None,
            status: FileStatus::Pending,
            error: None,
            processing_time_ms: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Per-status tallies, always derived from a result table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl BatchCounts {
    pub fn from_results(results: &[BatchResult]) -> Self {
        let mut counts = BatchCounts {
            total: results.len(),
            ..Default::default()
        };
        for r in results {
            match r.status {
                FileStatus::Pending => counts.pending += 1,
                FileStatus::Processing => counts.processing += 1,
                FileStatus::Completed => counts.completed += 1,
                FileStatus::Failed => counts.failed += 1,
                FileStatus::Skipped => counts.skipped += 1,
                FileStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Files that reached a terminal status.
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.skipped + self.cancelled
    }

    /// Percentage of finished files, 0..=100.
    pub fn progress(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.finished() * 100) / self.total) as u8
    }
}

/// Batch view without the per-file table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub id: BatchId,
    pub status: BatchStatus,
    pub priority: Priority,
    #[serde(flatten)]
    pub counts: BatchCounts,
    pub progress: u8,
    #[serde(with = "time_serde")]
    pub created_at: SystemTime,
    #[serde(default, with = "time_serde::option", skip_serializing_if = "Option::is_none")]
    pub started_at: Option<SystemTime>,
    #[serde(default, with = "time_serde::option", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<SystemTime>,
}

/// Full batch view, results in submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot {
    #[serde(flatten)]
    pub summary: BatchSummary,
    pub results: Vec<BatchResult>,
}
