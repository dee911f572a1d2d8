use std::{collections::BTreeMap, time::SystemTime};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use vidra_model::{BatchId, ProbeOptions, SourceType, TimeoutMs, time_serde};

/// Tool output for one file, kept opaque.
pub type ProbeReport = serde_json::Value;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The tool ran and reported a failure.
    #[error("probe failed: {0}")]
    Failed(String),

    #[error("probe timed out after {0}ms")]
    Timeout(TimeoutMs),

    #[error("probe canceled")]
    Canceled,

    /// The source cannot be probed by this executor; the file is skipped, not retried.
    #[error("unsupported source: {0}")]
    Unsupported(String),

    #[error("invalid probe output: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    #[error("record rejected: {0}")]
    Rejected(String),
}

/// Inspects one media source.
///
/// Implementations must return promptly with [`ProbeError::Canceled`] once `ctx` fires.
#[async_trait]
pub trait ProbeExecutor: Send + Sync + 'static {
    async fn analyze(
        &self,
        path: &str,
        source_type: SourceType,
        options: &ProbeOptions,
        ctx: CancellationToken,
    ) -> Result<ProbeReport, ProbeError>;
}

/// Durable sink for analysis artifacts.
#[async_trait]
pub trait ResultRepository: Send + Sync + 'static {
    /// Store the record and return its id.
    async fn persist(&self, record: AnalysisRecord) -> Result<String, RepositoryError>;
}

/// What gets persisted for one successfully probed file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub batch_id: BatchId,
    pub file_id: String,
    pub path: String,
    pub source_type: SourceType,
    pub metadata: BTreeMap<String, String>,
    pub report: ProbeReport,
    #[serde(with = "time_serde")]
    pub created_at: SystemTime,
}
