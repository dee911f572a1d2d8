use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Priority, ProbeOptions, SourceType, TimeoutMs};

/// One file to analyse as part of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFile {
    /// Caller token, unique within the batch.
    pub id: String,
    /// Local path or URI.
    pub path: String,
    pub source_type: SourceType,
    /// Per-file override of the batch options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ProbeOptions>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl BatchFile {
    pub fn new(id: impl Into<String>, path: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            source_type,
            options: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_options(mut self, options: ProbeOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Batch-wide options overlaid with this file's own.
    pub fn effective_options(&self, global: Option<&ProbeOptions>) -> ProbeOptions {
        match (global, &self.options) {
            (Some(g), Some(own)) => g.merged(own),
            (Some(g), None) => g.clone(),
            (None, Some(own)) => own.clone(),
            (None, None) => ProbeOptions::default(),
        }
    }
}

/// A caller-submitted collection of analysis jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub files: Vec<BatchFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ProbeOptions>,
    #[serde(default)]
    pub priority: Priority,
    /// Ceiling on total batch wall-clock time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<TimeoutMs>,
    /// Per-batch worker cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
}

impl BatchRequest {
    pub fn new(files: Vec<BatchFile>) -> Self {
        Self {
            files,
            ..Default::default()
        }
    }

    pub fn with_options(mut self, options: ProbeOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: TimeoutMs) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }
}
