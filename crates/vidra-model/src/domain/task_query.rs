use serde::{Deserialize, Serialize};

use super::TaskStatus;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

/// Filter and window over live tasks.
///
/// Deserializes from e.g. `{"name":"probe","status":"RUNNING","limit":20}`;
/// absent fields mean no filter, first page, default size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    pub limit: usize,
    pub offset: usize,
}

/// One window of query results; `total` counts every match, not just `items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskPage<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl TaskQuery {
    pub fn new() -> Self {
        Self {
            name: None,
            status: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Page size actually applied: `limit` capped at 1000.
    pub fn effective_limit(&self) -> usize {
        self.limit.min(MAX_LIMIT)
    }

    pub fn matches(&self, name: &str, status: TaskStatus) -> bool {
        self.name.as_deref().is_none_or(|n| n == name) && self.status.is_none_or(|s| s == status)
    }

    /// Cut the window out of already filtered, ordered matches.
    pub fn page<T, I>(&self, matches: I) -> TaskPage<T>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        let matches = matches.into_iter();
        let total = matches.len();
        let items = matches.skip(self.offset).take(self.effective_limit()).collect();
        TaskPage { items, total }
    }
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self::new()
    }
}
