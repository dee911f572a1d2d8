use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use uuid::Uuid;

use crate::{AnalysisRecord, RepositoryError, ResultRepository};

/// [`ResultRepository`] kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: Mutex<HashMap<String, AnalysisRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<AnalysisRecord> {
        self.lock().get(id).cloned()
    }

    /// Records stored for one batch, ordered by file id.
    pub fn by_batch(&self, batch_id: &str) -> Vec<(String, AnalysisRecord)> {
        let mut out: Vec<_> = self
            .lock()
            .iter()
            .filter(|(_, r)| r.batch_id == batch_id)
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();
        out.sort_by(|a, b| a.1.file_id.cmp(&b.1.file_id));
        out
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, AnalysisRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ResultRepository for MemoryRepository {
    async fn persist(&self, record: AnalysisRecord) -> Result<String, RepositoryError> {
        let id = Uuid::new_v4().to_string();
        self.lock().insert(id.clone(), record);
        Ok(id)
    }
}
