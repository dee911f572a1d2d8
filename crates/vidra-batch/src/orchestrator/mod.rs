//! Batch orchestration.
//!
//! A submitted batch is validated as a whole, then driven by a background task that offers
//! each file a worker slot in submission order. Every file runs as one supervised task;
//! the supervisor provides retries, crash isolation and the global concurrency ceiling.

mod batch;
mod driver;


use std::{
    collections::HashMap,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::{debug, info, instrument};
use uuid::Uuid;
use vidra_core::{CoreError, Supervisor};
use vidra_model::{BatchId, BatchRequest, BatchSnapshot, BatchStatus, BatchSummary};

use crate::{
    BatchError, OrchestratorConfig, ProbeExecutor, ResultRepository, validate::validate_request,
};
use batch::BatchEntry;

pub(crate) struct Inner {
    cfg: OrchestratorConfig,
    supervisor: Supervisor,
    probe: Arc<dyn ProbeExecutor>,
    repo: Arc<dyn ResultRepository>,
    batches: RwLock<HashMap<BatchId, Arc<BatchEntry>>>,
    seq: AtomicU64,
}

/// Entry point for batch submissions.
///
/// Cheap to clone; clones share the same batch table.
#[derive(Clone)]
pub struct BatchOrchestrator {
    inner: Arc<Inner>,
}

impl BatchOrchestrator {
    pub fn new(
        supervisor: Supervisor,
        probe: Arc<dyn ProbeExecutor>,
        repo: Arc<dyn ResultRepository>,
        cfg: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cfg,
                supervisor,
                probe,
                repo,
                batches: RwLock::new(HashMap::new()),
                seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.inner.supervisor
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.cfg
    }

    /// Admit a batch and start driving it in the background.
    ///
    /// Admission is all-or-nothing: an invalid request schedules nothing.
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, req: BatchRequest) -> Result<BatchId, BatchError> {
        validate_request(&req)?;
        if self.inner.supervisor.is_shutting_down() {
            return Err(CoreError::ShuttingDown.into());
        }

        let id = Uuid::new_v4().to_string();
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(BatchEntry::new(id.clone(), seq, &req));
        {
            let mut map = self
                .inner
                .batches
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            map.insert(id.clone(), Arc::clone(&entry));
            if let Some(keep) = self.inner.cfg.retain_finished {
                let evicted = evict_finished(&mut map, keep);
                if evicted > 0 {
                    debug!(evicted, keep, "old finished batches dropped");
                }
            }
        }

        info!(
            batch = %id,
            files = req.files.len(),
            priority = req.priority.as_str(),
            "batch accepted"
        );
        entry.mark_queued();
        tokio::spawn(driver::drive(Arc::clone(&self.inner), entry, req));
        Ok(id)
    }

    pub fn get_batch_status(&self, id: &str) -> Result<BatchSnapshot, BatchError> {
        Ok(self.entry(id)?.snapshot())
    }

    /// Stop every file of the batch; open files become `cancelled`.
    ///
    /// Cancelling a batch that already finished is a no-op.
    #[instrument(level = "debug", skip(self))]
    pub fn cancel(&self, id: &str) -> Result<(), BatchError> {
        let entry = self.entry(id)?;
        if entry.abort(BatchStatus::Cancelled) {
            info!(batch = %id, "batch cancelled");
            self.inner.halt(&entry);
        } else {
            debug!(batch = %id, status = %entry.status(), "cancel ignored on finished batch");
        }
        Ok(())
    }

    /// Cancel every unfinished batch and return how many were affected.
    pub fn cancel_all(&self) -> usize {
        self.entries()
            .into_iter()
            .filter(|e| e.abort(BatchStatus::Cancelled))
            .inspect(|e| self.inner.halt(e))
            .count()
    }

    /// Summaries of every known batch, newest first.
    pub fn list(&self) -> Vec<BatchSummary> {
        let mut entries = self.entries();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        entries.iter().map(|e| e.summary()).collect()
    }

    /// Wait until the batch is terminal and return its final snapshot.
    #[instrument(level = "debug", skip(self))]
    pub async fn wait(&self, id: &str) -> Result<BatchSnapshot, BatchError> {
        let entry = self.entry(id)?;
        entry.finished().await;
        Ok(entry.snapshot())
    }

    /// Forget finished batches and return how many were dropped.
    ///
    /// Without [`OrchestratorConfig::retain_finished`] this is the only way the batch table shrinks.
    pub fn prune_finished(&self) -> usize {
        let mut map = self
            .inner
            .batches
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|_, e| !e.is_terminal());
        before - map.len()
    }

    fn entry(&self, id: &str) -> Result<Arc<BatchEntry>, BatchError> {
        self.inner
            .batches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| BatchError::NotFound(id.to_string()))
    }

    fn entries(&self) -> Vec<Arc<BatchEntry>> {
        self.inner
            .batches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

/// Drop all but the `keep` newest finished batches.
fn evict_finished(map: &mut HashMap<BatchId, Arc<BatchEntry>>, keep: usize) -> usize {
    let mut finished: Vec<(u64, BatchId)> = map
        .values()
        .filter(|e| e.is_terminal())
        .map(|e| (e.seq, e.id.clone()))
        .collect();
    if finished.len() <= keep {
        return 0;
    }
    finished.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    let stale = finished.split_off(keep);
    for (_, id) in &stale {
        map.remove(id);
    }
    stale.len()
}

impl Inner {
    /// Broadcast cancellation to every task started for the batch.
    fn halt(&self, entry: &BatchEntry) {
        entry.token.cancel();
        for task in entry.tasks() {
            // NotFound only means the task finished long ago.
            let _ = self.supervisor.cancel(&task);
        }
    }
}
