use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use vidra_model::{
    BatchCounts, BatchId, BatchRequest, BatchResult, BatchSnapshot, BatchStatus, BatchSummary,
    FileStatus, Priority, TaskExit, TaskId, TaskStatus,
};

use crate::{FailurePolicy, validate::truncate_error};

/// Live state of one submitted batch.
///
/// The per-file table is the only source of truth; counts and progress are derived from it.
/// A file result is written terminal exactly once; later writers lose.
pub(crate) struct BatchEntry {
    pub id: BatchId,
    /// Submission order, used for newest-first listing.
    pub seq: u64,
    pub priority: Priority,
    pub created_at: SystemTime,
    /// Parent scope of every file task of this batch.
    pub token: CancellationToken,
    state: Mutex<BatchState>,
    /// Files not yet terminal.
    open: watch::Sender<usize>,
    done: watch::Sender<bool>,
}

struct BatchState {
    status: BatchStatus,
    started_at: Option<SystemTime>,
    completed_at: Option<SystemTime>,
    results: Vec<BatchResult>,
    tasks: Vec<TaskId>,
}

impl BatchEntry {
    pub fn new(id: BatchId, seq: u64, req: &BatchRequest) -> Self {
        let results = req.files.iter().map(|f| BatchResult::pending(&f.id)).collect();
        Self {
            id,
            seq,
            priority: req.priority,
            created_at: SystemTime::now(),
            token: CancellationToken::new(),
            state: Mutex::new(BatchState {
                status: BatchStatus::Pending,
                started_at: None,
                completed_at: None,
                results,
                tasks: Vec::new(),
            }),
            open: watch::Sender::new(req.files.len()),
            done: watch::Sender::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> BatchStatus {
        self.lock().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn mark_queued(&self) {
        let mut st = self.lock();
        if st.status == BatchStatus::Pending {
            st.status = BatchStatus::Queued;
        }
    }

    pub fn track(&self, task: TaskId) {
        self.lock().tasks.push(task);
    }

    pub fn tasks(&self) -> Vec<TaskId> {
        self.lock().tasks.clone()
    }

    /// An attempt for `slot` is about to run.
    pub fn begin_file(&self, slot: usize) {
        let now = SystemTime::now();
        let mut st = self.lock();
        if st.status.is_terminal() {
            return;
        }
        if st.status != BatchStatus::Processing {
            st.status = BatchStatus::Processing;
            st.started_at.get_or_insert(now);
        }
        if let Some(r) = st.results.get_mut(slot)
            && r.status == FileStatus::Pending
        {
            r.status = FileStatus::Processing;
            r.started_at = Some(now);
        }
    }

    pub fn complete_file(&self, slot: usize, analysis_id: String) -> bool {
        let mut st = self.lock();
        let settled = self.settle_locked(&mut st, slot, FileStatus::Completed, None);
        if settled && let Some(r) = st.results.get_mut(slot) {
            r.analysis_id = Some(analysis_id);
        }
        settled
    }

    pub fn skip_file(&self, slot: usize) -> bool {
        let mut st = self.lock();
        self.settle_locked(&mut st, slot, FileStatus::Skipped, None)
    }

    /// Final word from the supervisor on the file task.
    ///
    /// A task that exhausted its retries fails the file; any other exit
    /// that left the file open means it was cut short.
    pub fn settle(&self, slot: usize, exit: &TaskExit) -> Option<FileStatus> {
        let (status, error) = match exit.status {
            TaskStatus::Error => {
                let reason = exit.last_error.as_deref().unwrap_or("task failed");
                (FileStatus::Failed, Some(truncate_error(reason)))
            }
            _ => (FileStatus::Cancelled, None),
        };
        let mut st = self.lock();
        self.settle_locked(&mut st, slot, status, error)
            .then_some(status)
    }

    fn settle_locked(
        &self,
        st: &mut BatchState,
        slot: usize,
        status: FileStatus,
        error: Option<String>,
    ) -> bool {
        let Some(r) = st.results.get_mut(slot) else {
            return false;
        };
        if r.status.is_terminal() {
            return false;
        }
        let now = SystemTime::now();
        r.status = status;
        r.error = error;
        r.completed_at = Some(now);
        r.processing_time_ms = r
            .started_at
            .and_then(|s| now.duration_since(s).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.open.send_modify(|n| *n = n.saturating_sub(1));
        true
    }

    /// End the batch early with `status`; every open file becomes `cancelled`.
    ///
    /// Returns `false` when the batch is already terminal or has no open files left.
    pub fn abort(&self, status: BatchStatus) -> bool {
        let mut st = self.lock();
        if st.status.is_terminal() || *self.open.borrow() == 0 {
            return false;
        }
        for slot in 0..st.results.len() {
            self.settle_locked(&mut st, slot, FileStatus::Cancelled, None);
        }
        self.close_locked(&mut st, status);
        true
    }

    /// Resolve the final status of a batch whose files are all terminal.
    ///
    /// Files cancelled from outside the batch (supervisor shutdown) make it `cancelled`;
    /// otherwise `policy` decides.
    pub fn close(&self, policy: FailurePolicy) -> BatchStatus {
        let mut st = self.lock();
        if !st.status.is_terminal() {
            let counts = BatchCounts::from_results(&st.results);
            let status = if counts.cancelled > 0 {
                BatchStatus::Cancelled
            } else {
                policy.resolve(&counts)
            };
            self.close_locked(&mut st, status);
        }
        st.status
    }

    fn close_locked(&self, st: &mut BatchState, status: BatchStatus) {
        st.status = status;
        st.completed_at = Some(SystemTime::now());
        self.done.send_replace(true);
    }

    /// Resolves once no file is left open.
    pub async fn settled(&self) {
        let mut rx = self.open.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Resolves once the batch is terminal.
    pub async fn finished(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|d| *d).await;
    }

    pub fn summary(&self) -> BatchSummary {
        let st = self.lock();
        self.summary_locked(&st)
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        let st = self.lock();
        BatchSnapshot {
            summary: self.summary_locked(&st),
            results: st.results.clone(),
        }
    }

    fn summary_locked(&self, st: &BatchState) -> BatchSummary {
        let counts = BatchCounts::from_results(&st.results);
        BatchSummary {
            id: self.id.clone(),
            status: st.status,
            priority: self.priority,
            counts,
            progress: counts.progress(),
            created_at: self.created_at,
            started_at: st.started_at,
            completed_at: st.completed_at,
        }
    }
}
