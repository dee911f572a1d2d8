use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::SystemTime,
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use vidra_model::{FailedTask, TaskId, TaskInfo, TaskPage, TaskQuery, TaskStatus};

use crate::{HealthHook, record::TaskRecord};

/// In-memory registry of live tasks.
///
/// Every mutation happens under one write lock, and the live count published on
/// the watch channel is always `tasks.len()` as of that mutation.
pub(crate) struct Registry {
    inner: RwLock<RegistryInner>,
    live: watch::Sender<usize>,
}

struct RegistryInner {
    tasks: HashMap<TaskId, TaskRecord>,
    /// Recently finished ids, oldest first.
    finished: VecDeque<TaskId>,
    finished_set: HashSet<TaskId>,
    failures: VecDeque<FailedTask>,
    history_limit: usize,
}

impl Registry {
    pub fn new(history_limit: usize) -> Self {
        let (live, _) = watch::channel(0);
        Self {
            inner: RwLock::new(RegistryInner {
                tasks: HashMap::new(),
                finished: VecDeque::new(),
                finished_set: HashSet::new(),
                failures: VecDeque::new(),
                history_limit,
            }),
            live,
        }
    }

    // A panic inside a unit of work never runs under this lock, so a poisoned guard still holds consistent data.
    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, record: TaskRecord) {
        let mut inner = self.write();
        inner.tasks.insert(record.id.clone(), record);
        self.live.send_replace(inner.tasks.len());
    }

    /// Move a task forward in its lifecycle. Returns `false` for unknown ids and backward moves.
    pub fn set_status(&self, id: &TaskId, status: TaskStatus) -> bool {
        let mut inner = self.write();
        inner
            .tasks
            .get_mut(id)
            .is_some_and(|rec| rec.transition(status))
    }

    /// Count a new attempt; returns its 1-based number.
    pub fn begin_attempt(&self, id: &TaskId) -> u32 {
        let mut inner = self.write();
        match inner.tasks.get_mut(id) {
            Some(rec) => {
                rec.attempts += 1;
                rec.attempts
            }
            None => 0,
        }
    }

    pub fn record_error(&self, id: &TaskId, error: String) {
        let mut inner = self.write();
        if let Some(rec) = inner.tasks.get_mut(id) {
            rec.last_error = Some(error);
        }
    }

    /// Flag a live task as `STOPPING` and hand back what is needed to cancel and await it.
    pub fn mark_stopping(&self, id: &TaskId) -> Option<(CancellationToken, watch::Receiver<bool>)> {
        let mut inner = self.write();
        let rec = inner.tasks.get_mut(id)?;
        rec.transition(TaskStatus::Stopping);
        Some((rec.cancel.clone(), rec.done.clone()))
    }

    /// Flag every live task as `STOPPING` and cancel it. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let mut inner = self.write();
        for rec in inner.tasks.values_mut() {
            rec.transition(TaskStatus::Stopping);
            rec.cancel.cancel();
        }
        inner.tasks.len()
    }

    /// Drop a task that reached `status`, remembering it in the history.
    pub fn finish(&self, id: &TaskId, status: TaskStatus, last_error: Option<String>) {
        let mut inner = self.write();
        let Some(rec) = inner.tasks.remove(id) else {
            return;
        };
        self.live.send_replace(inner.tasks.len());

        let limit = inner.history_limit;
        if status == TaskStatus::Error {
            inner.failures.push_back(FailedTask {
                id: rec.id.clone(),
                name: rec.name,
                error: last_error.unwrap_or_else(|| "unknown error".to_string()),
                failed_at: SystemTime::now(),
            });
            while inner.failures.len() > limit {
                inner.failures.pop_front();
            }
        }

        inner.finished_set.insert(rec.id.clone());
        inner.finished.push_back(rec.id);
        while inner.finished.len() > limit {
            if let Some(old) = inner.finished.pop_front() {
                inner.finished_set.remove(&old);
            }
        }
    }

    pub fn was_finished(&self, id: &TaskId) -> bool {
        self.read().finished_set.contains(id)
    }

    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.live.subscribe()
    }

    pub fn len(&self) -> usize {
        self.read().tasks.len()
    }

    pub fn get(&self, id: &TaskId) -> Option<TaskInfo> {
        self.read().tasks.get(id).map(TaskRecord::info)
    }

    pub fn list_all(&self) -> Vec<TaskInfo> {
        let inner = self.read();
        let mut items: Vec<TaskInfo> = inner.tasks.values().map(TaskRecord::info).collect();
        items.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        items
    }

    /// Filter by name/status and paginate inside a single read lock.
    pub fn query(&self, q: &TaskQuery) -> TaskPage<TaskInfo> {
        let inner = self.read();

        let mut matches: Vec<&TaskRecord> = inner
            .tasks
            .values()
            .filter(|rec| q.matches(&rec.name, rec.status))
            .collect();
        matches.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));

        let page = q.page(matches);
        TaskPage {
            items: page.items.into_iter().map(TaskRecord::info).collect(),
            total: page.total,
        }
    }

    pub fn failures(&self) -> Vec<FailedTask> {
        self.read().failures.iter().cloned().collect()
    }

    pub fn clear_failures(&self) -> Vec<FailedTask> {
        self.write().failures.drain(..).collect()
    }

    /// Health probes of live tasks, collected so they can run outside the lock.
    pub fn health_probes(&self) -> Vec<(TaskId, String, TaskStatus, HealthHook)> {
        self.read()
            .tasks
            .values()
            .filter_map(|rec| {
                rec.health
                    .as_ref()
                    .map(|h| (rec.id.clone(), rec.name.clone(), rec.status, h.clone()))
            })
            .collect()
    }
}
