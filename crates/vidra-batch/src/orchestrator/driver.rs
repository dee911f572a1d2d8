use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vidra_core::{CoreError, TaskConfig, WorkError, WorkFn, WorkRef};
use vidra_model::{BatchFile, BatchRequest, BatchStatus, ProbeOptions};

use super::{Inner, batch::BatchEntry};
use crate::{AnalysisRecord, ProbeError, validate::validate_results};

/// Background lifecycle of one batch: dispatch, wait, resolve.
pub(super) async fn drive(inner: Arc<Inner>, entry: Arc<BatchEntry>, req: BatchRequest) {
    let workers = inner
        .cfg
        .effective_concurrency(req.concurrency, inner.supervisor.available());
    debug!(batch = %entry.id, workers, "dispatching files");

    let run = async {
        dispatch(&inner, &entry, &req, workers).await;
        entry.settled().await;
    };

    match req.timeout_ms {
        Some(ms) => {
            if tokio::time::timeout(Duration::from_millis(ms), run).await.is_err()
                && entry.abort(BatchStatus::Timeout)
            {
                warn!(batch = %entry.id, timeout_ms = ms, "batch timed out");
            }
        }
        None => run.await,
    }
    inner.halt(&entry);

    let status = entry.close(inner.cfg.failure_policy);
    let snapshot = entry.snapshot();
    if let Err(e) = validate_results(&snapshot.results) {
        warn!(batch = %entry.id, reason = %e, "finished batch holds inconsistent results");
    }
    info!(
        batch = %entry.id,
        status = %status,
        completed = snapshot.summary.counts.completed,
        failed = snapshot.summary.counts.failed,
        cancelled = snapshot.summary.counts.cancelled,
        "batch finished"
    );
}

/// Offer each file a worker slot in submission order.
async fn dispatch(inner: &Arc<Inner>, entry: &Arc<BatchEntry>, req: &BatchRequest, workers: usize) {
    let slots = Arc::new(Semaphore::new(workers));

    for (slot, file) in req.files.iter().enumerate() {
        let permit = tokio::select! {
            biased;
            _ = entry.token.cancelled() => return,
            permit = Arc::clone(&slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let settle = Arc::clone(entry);
        let file_id = file.id.clone();
        let config = TaskConfig::new(format!("{}:{}", entry.id, file.id))
            .with_parent(entry.token.clone())
            .with_max_retries(inner.cfg.task_max_retries)
            .with_retry_delay(inner.cfg.task_retry_delay)
            .on_exit(move |exit| {
                if let Some(status) = settle.settle(slot, &exit) {
                    debug!(batch = %settle.id, file = %file_id, status = %status, "file settled");
                }
                drop(permit);
            });

        let work = file_work(inner, entry, slot, file, req.options.as_ref());
        match inner.supervisor.start_queued(config, work).await {
            Ok(task) => entry.track(task),
            Err(CoreError::Canceled) => return,
            Err(err) => {
                warn!(batch = %entry.id, file = %file.id, reason = %err, "file could not be scheduled");
                entry.abort(BatchStatus::Cancelled);
                return;
            }
        }
    }
}

/// Everything one file task needs, shared by all of its attempts.
struct FileJob {
    entry: Arc<BatchEntry>,
    slot: usize,
    file: BatchFile,
    options: ProbeOptions,
    inner: Arc<Inner>,
}

fn file_work(
    inner: &Arc<Inner>,
    entry: &Arc<BatchEntry>,
    slot: usize,
    file: &BatchFile,
    global: Option<&ProbeOptions>,
) -> WorkRef {
    let job = Arc::new(FileJob {
        entry: Arc::clone(entry),
        slot,
        file: file.clone(),
        options: file.effective_options(global),
        inner: Arc::clone(inner),
    });
    WorkFn::arc(move |ctx| {
        let job = Arc::clone(&job);
        async move { job.run(ctx).await }
    })
}

impl FileJob {
    /// Probe, persist, record.
    async fn run(&self, ctx: CancellationToken) -> Result<(), WorkError> {
        self.entry.begin_file(self.slot);

        let probe = self.inner.probe.analyze(
            &self.file.path,
            self.file.source_type,
            &self.options,
            ctx.clone(),
        );
        let report = match probe.await {
            Ok(report) => report,
            Err(ProbeError::Canceled) => return Err(WorkError::Canceled),
            Err(ProbeError::Unsupported(reason)) => {
                if self.entry.skip_file(self.slot) {
                    info!(batch = %self.entry.id, file = %self.file.id, %reason, "file skipped");
                }
                return Ok(());
            }
            Err(e) => return Err(WorkError::fail(e)),
        };

        if ctx.is_cancelled() {
            return Err(WorkError::Canceled);
        }

        let record = AnalysisRecord {
            batch_id: self.entry.id.clone(),
            file_id: self.file.id.clone(),
            path: self.file.path.clone(),
            source_type: self.file.source_type,
            metadata: self.file.metadata.clone(),
            report,
            created_at: SystemTime::now(),
        };
        let analysis_id = self
            .inner
            .repo
            .persist(record)
            .await
            .map_err(WorkError::fail)?;

        self.entry.complete_file(self.slot, analysis_id);
        Ok(())
    }
}
