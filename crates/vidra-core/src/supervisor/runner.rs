use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use tokio::sync::{OwnedSemaphorePermit, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vidra_model::{TaskExit, TaskId, TaskStatus};

use crate::{TaskConfig, WorkError, WorkRef, supervisor::Shared};

/// Supervised execution loop of one task.
pub(crate) struct Runner {
    pub shared: Arc<Shared>,
    pub id: TaskId,
    pub config: TaskConfig,
    pub work: WorkRef,
    pub token: CancellationToken,
    pub done: watch::Sender<bool>,
    pub permit: OwnedSemaphorePermit,
}

struct Outcome {
    status: TaskStatus,
    attempts: u32,
    succeeded: bool,
    last_error: Option<String>,
}

impl Runner {
    pub async fn run(self) {
        self.shared.registry.set_status(&self.id, TaskStatus::Running);
        let outcome = self.supervise().await;
        self.finish(outcome);
    }

    async fn supervise(&self) -> Outcome {
        let registry = &self.shared.registry;
        let mut outcome = Outcome {
            status: TaskStatus::Stopped,
            attempts: 0,
            succeeded: false,
            last_error: None,
        };
        let mut failures: u32 = 0;

        loop {
            if self.token.is_cancelled() {
                debug!(task = %self.id, "cancellation observed before attempt");
                return outcome;
            }

            outcome.attempts = registry.begin_attempt(&self.id);
            let result = self.attempt().await;

            let err = match result {
                Ok(()) => {
                    outcome.succeeded = true;
                    return outcome;
                }
                Err(err) => err,
            };

            outcome.last_error = Some(err.to_string());
            if self.token.is_cancelled() {
                debug!(task = %self.id, reason = %err, "attempt ended after cancellation");
                return outcome;
            }

            if err.is_panic() {
                error!(task = %self.id, attempt = outcome.attempts, reason = %err, "unit of work panicked");
            } else {
                warn!(task = %self.id, attempt = outcome.attempts, reason = %err, "attempt failed");
            }
            registry.record_error(&self.id, err.to_string());
            if let Some(hook) = &self.config.on_error {
                guarded("on_error", &self.id, || hook(&self.id, &err));
            }

            failures += 1;
            if failures > self.config.max_retries {
                error!(
                    task = %self.id,
                    attempts = outcome.attempts,
                    reason = %err,
                    "retries exhausted"
                );
                outcome.status = TaskStatus::Error;
                return outcome;
            }

            debug!(
                task = %self.id,
                attempt = outcome.attempts,
                delay_ms = self.config.retry_delay.as_millis() as u64,
                "retry scheduled after failure"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_delay) => {}
                _ = self.token.cancelled() => {
                    debug!(task = %self.id, "cancelled during retry delay");
                    return outcome;
                }
            }
        }
    }

    /// Run one attempt behind the crash boundary.
    async fn attempt(&self) -> Result<(), WorkError> {
        let work = Arc::clone(&self.work);
        let ctx = self.token.clone();

        let fut = match panic::catch_unwind(AssertUnwindSafe(|| work.run(ctx))) {
            Ok(fut) => fut,
            Err(payload) => return Err(WorkError::panicked(panic_message(payload.as_ref()))),
        };

        match tokio::spawn(fut).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let payload = e.into_panic();
                Err(WorkError::panicked(panic_message(payload.as_ref())))
            }
            Err(e) => Err(WorkError::fail(format!("attempt aborted: {e}"))),
        }
    }

    /// Cleanup shared by every exit path: callback, removal, slot release, completion signal.
    fn finish(self, outcome: Outcome) {
        let Runner {
            shared,
            id,
            config,
            token,
            done,
            permit,
            ..
        } = self;

        match outcome.status {
            TaskStatus::Error => {}
            _ if outcome.succeeded => info!(task = %id, attempts = outcome.attempts, "task completed"),
            _ => info!(task = %id, attempts = outcome.attempts, "task stopped"),
        }

        if let Some(on_exit) = config.on_exit {
            let exit = TaskExit {
                id: id.clone(),
                name: config.name,
                status: outcome.status,
                attempts: outcome.attempts,
                succeeded: outcome.succeeded,
                last_error: outcome.last_error.clone(),
            };
            guarded("on_exit", &id, || on_exit(exit));
        }

        shared.registry.finish(&id, outcome.status, outcome.last_error);
        token.cancel();
        drop(permit);
        done.send_replace(true);
    }
}

/// Run a caller hook so that a panic inside it cannot take the runner down.
fn guarded<F: FnOnce()>(hook: &'static str, id: &TaskId, f: F) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        error!(task = %id, hook, reason = %panic_message(payload.as_ref()), "task hook panicked");
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_from_str_and_string() {
        let payload: Box<dyn Any + Send> = Box::new("static boom");
        assert_eq!(panic_message(payload.as_ref()), "static boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");

        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
