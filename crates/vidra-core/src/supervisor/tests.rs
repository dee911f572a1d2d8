use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vidra_model::{TaskExit, TaskId, TaskQuery, TaskStatus};

use crate::{CoreError, Supervisor, SupervisorConfig, TaskConfig, WorkError, WorkFn, WorkRef};

fn supervisor(max_tasks: usize) -> Supervisor {
    Supervisor::new(
        SupervisorConfig::default()
            .with_max_tasks(max_tasks)
            .with_shutdown_timeout(Duration::from_secs(5)),
    )
    .unwrap()
}

/// Work that parks until cancelled.
fn idle_work() -> WorkRef {
    WorkFn::arc(|ctx: CancellationToken| async move {
        ctx.cancelled().await;
        Err(WorkError::Canceled)
    })
}

fn failing_work(calls: Arc<AtomicU32>) -> WorkRef {
    WorkFn::arc(move |_ctx| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(WorkError::fail("probe exited with status 1"))
        }
    })
}

async fn explode(reason: &'static str) -> Result<(), WorkError> {
    panic!("{reason}")
}

/// Config whose exit is reported on `tx`.
fn reporting(name: &str, tx: &mpsc::UnboundedSender<TaskExit>) -> TaskConfig {
    let tx = tx.clone();
    TaskConfig::new(name)
        .with_retry_delay(Duration::from_millis(1))
        .on_exit(move |exit| {
            let _ = tx.send(exit);
        })
}

async fn eventually<F: Fn() -> bool>(cond: F) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[test]
fn zero_capacity_is_rejected() {
    let res = Supervisor::new(SupervisorConfig::default().with_max_tasks(0));
    assert!(matches!(res, Err(CoreError::InvalidConfig(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn successful_work_ends_stopped_and_is_removed() {
    let sup = supervisor(4);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let id = sup
        .start(reporting("ok", &tx), WorkFn::arc(|_ctx| async { Ok(()) }))
        .unwrap();
    assert!(id.as_str().starts_with("ok-"));

    let exit = rx.recv().await.unwrap();
    assert_eq!(exit.id, id);
    assert_eq!(exit.status, TaskStatus::Stopped);
    assert!(exit.succeeded);
    assert_eq!(exit.attempts, 1);

    eventually(|| sup.get_status().total == 0 && sup.available() == 4).await;
    assert!(sup.get_task(&id).is_none());
    assert!(sup.health_check().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ids_are_unique_for_the_same_name() {
    let sup = supervisor(8);
    let a = sup.start(TaskConfig::new("probe"), idle_work()).unwrap();
    let b = sup.start(TaskConfig::new("probe"), idle_work()).unwrap();
    assert_ne!(a, b);
    sup.stop_all().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn live_count_never_exceeds_capacity() {
    let sup = supervisor(3);

    let mut handles = Vec::new();
    for i in 0..10 {
        let sup = sup.clone();
        handles.push(tokio::spawn(async move {
            sup.start(TaskConfig::new(format!("t{i}")), idle_work())
        }));
    }

    let mut started = 0;
    let mut rejected = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => started += 1,
            Err(CoreError::CapacityExceeded { max }) => {
                assert_eq!(max, 3);
                rejected += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(started, 3);
    assert_eq!(rejected, 7);
    let status = sup.get_status();
    assert_eq!(status.total, 3);
    assert_eq!(status.max, 3);
    assert_eq!(status.available, 0);

    sup.stop_all().await.unwrap();
    assert_eq!(sup.get_status().total, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_start_waits_for_a_free_slot() {
    let sup = supervisor(1);
    let first = sup.start(TaskConfig::new("first"), idle_work()).unwrap();

    let queued = {
        let sup = sup.clone();
        tokio::spawn(async move { sup.start_queued(TaskConfig::new("second"), idle_work()).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!queued.is_finished());
    assert_eq!(sup.get_status().total, 1);

    sup.stop(&first).await.unwrap();
    let second = queued.await.unwrap().unwrap();
    assert!(sup.get_task(&second).is_some());

    sup.stop_all().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_start_gives_up_when_parent_is_cancelled() {
    let sup = supervisor(1);
    sup.start(TaskConfig::new("hog"), idle_work()).unwrap();

    let parent = CancellationToken::new();
    let queued = {
        let sup = sup.clone();
        let cfg = TaskConfig::new("waiter").with_parent(parent.clone());
        tokio::spawn(async move { sup.start_queued(cfg, idle_work()).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    parent.cancel();
    assert_eq!(queued.await.unwrap(), Err(CoreError::Canceled));

    sup.stop_all().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_work_makes_ceiling_plus_one_attempts() {
    let sup = supervisor(4);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let calls = Arc::new(AtomicU32::new(0));
    let reported = Arc::new(AtomicU32::new(0));

    let cfg = {
        let reported = Arc::clone(&reported);
        reporting("always-fails", &tx)
            .with_max_retries(2)
            .on_error(move |_id, err| {
                assert!(!err.is_panic());
                reported.fetch_add(1, Ordering::SeqCst);
            })
    };
    let id = sup.start(cfg, failing_work(Arc::clone(&calls))).unwrap();

    let exit = rx.recv().await.unwrap();
    assert_eq!(exit.status, TaskStatus::Error);
    assert_eq!(exit.attempts, 3);
    assert!(!exit.succeeded);
    assert_eq!(exit.last_error.as_deref(), Some("probe exited with status 1"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(reported.load(Ordering::SeqCst), 3);

    let report = sup.health_check().unwrap_err();
    assert_eq!(report.failed_ids(), vec![&id]);
    assert_eq!(sup.failures().len(), 1);
    assert_eq!(sup.clear_failures().len(), 1);
    assert!(sup.health_check().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn default_ceiling_is_three_retries() {
    let sup = supervisor(4);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let calls = Arc::new(AtomicU32::new(0));

    sup.start(reporting("default", &tx), failing_work(Arc::clone(&calls)))
        .unwrap();

    let exit = rx.recv().await.unwrap();
    assert_eq!(exit.status, TaskStatus::Error);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recovers_after_transient_failures() {
    let sup = supervisor(4);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let calls = Arc::new(AtomicU32::new(0));

    let work = {
        let calls = Arc::clone(&calls);
        WorkFn::arc(move |_ctx| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(WorkError::fail("flaky"))
                } else {
                    Ok(())
                }
            }
        })
    };
    sup.start(reporting("flaky", &tx), work).unwrap();

    let exit = rx.recv().await.unwrap();
    assert_eq!(exit.status, TaskStatus::Stopped);
    assert!(exit.succeeded);
    assert_eq!(exit.attempts, 3);
    assert!(sup.failures().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panics_never_take_down_the_supervisor() {
    let sup = supervisor(200);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut ids = HashSet::new();
    for i in 0..100 {
        let cfg = reporting(&format!("panicky-{i}"), &tx).with_max_retries(0);
        ids.insert(sup.start(cfg, WorkFn::arc(|_ctx| explode("boom"))).unwrap());
    }

    for _ in 0..100 {
        let exit = rx.recv().await.unwrap();
        assert_eq!(exit.status, TaskStatus::Error);
        assert_eq!(exit.last_error.as_deref(), Some("panicked: boom"));
    }

    eventually(|| sup.get_status().total == 0 && sup.available() == 200).await;
    assert_eq!(sup.get_status().active, 0);

    let report = sup.health_check().unwrap_err();
    let failed: HashSet<TaskId> = report.failed_ids().into_iter().cloned().collect();
    assert_eq!(failed, ids);

    // Still fully usable.
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    sup.start(reporting("after", &tx2), WorkFn::arc(|_ctx| async { Ok(()) }))
        .unwrap();
    assert!(rx2.recv().await.unwrap().succeeded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panic_while_building_the_future_is_caught() {
    let sup = supervisor(2);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let work = WorkFn::arc(|_ctx| -> std::future::Ready<Result<(), WorkError>> {
        panic!("constructor failed")
    });
    sup.start(reporting("ctor", &tx).with_max_retries(0), work)
        .unwrap();

    let exit = rx.recv().await.unwrap();
    assert_eq!(exit.status, TaskStatus::Error);
    assert_eq!(exit.last_error.as_deref(), Some("panicked: constructor failed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_hook_does_not_leak_the_task() {
    let sup = supervisor(2);
    let cfg = TaskConfig::new("bad-hook")
        .with_max_retries(0)
        .on_error(|_id, _err| panic!("hook exploded"));

    sup.start(cfg, WorkFn::arc(|_ctx| async { Err(WorkError::fail("nope")) }))
        .unwrap();

    eventually(|| sup.get_status().total == 0).await;
    assert_eq!(sup.failures().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_is_idempotent() {
    let sup = supervisor(2);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = sup.start(reporting("idle", &tx), idle_work()).unwrap();

    eventually(|| sup.get_task(&id).is_some_and(|t| t.status == TaskStatus::Running)).await;
    sup.stop(&id).await.unwrap();
    assert!(sup.get_task(&id).is_none());
    sup.stop(&id).await.unwrap();
    sup.cancel(&id).unwrap();

    let exit = rx.recv().await.unwrap();
    assert_eq!(exit.status, TaskStatus::Stopped);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_is_idempotent_with_smallest_history() {
    let res = Supervisor::new(SupervisorConfig::default().with_history_limit(0));
    assert!(matches!(res, Err(CoreError::InvalidConfig(_))));

    let sup = Supervisor::new(
        SupervisorConfig::default()
            .with_max_tasks(2)
            .with_history_limit(1)
            .with_shutdown_timeout(Duration::from_secs(5)),
    )
    .unwrap();
    let id = sup.start(TaskConfig::new("idle"), idle_work()).unwrap();

    eventually(|| sup.get_task(&id).is_some_and(|t| t.status == TaskStatus::Running)).await;
    sup.stop(&id).await.unwrap();
    sup.stop(&id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_unknown_task_is_not_found() {
    let sup = supervisor(2);
    let missing = TaskId::from("nope-0-0");
    assert_eq!(sup.stop(&missing).await, Err(CoreError::NotFound(missing.clone())));
    assert_eq!(sup.cancel(&missing), Err(CoreError::NotFound(missing)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_times_out_on_work_that_ignores_cancellation() {
    let sup = Supervisor::new(
        SupervisorConfig::default()
            .with_max_tasks(2)
            .with_shutdown_timeout(Duration::from_millis(50)),
    )
    .unwrap();

    let stubborn = WorkFn::arc(|_ctx| async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(())
    });
    let id = sup.start(TaskConfig::new("stubborn"), stubborn).unwrap();
    eventually(|| sup.get_task(&id).is_some_and(|t| t.attempts == 1)).await;

    let err = sup.stop(&id).await.unwrap_err();
    assert!(matches!(err, CoreError::Timeout { stragglers: 1, .. }));
    assert_eq!(sup.get_task(&id).unwrap().status, TaskStatus::Stopping);

    let err = sup.stop_all().await.unwrap_err();
    assert!(matches!(err, CoreError::Timeout { stragglers: 1, .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_all_interrupts_retry_delays() {
    let sup = supervisor(16);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut ids = Vec::new();
    for i in 0..10 {
        let cfg = reporting(&format!("retrying-{i}"), &tx).with_retry_delay(Duration::from_secs(60));
        ids.push(sup.start(cfg, failing_work(Arc::new(AtomicU32::new(0)))).unwrap());
    }
    eventually(|| {
        ids.iter()
            .all(|id| sup.get_task(id).is_some_and(|t| t.last_error.is_some()))
    })
    .await;

    let started = Instant::now();
    sup.stop_all().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    for _ in 0..10 {
        let exit = rx.recv().await.unwrap();
        assert_eq!(exit.status, TaskStatus::Stopped);
        assert_eq!(exit.attempts, 1);
    }
    assert!(sup.failures().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parent_scope_cancels_the_task() {
    let sup = supervisor(2);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let parent = CancellationToken::new();

    sup.start(reporting("child", &tx).with_parent(parent.clone()), idle_work())
        .unwrap();
    parent.cancel();

    let exit = rx.recv().await.unwrap();
    assert_eq!(exit.status, TaskStatus::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_closes_admission() {
    let sup = supervisor(2);
    sup.start(TaskConfig::new("idle"), idle_work()).unwrap();

    sup.shutdown().await.unwrap();
    assert!(sup.is_shutting_down());
    assert_eq!(
        sup.start(TaskConfig::new("late"), idle_work()),
        Err(CoreError::ShuttingDown)
    );
    assert_eq!(
        sup.start_queued(TaskConfig::new("late"), idle_work()).await,
        Err(CoreError::ShuttingDown)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn health_probe_failures_are_reported() {
    let sup = supervisor(2);
    let id = sup
        .start(
            TaskConfig::new("sick").with_health(|| Err("no frames decoded".to_string())),
            idle_work(),
        )
        .unwrap();
    sup.start(TaskConfig::new("fine").with_health(|| Ok(())), idle_work())
        .unwrap();

    let report = sup.health_check().unwrap_err();
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].id, id);
    assert_eq!(report.issues[0].reason, "no frames decoded");
    assert!(report.failed_ids().is_empty());

    sup.stop_all().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn status_and_query_reflect_running_tasks() {
    let sup = supervisor(4);
    for name in ["probe", "probe", "thumb"] {
        sup.start(TaskConfig::new(name), idle_work()).unwrap();
    }
    eventually(|| sup.get_status().active == 3).await;

    let status = sup.get_status();
    assert_eq!(status.total, 3);
    assert_eq!(status.available, 1);
    assert!(status.tasks.iter().all(|t| t.status == TaskStatus::Running));

    let page = sup.query(&TaskQuery::new().with_name("probe"));
    assert_eq!(page.total, 2);

    sup.stop_all().await.unwrap();
}
