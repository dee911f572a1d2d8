//! Task supervision core.
//!
//! [`Supervisor`] runs units of work ([`Work`]) under a hard concurrency ceiling,
//! retries failed attempts, isolates panics, and stops everything within a bounded time.

mod error;
pub use error::{CoreError, HealthIssue, HealthReport, WorkError};

mod config;
pub use config::{ErrorHook, ExitHook, HealthHook, SupervisorConfig, TaskConfig};

mod work;
pub use work::{BoxWorkFuture, Work, WorkFn, WorkRef};

mod record;

mod state;

pub mod supervisor;
pub use supervisor::Supervisor;

pub use tokio_util::sync::CancellationToken;
