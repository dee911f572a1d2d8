//! Batch admission and orchestration on top of [`vidra_core::Supervisor`].
//!
//! - [`validate`]: side-effect-free admission rules.
//! - [`BatchOrchestrator`]: fans a validated batch out as one supervised task per file.
//! - [`ProbeExecutor`] / [`ResultRepository`]: the collaborators each file task calls.

pub mod validate;
pub use validate::ValidationError;

mod error;
pub use error::BatchError;

mod config;
pub use config::{FailurePolicy, OrchestratorConfig};

mod ports;
pub use ports::{AnalysisRecord, ProbeError, ProbeExecutor, ProbeReport, RepositoryError, ResultRepository};

mod memory;
pub use memory::MemoryRepository;

mod orchestrator;
pub use orchestrator::BatchOrchestrator;
