//! Passive data types shared by the supervisor, the batch layer and external adapters.
//!
//! Nothing in here has behaviour beyond construction, classification and serde.
//! The enum spellings are part of the external contract and must round-trip unchanged.

mod domain;
pub use domain::*;

mod batch;
pub use batch::*;

mod error;
pub use error::ModelError;

pub mod time_serde;

pub mod serde_ms;

/// Timeout value in milliseconds.
pub type TimeoutMs = u64;
