mod kinds;
pub use kinds::{BatchStatus, FileStatus, Priority, SourceType};

mod options;
pub use options::ProbeOptions;

mod request;
pub use request::{BatchFile, BatchRequest};

mod result;
pub use result::{BatchCounts, BatchResult, BatchSnapshot, BatchSummary};

/// Identifier of a submitted batch.
pub type BatchId = String;
