use thiserror::Error;
use vidra_core::CoreError;
use vidra_model::BatchId;

use crate::ValidationError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("invalid batch: {0}")]
    Validation(#[from] ValidationError),

    #[error("batch not found: {0}")]
    NotFound(BatchId),

    #[error("supervisor error: {0}")]
    Core(#[from] CoreError),
}
