use thiserror::Error;
use vidra_batch::ProbeError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("missing program")]
    MissingProgram,
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("non-zero exit code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },
    #[error("killed by signal: {stderr}")]
    KilledBySignal { stderr: String },
    #[error("io error: {0}")]
    Io(String),
    #[error("timed out after {0}ms")]
    Timeout(u64),
    #[error("cancelled")]
    Cancelled,
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}

impl From<ExecError> for ProbeError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Cancelled => ProbeError::Canceled,
            ExecError::Timeout(ms) => ProbeError::Timeout(ms),
            other => ProbeError::Failed(other.to_string()),
        }
    }
}
