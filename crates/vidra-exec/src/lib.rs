//! Subprocess-backed probe executor.
//!
//! [`CommandProbe`] runs an ffprobe-style tool per file and parses its JSON output.
//! The child is killed when the owning task is cancelled or the per-file timeout elapses.

mod error;
pub use error::ExecError;

pub mod limits;
pub use limits::ProbeLimits;

mod util;

mod probe;
pub use probe::CommandProbe;
