//! Logging bootstrap shared by every binary of the workspace.

mod logger;
pub use logger::*;
