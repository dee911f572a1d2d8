//! rlimits applied to probe children.
//!
//! On Unix the limits are set in a `pre_exec` hook, after `fork()` and before `execve()`,
//! so the tool never runs unrestricted. Elsewhere they are ignored with a warning.

use tokio::process::Command;
#[cfg(not(unix))]
use tracing::warn;

/// Resource ceilings for one probe process.
///
/// Malformed media can make inspection tools crash or write large dumps,
/// so core dumps are off unless asked for.
#[derive(Debug, Clone)]
pub struct ProbeLimits {
    /// `RLIMIT_NOFILE`.
    pub max_open_files: Option<u64>,
    /// `RLIMIT_FSIZE`; exceeding it terminates the child with `SIGXFSZ`.
    pub max_file_size_bytes: Option<u64>,
    /// `RLIMIT_CORE = 0`.
    pub disable_core_dumps: bool,
}

impl Default for ProbeLimits {
    fn default() -> Self {
        Self {
            max_open_files: None,
            max_file_size_bytes: None,
            disable_core_dumps: true,
        }
    }
}

impl ProbeLimits {
    /// No limits at all; the child inherits ours.
    pub fn none() -> Self {
        Self {
            disable_core_dumps: false,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max_open_files.is_none() && self.max_file_size_bytes.is_none() && !self.disable_core_dumps
    }

    pub(crate) fn apply(&self, cmd: &mut Command) {
        if self.is_empty() {
            return;
        }

        #[cfg(unix)]
        unix::apply(cmd, self.clone());

        #[cfg(not(unix))]
        {
            let _ = cmd;
            warn!(limits = ?self, "process limits are not supported on this platform; ignoring");
        }
    }
}

#[cfg(unix)]
mod unix {
    use std::io;

    use tokio::process::Command;

    use super::ProbeLimits;

    pub fn apply(cmd: &mut Command, limits: ProbeLimits) {
        // SAFETY: the hook only calls setrlimit, which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || {
                if let Some(n) = limits.max_open_files {
                    check(libc::setrlimit(libc::RLIMIT_NOFILE, &rlim(n)))?;
                }
                if let Some(n) = limits.max_file_size_bytes {
                    check(libc::setrlimit(libc::RLIMIT_FSIZE, &rlim(n)))?;
                }
                if limits.disable_core_dumps {
                    check(libc::setrlimit(libc::RLIMIT_CORE, &rlim(0)))?;
                }
                Ok(())
            });
        }
    }

    fn rlim(value: u64) -> libc::rlimit {
        libc::rlimit {
            rlim_cur: value as libc::rlim_t,
            rlim_max: value as libc::rlim_t,
        }
    }

    fn check(rc: libc::c_int) -> io::Result<()> {
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
