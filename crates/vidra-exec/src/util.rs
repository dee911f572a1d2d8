use std::time::Duration;

use tokio::process::Child;

/// How long a child gets to exit after SIGTERM before it is killed.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Keep at most the last `max` chars of tool output, trimmed.
pub fn tail(text: &str, max: usize) -> String {
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(max);
    match text.char_indices().nth(skip) {
        Some((start, _)) if skip > 0 => format!("...{}", &text[start..]),
        _ => text.to_string(),
    }
}

#[cfg(unix)]
pub async fn kill_graceful(child: &mut Child) -> std::io::Result<()> {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to a pid we spawned and have not reaped.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return Ok(());
        }
    }
    child.kill().await
}

#[cfg(not(unix))]
pub async fn kill_graceful(child: &mut Child) -> std::io::Result<()> {
    child.kill().await
}
