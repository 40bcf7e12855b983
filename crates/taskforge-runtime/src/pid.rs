use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::warn;

/// Write our PID, refusing to start when another live daemon owns the
/// file. A stale file (owner no longer answers signal 0) is replaced.
pub fn write_pid_file(path: &Path) -> Result<()> {
    if path.exists() {
        let previous = std::fs::read_to_string(path)
            .ok()
            .and_then(|text| text.trim().parse::<i32>().ok());
        if let Some(pid) = previous {
            if pid_alive(pid) {
                bail!("daemon already running with pid {}", pid);
            }
            warn!(pid, "removing stale pid file");
        }
        std::fs::remove_file(path)
            .with_context(|| format!("remove stale pid file {}", path.display()))?;
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    std::fs::write(path, format!("{}\n", std::process::id()))
        .with_context(|| format!("write pid file {}", path.display()))?;
    Ok(())
}

pub fn remove_pid_file(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %err, "pid file cleanup failed");
    }
}

/// Presence of the file alone is not proof of liveness; the owning pid
/// must answer signal 0.
fn pid_alive(pid: i32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_removes_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/daemon.pid");

        write_pid_file(&path).unwrap();
        let written: i32 = std::fs::read_to_string(&path).unwrap().trim().parse().unwrap();
        assert_eq!(written as u32, std::process::id());

        remove_pid_file(&path);
        assert!(!path.exists());
    }

    #[test]
    fn live_pid_blocks_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        // Our own pid is certainly alive.
        std::fs::write(&path, format!("{}", std::process::id())).unwrap();
        assert!(write_pid_file(&path).is_err());
    }

    #[test]
    fn stale_pid_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        // PIDs this large do not exist on any reasonable system.
        std::fs::write(&path, "999999999").unwrap();
        write_pid_file(&path).unwrap();
        let written: i32 = std::fs::read_to_string(&path).unwrap().trim().parse().unwrap();
        assert_eq!(written as u32, std::process::id());
    }
}
