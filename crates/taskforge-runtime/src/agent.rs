use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::parse_kv;

/// Grace period between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// One line read attempt against the agent's merged output.
#[derive(Debug)]
pub enum LineRead {
    Line(String),
    Timeout,
    Eof,
}

/// A running agent subprocess. Stdout and stderr are merged into one
/// line channel by reader threads, so the worker can interleave queue
/// polls with bounded waits instead of blocking on a pipe.
pub struct AgentProcess {
    child: Child,
    lines: Receiver<String>,
    eof: bool,
}

/// Spawn the agent for one ticket run.
///
/// Invocation contract: `--model <alias> --verbose --output-format
/// stream-json --dangerously-skip-permissions -p <prompt>`, run inside
/// one of the project's configured roots, with `$HOME/.claude/.env`
/// merged into the environment.
pub fn spawn_agent(
    claude_bin: &Path,
    cwd: &Path,
    env_file: Option<&Path>,
    model: &str,
    prompt: &str,
) -> Result<AgentProcess> {
    let mut command = Command::new(claude_bin);
    command
        .args([
            "--model",
            model,
            "--verbose",
            "--output-format",
            "stream-json",
            "--dangerously-skip-permissions",
            "-p",
            prompt,
        ])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(env_file) = env_file {
        for (key, value) in load_env_file(env_file) {
            command.env(key, value);
        }
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("spawn agent {}", claude_bin.display()))?;
    debug!(pid = child.id(), cwd = %cwd.display(), model, "agent spawned");

    let (tx, rx) = channel();
    let stdout = child.stdout.take().context("agent stdout")?;
    spawn_reader("agent-stdout", stdout, tx.clone())?;
    let stderr = child.stderr.take().context("agent stderr")?;
    spawn_reader("agent-stderr", stderr, tx)?;

    Ok(AgentProcess {
        child,
        lines: rx,
        eof: false,
    })
}

fn spawn_reader(name: &str, pipe: impl Read + Send + 'static, tx: Sender<String>) -> Result<()> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let reader = BufReader::new(pipe);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawn agent reader thread")?;
    Ok(())
}

impl AgentProcess {
    /// Wait up to `timeout` for the next output line. Eof means both
    /// pipes closed and every buffered line was consumed.
    pub fn read_line(&mut self, timeout: Duration) -> LineRead {
        if self.eof {
            return LineRead::Eof;
        }
        match self.lines.recv_timeout(timeout) {
            Ok(line) => LineRead::Line(line),
            Err(RecvTimeoutError::Timeout) => LineRead::Timeout,
            Err(RecvTimeoutError::Disconnected) => {
                self.eof = true;
                LineRead::Eof
            }
        }
    }

    pub fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().context("wait for agent")
    }

    /// SIGTERM, then SIGKILL after a grace period. The agent is
    /// expected to exit cleanly on SIGTERM.
    pub fn terminate(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }

        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => std::thread::sleep(Duration::from_millis(50)),
                Err(_) => return,
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Credentials merged into the agent environment: `KEY=value` lines,
/// `#` comments ignored, quoting stripped.
pub fn load_env_file(path: &Path) -> Vec<(String, String)> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_kv(&text).into_iter().collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_file_is_optional() {
        assert!(load_env_file(Path::new("/nonexistent/.env")).is_empty());
    }

    #[test]
    fn env_file_entries_are_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "# creds\nANTHROPIC_API_KEY=\"sk-test\"\n").unwrap();

        let env = load_env_file(&path);
        assert_eq!(
            env,
            vec![("ANTHROPIC_API_KEY".to_string(), "sk-test".to_string())]
        );
    }

    #[test]
    #[cfg(unix)]
    fn reads_merged_output_then_eof() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("agent"),
            "#!/bin/sh\necho '{\"type\":\"x\"}'\necho 'oops' >&2\n",
        )
        .unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(
            dir.path().join("agent"),
            std::fs::Permissions::from_mode(0o755),
        )
        .unwrap();

        let mut agent = spawn_agent(
            &dir.path().join("agent"),
            dir.path(),
            None,
            "sonnet",
            "prompt",
        )
        .unwrap();

        let mut lines = Vec::new();
        loop {
            match agent.read_line(Duration::from_secs(5)) {
                LineRead::Line(line) => lines.push(line),
                LineRead::Timeout => continue,
                LineRead::Eof => break,
            }
        }
        assert!(lines.contains(&"{\"type\":\"x\"}".to_string()));
        assert!(lines.contains(&"oops".to_string()));
        assert!(agent.wait().unwrap().success());
    }
}
