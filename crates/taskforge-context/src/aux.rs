use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

/// Run the auxiliary model once: prompt on stdin, one text response on
/// stdout, hard timeout. The subprocess is killed when the deadline
/// passes; callers treat that as a soft failure and fall back.
pub fn run_aux_model(bin: &Path, model: &str, prompt: &str, timeout: Duration) -> Result<String> {
    let mut child = Command::new(bin)
        .args(["--model", model, "--print"])
        .current_dir(std::env::temp_dir())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("spawn auxiliary model {}", bin.display()))?;

    if let Some(mut stdin) = child.stdin.take() {
        // A dead child surfaces as a broken pipe here; the wait loop
        // below reports it.
        let _ = stdin.write_all(prompt.as_bytes());
    }

    let (tx, rx) = mpsc::channel();
    let mut stdout = child.stdout.take().context("auxiliary model stdout")?;
    std::thread::Builder::new()
        .name("aux-model-stdout".to_string())
        .spawn(move || {
            let mut output = String::new();
            let _ = stdout.read_to_string(&mut output);
            let _ = tx.send(output);
        })?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait()? {
            Some(status) => {
                let output = rx
                    .recv_timeout(Duration::from_secs(1))
                    .unwrap_or_default();
                if !status.success() {
                    bail!("auxiliary model exited with {}", status);
                }
                return Ok(output.trim().to_string());
            }
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    bail!("auxiliary model timed out after {:?}", timeout);
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

/// Strip a surrounding markdown code fence (``` or ```json) from a
/// model response.
pub(crate) fn strip_code_fences(response: &str) -> String {
    let trimmed = response.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let mut inner = trimmed.trim_start_matches("```");
    if let Some(rest) = inner.strip_prefix("json") {
        inner = rest;
    }
    match inner.find("```") {
        Some(end) => inner[..end].trim().to_string(),
        None => inner.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn missing_binary_is_an_error() {
        let result = run_aux_model(
            Path::new("/nonexistent/claude-binary"),
            "haiku",
            "hello",
            Duration::from_secs(1),
        );
        assert!(result.is_err());
    }

    #[test]
    #[cfg(unix)]
    fn timeout_kills_the_subprocess() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-model");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let started = Instant::now();
        let result = run_aux_model(&script, "haiku", "", Duration::from_millis(200));
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
