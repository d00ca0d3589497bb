//! Synchronous helpers for running external commands and capturing
//! their output with useful error context.

use std::io::Read;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

/// Render a command in a way suitable for logging.
fn command_to_string(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    shlex::try_join(parts.iter().map(|s| s.as_str())).unwrap_or_else(|_| parts.join(" "))
}

/// Given a process exit status and any captured stderr, synthesize an error.
fn status_to_error(cmd: &Command, status: std::process::ExitStatus, stderr: &[u8]) -> anyhow::Error {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    let cmd = command_to_string(cmd);
    if stderr.is_empty() {
        anyhow::anyhow!("Command {cmd} failed: {status}")
    } else {
        anyhow::anyhow!("Command {cmd} failed: {status}: {stderr}")
    }
}

/// Extension trait for [`std::process::Command`].
///
/// All of these helpers run the child synchronously to completion; this
/// codebase has no use for concurrent subprocesses.
pub trait CommandRunExt {
    /// Log (at debug level) the target command.
    fn log_debug(&mut self) -> &mut Self;

    /// Execute the child process, discarding stdout.  An error is returned
    /// if the child exited unsuccessfully.
    fn run(&mut self) -> Result<()>;

    /// Execute the child process, capturing stderr so that a failure
    /// includes the process' diagnostic output.
    fn run_capture_stderr(&mut self) -> Result<()>;

    /// Execute the child process, capturing stdout as a `String`
    /// (with trailing whitespace trimmed) and stderr for diagnostics.
    fn run_get_string(&mut self) -> Result<String>;

    /// Execute the child process, parsing its stdout as JSON.
    fn run_and_parse_json<T: DeserializeOwned>(&mut self) -> Result<T>;
}

impl CommandRunExt for Command {
    fn log_debug(&mut self) -> &mut Self {
        tracing::debug!("exec: {}", command_to_string(self));
        self
    }

    fn run(&mut self) -> Result<()> {
        let status = self
            .status()
            .with_context(|| format!("Spawning {}", command_to_string(self)))?;
        if !status.success() {
            return Err(status_to_error(self, status, &[]));
        }
        Ok(())
    }

    fn run_capture_stderr(&mut self) -> Result<()> {
        self.stderr(Stdio::piped());
        let mut child = self
            .spawn()
            .with_context(|| format!("Spawning {}", command_to_string(self)))?;
        let mut stderr = Vec::new();
        if let Some(mut f) = child.stderr.take() {
            f.read_to_end(&mut stderr)?;
        }
        let status = child.wait()?;
        if !status.success() {
            return Err(status_to_error(self, status, &stderr));
        }
        Ok(())
    }

    fn run_get_string(&mut self) -> Result<String> {
        self.stdout(Stdio::piped());
        self.stderr(Stdio::piped());
        let output = self
            .output()
            .with_context(|| format!("Spawning {}", command_to_string(self)))?;
        if !output.status.success() {
            return Err(status_to_error(self, output.status, &output.stderr));
        }
        let mut stdout = String::from_utf8(output.stdout).context("Decoding command stdout")?;
        stdout.truncate(stdout.trim_end().len());
        Ok(stdout)
    }

    fn run_and_parse_json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let stdout = self.run_get_string()?;
        serde_json::from_str(&stdout).context("Parsing command JSON output")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_success() {
        Command::new("true").run().unwrap();
    }

    #[test]
    fn test_run_failure() {
        assert!(Command::new("false").run().is_err());
    }

    #[test]
    fn test_run_captures_stderr() {
        let e = Command::new("sh")
            .args(["-c", "echo oops >&2; exit 3"])
            .run_capture_stderr()
            .unwrap_err();
        let msg = e.to_string();
        assert!(msg.contains("oops"), "{msg}");
    }

    #[test]
    fn test_run_get_string() {
        let s = Command::new("echo").arg("hello").run_get_string().unwrap();
        assert_eq!(s, "hello");
    }

    #[test]
    fn test_run_and_parse_json() {
        #[derive(serde::Deserialize)]
        struct V {
            a: u32,
        }
        let v: V = Command::new("echo")
            .arg(r#"{"a": 42}"#)
            .run_and_parse_json()
            .unwrap();
        assert_eq!(v.a, 42);
    }
}
