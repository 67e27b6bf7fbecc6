//! External command execution for pipeline stages.
//!
//! Runs commands via `sh -c` with the message on stdin and returns stdout.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ExecError;

/// Runs one stage command to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` in `dir`, feed `input` on stdin, and return stdout.
    ///
    /// A nonzero exit is an error. No retries are applied.
    async fn run(&self, command: &str, dir: &Path, input: &[u8]) -> Result<Vec<u8>, ExecError>;
}

/// What to do when a command exits successfully but wrote to stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StderrPolicy {
    /// Log the diagnostic output and keep the result.
    #[default]
    Log,
    /// Treat the run as failed.
    Fail,
}

/// [`CommandRunner`] backed by the system shell.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    timeout: Option<Duration>,
    stderr: StderrPolicy,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            timeout: None,
            stderr: StderrPolicy::default(),
        }
    }
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the command if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_stderr_policy(mut self, policy: StderrPolicy) -> Self {
        self.stderr = policy;
        self
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, dir: &Path, input: &[u8]) -> Result<Vec<u8>, ExecError> {
        debug!(
            command,
            working_dir = %dir.display(),
            input_bytes = input.len(),
            "executing stage command"
        );

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::Spawn {
                command: command.to_string(),
                source: e,
            })?;

        // Feed stdin from a separate task so a command that writes before it
        // finishes reading cannot deadlock against us.
        let mut stdin = child.stdin.take().ok_or_else(|| ExecError::Io {
            command: command.to_string(),
            source: std::io::Error::new(ErrorKind::BrokenPipe, "stdin not captured"),
        })?;
        let input = input.to_vec();
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        let output = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(command, timeout = ?timeout, "command timed out");
                    return Err(ExecError::Timeout {
                        command: command.to_string(),
                        timeout,
                    });
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|e| ExecError::Io {
            command: command.to_string(),
            source: e,
        })?;

        match writer.await {
            Ok(Ok(())) => {}
            // The command is allowed to exit without reading its input.
            Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => {
                return Err(ExecError::Io {
                    command: command.to_string(),
                    source: e,
                })
            }
            Err(e) => {
                return Err(ExecError::Io {
                    command: command.to_string(),
                    source: std::io::Error::new(ErrorKind::Other, e),
                })
            }
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(ExecError::Exit {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr,
            });
        }

        if !stderr.is_empty() {
            match self.stderr {
                StderrPolicy::Log => {
                    warn!(command, stderr = %stderr, "command wrote to stderr");
                }
                StderrPolicy::Fail => {
                    return Err(ExecError::Stderr {
                        command: command.to_string(),
                        stderr,
                    });
                }
            }
        }

        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cwd() -> std::path::PathBuf {
        std::env::current_dir().unwrap()
    }

    #[tokio::test]
    async fn test_run_lists_working_directory() {
        let out = ShellRunner::new().run("ls", &cwd(), b"").await.unwrap();
        assert!(String::from_utf8_lossy(&out).contains("Cargo.toml"));
    }

    #[tokio::test]
    async fn test_run_feeds_stdin() {
        let out = ShellRunner::new()
            .run("xargs echo", &cwd(), b"foo")
            .await
            .unwrap();
        assert_eq!(out, b"foo\n");
    }

    #[tokio::test]
    async fn test_echo_output_is_raw() {
        let out = ShellRunner::new().run("echo foo", &cwd(), b"").await.unwrap();
        assert_eq!(out, b"foo\n");
    }

    #[tokio::test]
    async fn test_unread_input_is_not_an_error() {
        let big = vec![b'x'; 1 << 20];
        let out = ShellRunner::new().run("echo done", &cwd(), &big).await.unwrap();
        assert_eq!(out, b"done\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let err = ShellRunner::new()
            .run("false-cmd", &cwd(), b"")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Exit { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_missing_directory_fails_to_spawn() {
        let err = ShellRunner::new()
            .run("true", Path::new("/definitely/not/here"), b"")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_stderr_logged_by_default() {
        let out = ShellRunner::new()
            .run("echo warn >&2; echo ok", &cwd(), b"")
            .await
            .unwrap();
        assert_eq!(out, b"ok\n");
    }

    #[tokio::test]
    async fn test_stderr_fails_when_configured() {
        let err = ShellRunner::new()
            .with_stderr_policy(StderrPolicy::Fail)
            .run("echo warn >&2; echo ok", &cwd(), b"")
            .await
            .unwrap_err();
        match err {
            ExecError::Stderr { stderr, .. } => assert_eq!(stderr, "warn"),
            other => panic!("expected stderr error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let err = ShellRunner::new()
            .with_timeout(Duration::from_millis(50))
            .run("sleep 5", &cwd(), b"")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }), "got {err:?}");
    }
}
