//! Shell command transports for the shell driver.
//!
//! Commands run through `sh -c` either on this host or on a remote host via
//! the system `ssh` client. Every call opens its own process; nothing is
//! pooled.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::{DriverError, DriverResult};

/// `ssh` exits with 255 when the connection itself failed.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// How the remote shell authenticates.
#[derive(Debug, Clone)]
pub enum SshAuth {
    /// Public key from a file (or the agent when `None`).
    Key(Option<PathBuf>),
    /// Password fed to `sshpass` through its environment.
    Password(String),
}

/// Where shell commands execute.
#[derive(Debug, Clone)]
pub enum ShellTransport {
    Local {
        working_dir: PathBuf,
    },
    Ssh {
        host: String,
        port: u16,
        user: String,
        auth: SshAuth,
        working_dir: Option<PathBuf>,
    },
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// Quote a string for POSIX `sh`.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl ShellTransport {
    pub fn is_remote(&self) -> bool {
        matches!(self, ShellTransport::Ssh { .. })
    }

    fn build(&self, script: &str) -> Command {
        match self {
            ShellTransport::Local { working_dir } => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(script).current_dir(working_dir);
                cmd
            }
            ShellTransport::Ssh {
                host,
                port,
                user,
                auth,
                working_dir,
            } => {
                let remote = match working_dir {
                    Some(dir) => format!("cd {} && {}", shell_quote(&dir.to_string_lossy()), script),
                    None => script.to_string(),
                };

                let mut cmd = match auth {
                    SshAuth::Password(password) => {
                        let mut cmd = Command::new("sshpass");
                        cmd.arg("-e").arg("ssh").env("SSHPASS", password);
                        cmd
                    }
                    SshAuth::Key(key_file) => {
                        let mut cmd = Command::new("ssh");
                        cmd.args(["-o", "BatchMode=yes"]);
                        if let Some(key) = key_file {
                            cmd.arg("-i").arg(key);
                        }
                        cmd
                    }
                };

                cmd.args(["-o", "StrictHostKeyChecking=accept-new"])
                    .arg("-p")
                    .arg(port.to_string())
                    .arg(format!("{user}@{host}"))
                    .arg(remote);
                cmd
            }
        }
    }

    /// Run `script`, failing on spawn errors, timeouts and non-zero exits.
    pub async fn run(&self, script: &str, timeout: Duration) -> DriverResult<CommandOutput> {
        debug!(script = %script, remote = self.is_remote(), "Running shell command");

        let mut cmd = self.build(script);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| DriverError::Unavailable(format!("'{script}' timed out after {timeout:?}")))?
            .map_err(|e| DriverError::Unavailable(format!("failed to spawn '{script}': {e}")))?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if output.status.success() {
            return Ok(result);
        }

        let message = format!(
            "'{}' exited with {}: {}",
            script,
            output.status,
            result.stderr.trim()
        );
        if self.is_remote() && output.status.code() == Some(SSH_CONNECTION_FAILURE) {
            Err(DriverError::Unavailable(message))
        } else {
            Err(DriverError::Rejected(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("tf2-1"), "tf2-1");
        assert_eq!(shell_quote("say hello world"), "'say hello world'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[tokio::test]
    async fn test_local_run_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ShellTransport::Local {
            working_dir: dir.path().to_path_buf(),
        };

        let output = transport
            .run("echo one; echo; echo two", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.stdout_lines().collect::<Vec<_>>(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_local_nonzero_exit_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ShellTransport::Local {
            working_dir: dir.path().to_path_buf(),
        };

        let err = transport
            .run("echo nope >&2; exit 3", Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            DriverError::Rejected(msg) => assert!(msg.contains("nope")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_local_timeout_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ShellTransport::Local {
            working_dir: dir.path().to_path_buf(),
        };

        let err = transport
            .run("sleep 5", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_working_dir_is_unavailable() {
        let transport = ShellTransport::Local {
            working_dir: PathBuf::from("/nonexistent/booker-test"),
        };

        let err = transport.run("true", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, DriverError::Unavailable(_)));
    }
}
