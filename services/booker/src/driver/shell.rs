//! Script-driven control plane for self-hosted servers.
//!
//! Lifecycle operations run operator-provided scripts in the server's
//! working directory. Console access goes through the tmux session named
//! after the server.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::transport::{shell_quote, CommandOutput, ShellTransport};
use super::{ControlPlane, DemoRef, DriverError, DriverResult};
use crate::config::ScriptsConfig;
use crate::server::{Credentials, ServerIdentity};

/// Commands for each lifecycle step.
#[derive(Debug, Clone)]
pub struct ShellScripts {
    pub setup: String,
    pub start: String,
    pub stop: String,
    /// Invoked once per recording as `<upload> <path> [uploader]`; the last
    /// stdout line is the published URL.
    pub upload: String,
    pub timeout: Duration,
}

impl From<&ScriptsConfig> for ShellScripts {
    fn from(config: &ScriptsConfig) -> Self {
        Self {
            setup: config.setup.clone(),
            start: config.start.clone(),
            stop: config.stop.clone(),
            upload: config.upload.clone(),
            timeout: config.timeout,
        }
    }
}

/// Driver for servers managed by shell scripts and tmux.
pub struct ShellDriver {
    transport: ShellTransport,
    scripts: ShellScripts,
    demos_dir: String,
    kick_message: String,
    last_upload: Mutex<DateTime<Utc>>,
}

impl ShellDriver {
    pub fn new(
        transport: ShellTransport,
        scripts: ShellScripts,
        demos_dir: impl Into<String>,
        kick_message: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            scripts,
            demos_dir: demos_dir.into(),
            kick_message: kick_message.into(),
            last_upload: Mutex::new(Utc::now()),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.transport.is_remote()
    }

    /// Only recordings modified after `at` are uploaded next time.
    pub fn set_last_upload(&self, at: DateTime<Utc>) {
        *self.last_upload.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    fn last_upload(&self) -> DateTime<Utc> {
        *self.last_upload.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(&self, script: &str) -> DriverResult<CommandOutput> {
        self.transport.run(script, self.scripts.timeout).await
    }

    async fn tmux(&self, args: &str) -> DriverResult<CommandOutput> {
        self.run(&format!("tmux {args}")).await
    }
}

/// Parse `rcon_password=` and `server_password=` lines from setup output.
pub(crate) fn parse_credentials(output: &CommandOutput) -> DriverResult<Credentials> {
    let mut rcon_password = None;
    let mut server_password = None;

    for line in output.stdout_lines() {
        if let Some(value) = line.strip_prefix("rcon_password=") {
            rcon_password = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("server_password=") {
            server_password = Some(value.trim().to_string());
        }
    }

    match (rcon_password, server_password) {
        (Some(rcon_password), Some(server_password)) => Ok(Credentials {
            rcon_password,
            server_password,
        }),
        _ => Err(DriverError::Rejected(
            "setup output did not include rcon_password and server_password".to_string(),
        )),
    }
}

#[async_trait]
impl ControlPlane for ShellDriver {
    async fn setup(&self, server: &ServerIdentity) -> DriverResult<Credentials> {
        let output = self.run(&self.scripts.setup).await?;
        let credentials = parse_credentials(&output)?;
        debug!(server = %server.id, "Setup script applied new passwords");
        Ok(credentials)
    }

    async fn start(&self, server: &ServerIdentity) -> DriverResult<()> {
        self.run(&self.scripts.start).await?;
        info!(server = %server.id, "Server started");
        Ok(())
    }

    async fn stop(&self, server: &ServerIdentity) -> DriverResult<()> {
        let kick = format!("kickall \"{}\"", self.kick_message.replace('"', ""));
        for command in [kick.as_str(), "tv_stoprecord"] {
            if let Err(e) = self.send_command(server, command).await {
                warn!(server = %server.id, command = %command, error = %e, "Pre-stop command failed");
            }
        }

        self.run(&self.scripts.stop).await?;
        info!(server = %server.id, "Server stopped");
        Ok(())
    }

    async fn send_command(&self, server: &ServerIdentity, command: &str) -> DriverResult<()> {
        self.tmux(&format!(
            "send-keys -t {} {} Enter",
            shell_quote(&server.session_name),
            shell_quote(command)
        ))
        .await?;
        Ok(())
    }

    async fn upload_recordings(
        &self,
        server: &ServerIdentity,
        uploader: Option<&str>,
    ) -> DriverResult<Vec<DemoRef>> {
        let since = self.last_upload();
        let started = Utc::now();

        let listing = self
            .run(&format!(
                "find {} -maxdepth 1 -type f -name '*.dem' -newermt @{}",
                shell_quote(&self.demos_dir),
                since.timestamp()
            ))
            .await?;

        let mut paths: Vec<&str> = listing.stdout_lines().collect();
        paths.sort_unstable();

        let mut demos = Vec::with_capacity(paths.len());
        for path in paths {
            let mut script = format!("{} {}", self.scripts.upload, shell_quote(path));
            if let Some(uploader) = uploader {
                script.push(' ');
                script.push_str(&shell_quote(uploader));
            }

            match self.run(&script).await {
                Ok(output) => {
                    let Some(url) = output.stdout_lines().last() else {
                        warn!(server = %server.id, demo = %path, "Upload produced no URL");
                        continue;
                    };
                    let name = path.rsplit('/').next().unwrap_or(path);
                    demos.push(DemoRef::from_file_name(name, url.to_string()));
                }
                Err(e) => {
                    warn!(server = %server.id, demo = %path, error = %e, "Demo upload failed");
                }
            }
        }

        self.set_last_upload(started);
        info!(server = %server.id, count = demos.len(), "Uploaded recordings");
        Ok(demos)
    }

    async fn console_read(&self, server: &ServerIdentity, lines: usize) -> DriverResult<Vec<String>> {
        let output = self
            .tmux(&format!(
                "capture-pane -p -t {} -S -{}",
                shell_quote(&server.session_name),
                lines
            ))
            .await?;

        let all: Vec<String> = output.stdout_lines().map(str::to_string).collect();
        let skip = all.len().saturating_sub(lines);
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn is_booked(&self, server: &ServerIdentity) -> DriverResult<bool> {
        match self
            .tmux(&format!("has-session -t {}", shell_quote(&server.session_name)))
            .await
        {
            Ok(_) => Ok(true),
            Err(DriverError::Rejected(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
