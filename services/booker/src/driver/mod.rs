//! Control-plane drivers.
//!
//! A driver starts, stops and talks to the game process behind one server.
//! The capability set is the [`ControlPlane`] trait; the concrete backends
//! form the closed [`Driver`] enum so the pool can pick a variant when it
//! inserts a server:
//!
//! - **Shell** runs scripts locally or over SSH and drives a tmux session
//! - **Api** calls the HTTP booking API
//! - **Mock** records calls for tests

mod api;
mod mock;
pub mod password;
mod shell;
mod transport;

pub use api::ApiDriver;
pub use mock::{DriverCall, MockDriver};
pub use shell::{ShellDriver, ShellScripts};
pub use transport::{shell_quote, ShellTransport, SshAuth};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::server::{Credentials, ServerIdentity};

/// Driver failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Transport failure (spawn, dial, timeout).
    #[error("control plane unavailable: {0}")]
    Unavailable(String),

    /// The control plane answered but refused.
    #[error("control plane rejected request: {0}")]
    Rejected(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// A published session recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoRef {
    /// File name of the recording.
    pub name: String,
    pub map_name: String,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
}

impl DemoRef {
    /// Build a reference from an auto-recorded file name
    /// (`auto-YYYYMMDD-HHMM-<map>.dem`).
    pub fn from_file_name(name: &str, url: String) -> Self {
        Self {
            map_name: map_from_demo_name(name).unwrap_or_default(),
            name: name.to_string(),
            url,
            uploaded_at: Utc::now(),
        }
    }
}

/// Extract the map from an auto-recorded demo name.
pub fn map_from_demo_name(name: &str) -> Option<String> {
    let stem = name.strip_suffix(".dem")?;
    let mut parts = stem.splitn(4, '-');
    if parts.next()? != "auto" {
        return None;
    }
    let _date = parts.next()?;
    let _time = parts.next()?;
    parts.next().filter(|map| !map.is_empty()).map(str::to_string)
}

/// Operations every backend supports against a single server.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Apply fresh passwords and return them.
    async fn setup(&self, server: &ServerIdentity) -> DriverResult<Credentials>;

    /// Bring the game process to running.
    async fn start(&self, server: &ServerIdentity) -> DriverResult<()>;

    /// Kick players, stop recording and halt the process.
    async fn stop(&self, server: &ServerIdentity) -> DriverResult<()>;

    /// Inject one console command.
    async fn send_command(&self, server: &ServerIdentity, command: &str) -> DriverResult<()>;

    /// Publish recordings made since the last upload.
    async fn upload_recordings(
        &self,
        server: &ServerIdentity,
        uploader: Option<&str>,
    ) -> DriverResult<Vec<DemoRef>>;

    /// Last `lines` lines of console output.
    async fn console_read(&self, server: &ServerIdentity, lines: usize) -> DriverResult<Vec<String>>;

    /// Whether the backend considers the server in use.
    async fn is_booked(&self, server: &ServerIdentity) -> DriverResult<bool>;

    async fn is_available(&self, server: &ServerIdentity) -> DriverResult<bool> {
        self.is_booked(server).await.map(|booked| !booked)
    }
}

/// The driver attached to a server.
pub enum Driver {
    Shell(ShellDriver),
    Api(ApiDriver),
    Mock(MockDriver),
}

impl Driver {
    pub fn kind(&self) -> &'static str {
        match self {
            Driver::Shell(shell) if shell.is_remote() => "ssh",
            Driver::Shell(_) => "local",
            Driver::Api(_) => "api",
            Driver::Mock(_) => "mock",
        }
    }

    fn inner(&self) -> &dyn ControlPlane {
        match self {
            Driver::Shell(d) => d,
            Driver::Api(d) => d,
            Driver::Mock(d) => d,
        }
    }

    pub fn as_api(&self) -> Option<&ApiDriver> {
        match self {
            Driver::Api(d) => Some(d),
            _ => None,
        }
    }
}

#[async_trait]
impl ControlPlane for Driver {
    async fn setup(&self, server: &ServerIdentity) -> DriverResult<Credentials> {
        self.inner().setup(server).await
    }

    async fn start(&self, server: &ServerIdentity) -> DriverResult<()> {
        self.inner().start(server).await
    }

    async fn stop(&self, server: &ServerIdentity) -> DriverResult<()> {
        self.inner().stop(server).await
    }

    async fn send_command(&self, server: &ServerIdentity, command: &str) -> DriverResult<()> {
        self.inner().send_command(server, command).await
    }

    async fn upload_recordings(
        &self,
        server: &ServerIdentity,
        uploader: Option<&str>,
    ) -> DriverResult<Vec<DemoRef>> {
        self.inner().upload_recordings(server, uploader).await
    }

    async fn console_read(&self, server: &ServerIdentity, lines: usize) -> DriverResult<Vec<String>> {
        self.inner().console_read(server, lines).await
    }

    async fn is_booked(&self, server: &ServerIdentity) -> DriverResult<bool> {
        self.inner().is_booked(server).await
    }

    async fn is_available(&self, server: &ServerIdentity) -> DriverResult<bool> {
        self.inner().is_available(server).await
    }
}
