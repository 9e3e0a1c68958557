//! Pool over a fixed list of configured servers.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use super::{select_best, ServerPool};
use crate::config::{Config, DriverKind, ServerConfig};
use crate::driver::{
    ControlPlane, Driver, DriverResult, MockDriver, ShellDriver, ShellScripts, ShellTransport,
    SshAuth,
};
use crate::server::{Server, ServerIdentity};

/// Construct the driver a configured server asks for.
pub fn build_driver(server: &ServerConfig, kick_message: &str) -> Result<Driver> {
    let scripts = ShellScripts::from(&server.scripts);

    let driver = match server.driver {
        DriverKind::Mock => Driver::Mock(MockDriver::new()),
        DriverKind::Local => {
            let working_dir = server
                .working_dir
                .clone()
                .with_context(|| format!("server '{}' has no working_dir", server.name))?;
            Driver::Shell(ShellDriver::new(
                ShellTransport::Local { working_dir },
                scripts,
                server.demos_dir.clone(),
                kick_message,
            ))
        }
        DriverKind::Ssh => {
            let ssh = server
                .ssh
                .as_ref()
                .with_context(|| format!("server '{}' has no ssh section", server.name))?;
            let auth = match &ssh.password {
                Some(password) => SshAuth::Password(password.clone()),
                None => SshAuth::Key(ssh.key_file.clone()),
            };
            Driver::Shell(ShellDriver::new(
                ShellTransport::Ssh {
                    host: ssh.host.clone(),
                    port: ssh.port,
                    user: ssh.user.clone(),
                    auth,
                    working_dir: server.working_dir.clone(),
                },
                scripts,
                server.demos_dir.clone(),
                kick_message,
            ))
        }
    };

    Ok(driver)
}

/// Servers loaded once from configuration, keyed by session name.
pub struct StaticPool {
    servers: Vec<Arc<Server>>,
    tick_rate_target: f64,
}

impl StaticPool {
    pub fn new(servers: Vec<Arc<Server>>, tick_rate_target: f64) -> Self {
        Self {
            servers,
            tick_rate_target,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let servers = config
            .servers
            .iter()
            .map(|server| {
                let driver = build_driver(server, &config.booking.kick_message)?;
                Ok(Arc::new(Server::new(
                    ServerIdentity {
                        id: server.session_name.clone(),
                        name: server.name.clone(),
                        address: server.address.clone(),
                        stv_address: server.stv_address.clone(),
                        session_name: server.session_name.clone(),
                    },
                    driver,
                )))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(servers, config.booking.tick_rate_target))
    }
}

#[async_trait]
impl ServerPool for StaticPool {
    async fn initialise(&self) -> DriverResult<()> {
        for server in &self.servers {
            match server.driver().is_booked(server.identity()).await {
                Ok(true) if server.is_available().await => {
                    warn!(server = %server.id(), "Server is running without a booking");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(server = %server.id(), error = %e, "Could not probe server state");
                }
            }
        }

        info!(servers = self.servers.len(), "Static pool initialised");
        Ok(())
    }

    async fn get_servers(&self) -> Vec<Arc<Server>> {
        self.servers.clone()
    }

    async fn get_available_server(&self) -> Option<Arc<Server>> {
        let available = self.get_available_servers().await;
        select_best(&available, self.tick_rate_target).await
    }
}
