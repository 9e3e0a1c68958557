//! Driver backed by the HTTP booking API.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::password::PasswordGenerator;
use super::{ControlPlane, DemoRef, DriverError, DriverResult};
use crate::client::{ApiServer, BookingApiClient, UpdateStatus};
use crate::server::{Credentials, ServerIdentity};

/// How often a pending game update is polled.
const UPDATE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Give up on a pending update after this many polls.
const UPDATE_MAX_POLLS: u32 = 90;

/// Driver for one API-managed server.
pub struct ApiDriver {
    client: BookingApiClient,
    passwords: Arc<PasswordGenerator>,
    handle: Mutex<ApiServer>,
    kick_message: String,
    poll_interval: Duration,
}

impl ApiDriver {
    pub fn new(
        client: BookingApiClient,
        passwords: Arc<PasswordGenerator>,
        handle: ApiServer,
        kick_message: impl Into<String>,
    ) -> Self {
        Self {
            client,
            passwords,
            handle: Mutex::new(handle),
            kick_message: kick_message.into(),
            poll_interval: UPDATE_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn uuid(&self) -> String {
        self.handle().uuid
    }

    /// Cached server handle from the last refresh.
    pub fn handle(&self) -> ApiServer {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the cached handle after a pool refresh.
    pub fn refresh(&self, handle: ApiServer) {
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = handle;
    }

    fn set_running(&self, running: bool) {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner).running = running;
    }

    /// Update the game files, waiting until the API reports completion.
    pub async fn update_game(&self) -> DriverResult<()> {
        let uuid = self.uuid();
        for poll in 0..UPDATE_MAX_POLLS {
            match self.client.update(&uuid).await? {
                UpdateStatus::Done => {
                    info!(server = %uuid, polls = poll + 1, "Game update complete");
                    return Ok(());
                }
                UpdateStatus::Pending => {
                    debug!(server = %uuid, poll, "Game update pending");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        Err(DriverError::Unavailable(format!(
            "update of {uuid} still pending after {UPDATE_MAX_POLLS} polls"
        )))
    }
}

#[async_trait]
impl ControlPlane for ApiDriver {
    async fn setup(&self, server: &ServerIdentity) -> DriverResult<Credentials> {
        let credentials = Credentials {
            rcon_password: self.passwords.generate(),
            server_password: self.passwords.generate(),
        };

        self.client
            .set_password(
                &self.uuid(),
                &credentials.rcon_password,
                &credentials.server_password,
            )
            .await?;

        debug!(server = %server.id, "Applied passwords through API");
        Ok(credentials)
    }

    async fn start(&self, server: &ServerIdentity) -> DriverResult<()> {
        self.client.start(&self.uuid()).await?;
        self.set_running(true);
        info!(server = %server.id, "Server started through API");
        Ok(())
    }

    async fn stop(&self, server: &ServerIdentity) -> DriverResult<()> {
        let uuid = self.uuid();
        let kick = format!("kickall \"{}\"", self.kick_message.replace('"', ""));
        for command in [kick.as_str(), "tv_stoprecord"] {
            if let Err(e) = self.client.send_command(&uuid, command).await {
                warn!(server = %server.id, command = %command, error = %e, "Pre-stop command failed");
            }
        }

        self.client.stop(&uuid).await?;
        self.set_running(false);
        info!(server = %server.id, "Server stopped through API");
        Ok(())
    }

    async fn send_command(&self, _server: &ServerIdentity, command: &str) -> DriverResult<()> {
        self.client.send_command(&self.uuid(), command).await
    }

    async fn upload_recordings(
        &self,
        server: &ServerIdentity,
        _uploader: Option<&str>,
    ) -> DriverResult<Vec<DemoRef>> {
        // The API publishes recordings itself.
        debug!(server = %server.id, "No recordings to upload for API server");
        Ok(Vec::new())
    }

    async fn console_read(&self, _server: &ServerIdentity, lines: usize) -> DriverResult<Vec<String>> {
        let all = self.client.console(&self.uuid()).await?;
        let skip = all.len().saturating_sub(lines);
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn is_booked(&self, _server: &ServerIdentity) -> DriverResult<bool> {
        Ok(self.handle().running)
    }
}
