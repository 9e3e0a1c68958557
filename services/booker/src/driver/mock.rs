//! Mock control plane for tests and development.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{ControlPlane, DemoRef, DriverError, DriverResult};
use crate::server::{Credentials, ServerIdentity};

/// A call observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Setup,
    Start,
    Stop,
    SendCommand(String),
    UploadRecordings(Option<String>),
    ConsoleRead(usize),
    IsBooked,
}

#[derive(Default)]
struct MockState {
    calls: Vec<DriverCall>,
    fail_setup: bool,
    fail_start: bool,
    fail_stop: bool,
    fail_upload: bool,
    demos: Vec<DemoRef>,
    console: Vec<String>,
    running: bool,
    start_delay: Duration,
}

/// Recording mock driver.
///
/// Clones share state, so a test can keep a handle after the driver has been
/// moved into a server.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: DriverCall) {
        self.lock().calls.push(call);
    }

    pub fn fail_setup(&self, fail: bool) {
        self.lock().fail_setup = fail;
    }

    pub fn fail_start(&self, fail: bool) {
        self.lock().fail_start = fail;
    }

    pub fn fail_stop(&self, fail: bool) {
        self.lock().fail_stop = fail;
    }

    pub fn fail_upload(&self, fail: bool) {
        self.lock().fail_upload = fail;
    }

    /// Recordings returned by the next uploads.
    pub fn set_demos(&self, demos: Vec<DemoRef>) {
        self.lock().demos = demos;
    }

    pub fn set_console(&self, lines: Vec<String>) {
        self.lock().console = lines;
    }

    /// Delay applied inside `start`.
    pub fn set_start_delay(&self, delay: Duration) {
        self.lock().start_delay = delay;
    }

    pub fn set_running(&self, running: bool) {
        self.lock().running = running;
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, call: &DriverCall) -> usize {
        self.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Commands passed to `send_command`, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                DriverCall::SendCommand(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ControlPlane for MockDriver {
    async fn setup(&self, server: &ServerIdentity) -> DriverResult<Credentials> {
        self.record(DriverCall::Setup);
        if self.lock().fail_setup {
            return Err(DriverError::Unavailable("mock setup failure".into()));
        }

        info!(server = %server.id, "[MOCK] Setup");
        Ok(Credentials {
            rcon_password: format!("rcon-{}", server.session_name),
            server_password: format!("pass-{}", server.session_name),
        })
    }

    async fn start(&self, server: &ServerIdentity) -> DriverResult<()> {
        self.record(DriverCall::Start);
        let (delay, fail) = {
            let state = self.lock();
            (state.start_delay, state.fail_start)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(DriverError::Rejected("mock start failure".into()));
        }

        info!(server = %server.id, "[MOCK] Started");
        self.lock().running = true;
        Ok(())
    }

    async fn stop(&self, server: &ServerIdentity) -> DriverResult<()> {
        self.record(DriverCall::Stop);
        if self.lock().fail_stop {
            return Err(DriverError::Unavailable("mock stop failure".into()));
        }

        info!(server = %server.id, "[MOCK] Stopped");
        self.lock().running = false;
        Ok(())
    }

    async fn send_command(&self, _server: &ServerIdentity, command: &str) -> DriverResult<()> {
        self.record(DriverCall::SendCommand(command.to_string()));
        Ok(())
    }

    async fn upload_recordings(
        &self,
        _server: &ServerIdentity,
        uploader: Option<&str>,
    ) -> DriverResult<Vec<DemoRef>> {
        self.record(DriverCall::UploadRecordings(uploader.map(str::to_string)));
        let state = self.lock();
        if state.fail_upload {
            return Err(DriverError::Unavailable("mock upload failure".into()));
        }
        Ok(state.demos.clone())
    }

    async fn console_read(&self, _server: &ServerIdentity, lines: usize) -> DriverResult<Vec<String>> {
        self.record(DriverCall::ConsoleRead(lines));
        let state = self.lock();
        let skip = state.console.len().saturating_sub(lines);
        Ok(state.console.iter().skip(skip).cloned().collect())
    }

    async fn is_booked(&self, _server: &ServerIdentity) -> DriverResult<bool> {
        self.record(DriverCall::IsBooked);
        Ok(self.lock().running)
    }
}
