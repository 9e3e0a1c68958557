//! Process environment threaded through the dispatchers.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::updater::SelfUpdater;

/// Everything a command handler may reach, built once at startup.
pub struct Env {
    pub coordinator: Arc<Coordinator>,
    pub updater: Option<SelfUpdater>,
    shutdown: watch::Sender<bool>,
}

impl Env {
    pub fn new(
        coordinator: Arc<Coordinator>,
        updater: Option<SelfUpdater>,
        shutdown: watch::Sender<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            updater,
            shutdown,
        })
    }

    pub fn config(&self) -> &Config {
        self.coordinator.config()
    }

    /// Ask every worker and the input loop to stop.
    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.send_replace(true);
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
