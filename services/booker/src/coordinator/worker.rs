use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, instrument};

use super::Coordinator;

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Deadline, idle and tick-rate checks.
    pub minute_interval: Duration,
    /// Lobby and return-warning notices.
    pub notice_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            minute_interval: Duration::from_secs(60),
            notice_interval: Duration::from_secs(10),
        }
    }
}

/// Drives the coordinator's periodic ticks until shutdown.
pub struct WatchdogWorker {
    coordinator: Arc<Coordinator>,
    config: WatchdogConfig,
}

impl WatchdogWorker {
    pub fn new(coordinator: Arc<Coordinator>, config: WatchdogConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            minute_interval_secs = self.config.minute_interval.as_secs(),
            notice_interval_secs = self.config.notice_interval.as_secs(),
            "Starting watchdog worker"
        );

        let mut minute = tokio::time::interval(self.config.minute_interval);
        let mut notice = tokio::time::interval(self.config.notice_interval);
        minute.tick().await;
        notice.tick().await;

        loop {
            tokio::select! {
                _ = minute.tick() => {
                    self.coordinator.minute_tick().await;
                }
                _ = notice.tick() => {
                    self.coordinator.lobby_tick().await;
                    self.coordinator.return_warning_tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Watchdog worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
