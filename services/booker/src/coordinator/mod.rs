//! Reservation coordinator.
//!
//! The coordinator executes request-time transitions (book, return, extend,
//! send password) and the periodic watchdog ticks. It owns no server state
//! itself: records live in the pool, user holdings in the reservation store.
//!
//! ## Concurrency
//!
//! - Server selection and claim happen under a coordinator-wide selection
//!   lock, so two bookings cannot pick the same free server.
//! - Each transition holds the server's transition lock. Detached work
//!   (start after a booking, stop and upload after a return) carries the
//!   guard, so a watchdog return waits for it and then sees the new state.

mod booking;
mod sync;
mod watchdog;
mod worker;

pub use sync::SyncReport;
pub use watchdog::{parse_stats_fps, ReturnReason};
pub use worker::{WatchdogConfig, WatchdogWorker};

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::chat::{ChatFrontend, CommandInfo, PresenceStatus};
use crate::config::Config;
use crate::db::BookingHistory;
use crate::messages;
use crate::pool::ServerPool;
use crate::query::GameQuery;
use crate::server::Booker;
use crate::store::Reservations;
use crate::supervisor::TaskSupervisor;

/// Collaborators the coordinator drives.
pub struct CoordinatorParts {
    pub config: Arc<Config>,
    pub pool: Arc<dyn ServerPool>,
    pub reservations: Reservations,
    pub chat: Arc<dyn ChatFrontend>,
    pub query: Arc<dyn GameQuery>,
    pub history: Option<Arc<dyn BookingHistory>>,
    pub supervisor: Arc<TaskSupervisor>,
}

pub struct Coordinator {
    config: Arc<Config>,
    pool: Arc<dyn ServerPool>,
    reservations: Reservations,
    chat: Arc<dyn ChatFrontend>,
    query: Arc<dyn GameQuery>,
    history: Option<Arc<dyn BookingHistory>>,
    supervisor: Arc<TaskSupervisor>,
    selection: Mutex<()>,
}

impl Coordinator {
    pub fn new(parts: CoordinatorParts) -> Arc<Self> {
        Arc::new(Self {
            config: parts.config,
            pool: parts.pool,
            reservations: parts.reservations,
            chat: parts.chat,
            query: parts.query,
            history: parts.history,
            supervisor: parts.supervisor,
            selection: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &Arc<dyn ServerPool> {
        &self.pool
    }

    pub fn reservations(&self) -> &Reservations {
        &self.reservations
    }

    pub fn chat(&self) -> &Arc<dyn ChatFrontend> {
        &self.chat
    }

    pub fn history(&self) -> Option<&Arc<dyn BookingHistory>> {
        self.history.as_ref()
    }

    pub fn supervisor(&self) -> &Arc<TaskSupervisor> {
        &self.supervisor
    }

    /// Refresh the front-end presence from current availability.
    pub async fn update_presence(&self) {
        let available = self.pool.get_available_servers().await.len();
        let status = if available == 0 {
            PresenceStatus::Idle
        } else {
            PresenceStatus::Online
        };

        if let Err(e) = self
            .chat
            .set_presence(status, &messages::presence_text(available))
            .await
        {
            warn!(error = %e, "Failed to update presence");
        }
    }

    pub(crate) async fn reply(&self, info: &CommandInfo, text: &str) {
        if let Err(e) = self.chat.reply_channel(&info.channel_id, text).await {
            warn!(channel = %info.channel_id, error = %e, "Failed to send reply");
        }
    }

    pub(crate) async fn direct(&self, user_id: &str, text: &str) {
        if let Err(e) = self.chat.reply_user(user_id, text).await {
            warn!(user = %user_id, error = %e, "Failed to send direct message");
        }
    }

    /// Post to the default broadcast channel.
    pub(crate) async fn broadcast(&self, text: &str) {
        let channel = &self.config.discord.default_channel;
        if channel.is_empty() {
            return;
        }
        if let Err(e) = self.chat.reply_channel(channel, text).await {
            warn!(channel = %channel, error = %e, "Failed to broadcast");
        }
    }

    /// Direct-message every configured admin.
    pub async fn notify_admins(&self, text: &str) {
        for user in &self.config.discord.notification_users {
            self.direct(user, text).await;
        }
    }

    /// Booker for `user_id`, named from the front-end when possible.
    pub(crate) async fn booker_for(&self, user_id: &str) -> Booker {
        let name = match self.chat.user_info(user_id).await {
            Ok(user) => user.username,
            Err(e) => {
                warn!(user = %user_id, error = %e, "Could not resolve user name");
                user_id.to_string()
            }
        };
        Booker::new(user_id, name)
    }
}
