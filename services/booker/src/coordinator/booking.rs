//! Request-time transitions: book, return, extend, send password.

use std::sync::Arc;

use rand::seq::IndexedRandom;
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, instrument, warn};

use super::Coordinator;
use crate::chat::CommandInfo;
use crate::db::BookingRecord;
use crate::driver::{ControlPlane, DemoRef};
use crate::error::{BookingError, BookingResult};
use crate::messages;
use crate::server::{Booker, FinishedBooking, Server};

/// Where the outcome of a finished booking is announced.
pub(crate) enum Announce {
    /// Voluntary return: summary goes to the invoking channel.
    Channel(String),
    /// Watchdog return: summary goes to the broadcast channel.
    Broadcast,
}

impl Coordinator {
    /// Reserve a server for the invoking user.
    #[instrument(skip(self, info), fields(user = %info.user_id))]
    pub async fn book(self: &Arc<Self>, info: &CommandInfo) -> BookingResult<Arc<Server>> {
        match self.reservations.held_server(&info.user_id).await {
            Ok(Some(_)) => {
                self.reply(info, messages::ALREADY_BOOKED).await;
                return Err(BookingError::AlreadyBooked);
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "Failed to read reservation");
                self.reply(info, messages::SOMETHING_WENT_WRONG).await;
                return Err(e.into());
            }
        }

        let booker = self.booker_for(&info.user_id).await;
        let duration = self.config.booking.duration;

        let server = {
            let _selection = self.selection.lock().await;

            // A concurrent `book` by the same user may have claimed a server
            // without having written the store yet.
            if let Some(held) = self.server_booked_by(&info.user_id).await {
                warn!(server = %held.id(), "User already claimed a server");
                self.reply(info, messages::SOMETHING_WENT_WRONG).await;
                return Err(BookingError::AlreadyBooked);
            }

            let Some(server) = self.pool.get_available_server().await else {
                self.reply(info, messages::NONE_AVAILABLE).await;
                return Err(BookingError::NoAvailableServer);
            };

            if let Err(e) = server.claim(booker, duration).await {
                warn!(server = %server.id(), error = %e, "Lost race for server");
                self.reply(info, messages::SOMETHING_WENT_WRONG).await;
                return Err(e);
            }
            server
        };

        let guard = server.lock_transition().await;

        let state = match server.provision().await {
            Ok(state) => state,
            Err(e) => {
                error!(server = %server.id(), error = %e, "Server setup failed");
                self.reply(info, messages::SOMETHING_WENT_WRONG).await;
                return Err(e);
            }
        };

        if let Err(e) = self.reservations.hold(&info.user_id, server.id()).await {
            error!(server = %server.id(), error = %e, "Failed to record reservation");
            server.reset().await;
            self.reply(info, messages::SOMETHING_WENT_WRONG).await;
            return Err(e.into());
        }

        info!(server = %server.id(), "Booked server");

        let tip = self.config.tips.choose(&mut rand::rng()).cloned();
        let return_at = state.return_at.unwrap_or_else(chrono::Utc::now);
        let details = messages::booking_details(
            server.identity(),
            &state.credentials,
            return_at,
            tip.as_deref(),
        );

        if !info.is_private {
            self.reply(info, messages::DETAILS_SENT).await;
        }
        self.direct(&info.user_id, &details).await;
        self.update_presence().await;

        let coordinator = Arc::clone(self);
        let started = Arc::clone(&server);
        let user_id = info.user_id.clone();
        self.supervisor.spawn("start", async move {
            coordinator.start_booked(started, user_id, guard).await;
        });

        Ok(server)
    }

    /// Detached half of `book`: start the game and compensate on failure.
    async fn start_booked(&self, server: Arc<Server>, user_id: String, guard: OwnedMutexGuard<()>) {
        match server.driver().start(server.identity()).await {
            Ok(()) => info!(server = %server.id(), "Server start complete"),
            Err(e) => {
                error!(server = %server.id(), user = %user_id, error = %e, "Server start failed");
                self.direct(&user_id, messages::START_FAILED).await;
                if let Err(e) = self.reservations.release(&user_id).await {
                    error!(user = %user_id, error = %e, "Failed to clear reservation after start failure");
                }
                server.reset().await;
                self.update_presence().await;
            }
        }
        drop(guard);
    }

    /// The server whose in-memory booker is `user_id`, if any.
    async fn server_booked_by(&self, user_id: &str) -> Option<Arc<Server>> {
        for server in self.pool.get_servers().await {
            if server.booker().await.is_some_and(|b| b.user_id == user_id) {
                return Some(server);
            }
        }
        None
    }

    /// Resolve the server the invoking user holds.
    ///
    /// Replies "not booked" when there is none, clearing stale store entries.
    async fn held(&self, info: &CommandInfo) -> BookingResult<Arc<Server>> {
        let server_id = match self.reservations.held_server(&info.user_id).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                self.reply(info, messages::NOT_BOOKED).await;
                return Err(BookingError::NotBooked);
            }
            Err(e) => {
                error!(user = %info.user_id, error = %e, "Failed to read reservation");
                self.reply(info, messages::SOMETHING_WENT_WRONG).await;
                return Err(e.into());
            }
        };

        match self.pool.get_server_by_id(&server_id).await {
            Some(server) => Ok(server),
            None => {
                warn!(user = %info.user_id, server = %server_id, "Reservation points at unknown server");
                if let Err(e) = self.reservations.forget(&info.user_id).await {
                    error!(user = %info.user_id, error = %e, "Failed to clear stale reservation");
                }
                self.reply(info, messages::NOT_BOOKED).await;
                Err(BookingError::InvalidState(format!("unknown server {server_id}")))
            }
        }
    }

    /// Return the invoking user's server.
    #[instrument(skip(self, info), fields(user = %info.user_id))]
    pub async fn unbook(self: &Arc<Self>, info: &CommandInfo) -> BookingResult<()> {
        let server = self.held(info).await?;
        let guard = server.lock_transition().await;

        let holds_it = server
            .booker()
            .await
            .is_some_and(|b| b.user_id == info.user_id);
        if !holds_it {
            // Already returned by a watchdog while we waited for the lock.
            if let Err(e) = self.reservations.release(&info.user_id).await {
                error!(error = %e, "Failed to clear stale reservation");
            }
            self.reply(info, messages::NOT_BOOKED).await;
            return Err(BookingError::NotBooked);
        }

        if let Err(e) = self.reservations.release(&info.user_id).await {
            error!(server = %server.id(), error = %e, "Failed to clear reservation");
            self.reply(info, messages::SOMETHING_WENT_WRONG).await;
            return Err(e.into());
        }

        let finished = server.unbook().await?;
        info!(server = %server.id(), "Returned server");
        self.reply(info, &messages::returned(server.name())).await;
        self.update_presence().await;

        let coordinator = Arc::clone(self);
        let channel = info.channel_id.clone();
        self.supervisor.spawn("return", async move {
            coordinator
                .wind_down(server, finished, Announce::Channel(channel))
                .await;
            drop(guard);
        });

        Ok(())
    }

    /// Stop the game, publish recordings and record history for a booking
    /// that has already been cleared.
    pub(crate) async fn wind_down(
        &self,
        server: Arc<Server>,
        finished: FinishedBooking,
        announce: Announce,
    ) -> Vec<DemoRef> {
        self.stop_game(&server, &finished.booker).await;
        self.publish_recordings(&server, &finished, announce).await
    }

    /// Stop the game process, alerting the booker and admins on failure.
    pub(crate) async fn stop_game(&self, server: &Server, booker: &Booker) {
        if let Err(e) = server.driver().stop(server.identity()).await {
            error!(server = %server.id(), error = %e, "Server stop failed");
            self.direct(&booker.user_id, messages::STOP_FAILED).await;
            self.notify_admins(&messages::stop_failed_admin(server.name(), &booker.name))
                .await;
        }
    }

    /// Upload recordings, announce them and write the history row.
    pub(crate) async fn publish_recordings(
        &self,
        server: &Server,
        finished: &FinishedBooking,
        announce: Announce,
    ) -> Vec<DemoRef> {
        let demos = match server
            .driver()
            .upload_recordings(server.identity(), Some(&finished.booker.name))
            .await
        {
            Ok(demos) => demos,
            Err(e) => {
                warn!(server = %server.id(), error = %e, "Recording upload failed");
                Vec::new()
            }
        };

        if let Some(summary) = messages::demo_summary(&demos) {
            match &announce {
                Announce::Channel(channel) => {
                    if let Err(e) = self.chat.reply_channel(channel, &summary).await {
                        warn!(error = %e, "Failed to send demo summary");
                    }
                }
                Announce::Broadcast => self.broadcast(&summary).await,
            }
        }

        if let Some(history) = &self.history {
            let record = BookingRecord {
                server_name: server.name().to_string(),
                booker_id: finished.booker.user_id.clone(),
                booker_name: finished.booker.name.clone(),
                booked_at: finished.booked_at,
                unbooked_at: finished.unbooked_at,
                demos: demos.clone(),
            };
            if let Err(e) = history.record_booking(&record).await {
                error!(server = %server.id(), error = %e, "Failed to record booking history");
            }
        }

        demos
    }

    /// Push the invoking user's deadline back by the configured delta.
    #[instrument(skip(self, info), fields(user = %info.user_id))]
    pub async fn extend(&self, info: &CommandInfo) -> BookingResult<chrono::DateTime<chrono::Utc>> {
        let server = self.held(info).await?;
        let limit = self.config.booking.max_extensions;

        if limit > 0 && server.snapshot().await.extensions >= limit {
            self.reply(info, &messages::extension_limit(limit)).await;
            return Err(BookingError::ExtensionLimit(limit));
        }

        let delta = self.config.booking.extend_duration;
        let return_at = match server.extend_booking(delta).await {
            Ok(at) => at,
            Err(e) => {
                self.reply(info, messages::NOT_BOOKED).await;
                return Err(e);
            }
        };

        let rendered = booker_durations::render(delta);
        if let Err(e) = server
            .driver()
            .send_command(server.identity(), &messages::extended_in_game(&rendered))
            .await
        {
            warn!(server = %server.id(), error = %e, "Failed to announce extension in game");
        }

        info!(server = %server.id(), return_at = %return_at, "Extended booking");
        self.reply(info, &messages::extended(server.name(), &rendered, return_at))
            .await;
        Ok(return_at)
    }

    /// Resend the connection details of the invoking user's server.
    #[instrument(skip(self, info), fields(user = %info.user_id))]
    pub async fn send_password(&self, info: &CommandInfo) -> BookingResult<()> {
        let server = self.held(info).await?;
        let credentials = server.credentials().await;

        self.direct(
            &info.user_id,
            &messages::password_details(server.identity(), &credentials),
        )
        .await;
        if !info.is_private {
            self.reply(info, messages::DETAILS_SENT).await;
        }
        Ok(())
    }
}
