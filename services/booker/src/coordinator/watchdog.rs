//! Periodic watchdog ticks.
//!
//! Each tick takes a snapshot of the booked servers, spawns one supervised
//! task per server and returns. Slow work on one server never delays the
//! next tick or other servers.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::booking::Announce;
use super::Coordinator;
use crate::driver::ControlPlane;
use crate::messages;
use crate::query::QueryError;
use crate::server::Server;

/// Console lines read back after `stats`.
const STATS_LINES: usize = 5;

/// Why a booking was ended by the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnReason {
    Expired,
    Idle,
}

impl ReturnReason {
    fn as_str(&self) -> &'static str {
        match self {
            ReturnReason::Expired => "time expired",
            ReturnReason::Idle => "idle timeout",
        }
    }
}

/// Extract the FPS column from `stats` console output.
pub fn parse_stats_fps(lines: &[String]) -> Option<f64> {
    let header_idx = lines.iter().rposition(|line| {
        line.split_whitespace().any(|col| col == "FPS")
    })?;
    let column = lines[header_idx]
        .split_whitespace()
        .position(|col| col == "FPS")?;

    lines
        .get(header_idx + 1)?
        .split_whitespace()
        .nth(column)?
        .parse()
        .ok()
        .filter(|fps: &f64| fps.is_finite() && *fps > 0.0)
}

impl Coordinator {
    /// Once a minute: deadlines, idle accrual, tick-rate samples, then a pool
    /// refresh and presence.
    #[instrument(skip(self))]
    pub async fn minute_tick(self: &Arc<Self>) {
        let booked = self.pool.get_booked_servers().await;
        debug!(booked = booked.len(), "Minute tick");

        for server in booked {
            let coordinator = Arc::clone(self);
            self.supervisor.spawn("minute-check", async move {
                coordinator.check_server(server).await;
            });
        }

        if let Err(e) = self.pool.refresh().await {
            warn!(error = %e, "Pool refresh failed, presence may be stale");
        }
        self.update_presence().await;
    }

    async fn check_server(self: &Arc<Self>, server: Arc<Server>) {
        let state = server.snapshot().await;
        if !state.booked {
            return;
        }

        if state.return_at.is_some_and(|at| Utc::now() >= at) {
            self.auto_return(&server, ReturnReason::Expired).await;
            return;
        }

        let info = match self.query.info(&server.identity().address).await {
            Ok(info) => info,
            Err(e) => {
                self.handle_query_error(&server, &e).await;
                return;
            }
        };

        let booking = &self.config.booking;
        let idle = server.record_players(info.humans(), booking.min_players).await;

        if idle >= booking.max_idle_minutes {
            self.auto_return(&server, ReturnReason::Idle).await;
            return;
        }

        let warn_at = booking
            .max_idle_minutes
            .saturating_sub(booking.idle_warning_minutes);
        if booking.idle_warning_minutes > 0 && idle >= warn_at && server.take_idle_warning().await {
            if let Some(booker) = &state.booker {
                let remaining = booking.max_idle_minutes - idle;
                self.direct(&booker.user_id, &messages::idle_warning(server.name(), remaining))
                    .await;
            }
        }

        self.sample_tick_rate(&server).await;
    }

    /// Count a failed query and page admins at the threshold.
    pub async fn handle_query_error(&self, server: &Server, err: &QueryError) {
        debug!(server = %server.id(), error = %err, "Server query failed");
        let Some(attempts) = server
            .record_query_error(self.config.booking.error_threshold)
            .await
        else {
            return;
        };

        warn!(server = %server.id(), attempts, "Server repeatedly failed queries");
        let booker = server.booker().await.map(|b| b.name);
        self.notify_admins(&messages::query_failures(
            server.name(),
            attempts,
            booker.as_deref(),
        ))
        .await;
    }

    /// Measure the server's tick rate and persist the running average.
    async fn sample_tick_rate(&self, server: &Server) {
        let driver = server.driver();
        if let Err(e) = driver.send_command(server.identity(), "stats").await {
            debug!(server = %server.id(), error = %e, "Could not request stats");
            return;
        }

        let lines = match driver.console_read(server.identity(), STATS_LINES).await {
            Ok(lines) => lines,
            Err(e) => {
                debug!(server = %server.id(), error = %e, "Could not read console");
                return;
            }
        };

        let Some(fps) = parse_stats_fps(&lines) else {
            return;
        };

        let (average, samples) = server.record_tick_rate(fps).await;
        if let Err(e) = self
            .reservations
            .save_tick_rate(server.id(), average, samples)
            .await
        {
            warn!(server = %server.id(), error = %e, "Failed to persist tick rate");
        }
    }

    /// End a booking from the watchdog.
    ///
    /// A no-op when the server was returned while waiting for the
    /// transition lock.
    pub async fn auto_return(&self, server: &Arc<Server>, reason: ReturnReason) {
        let _guard = server.lock_transition().await;
        let Some(booker) = server.booker().await else {
            return;
        };

        info!(server = %server.id(), reason = reason.as_str(), "Auto-returning server");
        self.stop_game(server, &booker).await;

        let finished = match server.unbook().await {
            Ok(finished) => finished,
            Err(e) => {
                warn!(server = %server.id(), error = %e, "Server was returned during stop");
                return;
            }
        };

        if let Err(e) = self.reservations.release(&finished.booker.user_id).await {
            // The record is already clear; `sync` repairs the stale entry.
            warn!(user = %finished.booker.user_id, error = %e, "Failed to clear reservation");
        }

        self.publish_recordings(server, &finished, Announce::Broadcast)
            .await;

        let text = match reason {
            ReturnReason::Expired => {
                messages::auto_returned_expired(&finished.booker.mention, server.name())
            }
            ReturnReason::Idle => messages::auto_returned_idle(&finished.booker.mention, server.name()),
        };
        self.broadcast(&text).await;
        self.update_presence().await;
    }

    /// Every ten seconds: warn about external lobby use.
    #[instrument(skip(self))]
    pub async fn lobby_tick(self: &Arc<Self>) {
        for server in self.pool.get_booked_servers().await {
            let coordinator = Arc::clone(self);
            self.supervisor.spawn("lobby-check", async move {
                coordinator.check_lobby(&server).await;
            });
        }
    }

    async fn check_lobby(&self, server: &Server) {
        let markers = &self.config.booking.lobby_markers;
        if markers.is_empty() {
            return;
        }

        let Ok(info) = self.query.info(&server.identity().address).await else {
            return;
        };

        if info.has_keyword(markers) && server.take_lobby_warning().await {
            if let Some(booker) = server.booker().await {
                info!(server = %server.id(), "Server looks like a lobby server");
                self.broadcast(&messages::lobby_warning(&booker.mention, server.name()))
                    .await;
            }
        }
    }

    /// Every ten seconds: warn bookers whose deadline is close.
    #[instrument(skip(self))]
    pub async fn return_warning_tick(self: &Arc<Self>) {
        let window = self.config.booking.warning_duration;
        let now = Utc::now();

        for server in self.pool.get_booked_servers().await {
            let Some(remaining) = server.take_return_warning(now, window).await else {
                continue;
            };
            let Some(booker) = server.booker().await else {
                continue;
            };

            let coordinator = Arc::clone(self);
            self.supervisor.spawn("return-warning", async move {
                let rendered = booker_durations::render_secs(remaining.num_seconds());
                coordinator
                    .direct(&booker.user_id, &messages::return_warning(server.name(), &rendered))
                    .await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_parse_stats_fps() {
        let output = lines(
            "stats\n\
             CPU    In_(KB/s)  Out_(KB/s)  Uptime  Map_changes  FPS      Players  Connects\n\
             0.00   0.00       0.00        12      0            66.67    0        0",
        );
        assert_eq!(parse_stats_fps(&output), Some(66.67));
    }

    #[test]
    fn test_parse_stats_fps_missing() {
        assert_eq!(parse_stats_fps(&lines("Unknown command \"stats\"")), None);
        assert_eq!(parse_stats_fps(&lines("CPU FPS\n")), None);
        assert_eq!(parse_stats_fps(&lines("CPU FPS\n0.0 nan")), None);
    }
}
