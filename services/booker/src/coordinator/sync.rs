//! Reconciliation of in-memory records with the reservation store.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::Coordinator;
use crate::error::BookingResult;

/// Outcome of a reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Servers marked booked from a store entry.
    pub restored: usize,
    /// Servers booked in memory with no store entry, now freed.
    pub released: usize,
    /// Store entries naming servers the pool does not know.
    pub cleared: usize,
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "restored {}, released {}, cleared {}",
            self.restored, self.released, self.cleared
        )
    }
}

impl Coordinator {
    /// Re-read reservations from the store and make the pool agree.
    ///
    /// The store wins: every `user.*` entry marks its server booked, any
    /// other booked server is freed without touching the game process.
    #[instrument(skip(self))]
    pub async fn sync_from_store(self: &Arc<Self>) -> BookingResult<SyncReport> {
        if let Err(e) = self.pool.refresh().await {
            warn!(error = %e, "Pool refresh failed, reconciling cached servers");
        }

        let holders = self.reservations.holders().await?;
        let mut report = SyncReport::default();
        let mut held = HashSet::new();

        for (user_id, server_id) in holders {
            let Some(server) = self.pool.get_server_by_id(&server_id).await else {
                warn!(user = %user_id, server = %server_id, "Clearing reservation for unknown server");
                self.reservations.forget(&user_id).await?;
                report.cleared += 1;
                continue;
            };

            if !held.insert(server_id.clone()) {
                warn!(user = %user_id, server = %server_id, "Server held by more than one user");
                self.reservations.release(&user_id).await?;
                report.cleared += 1;
                continue;
            }

            let _guard = server.lock_transition().await;
            let current = server.booker().await;
            if current.is_none_or(|b| b.user_id != user_id) {
                let booker = self.booker_for(&user_id).await;
                server.restore(booker, self.config.booking.duration).await;
                report.restored += 1;
            }
        }

        for server in self.pool.get_servers().await {
            if held.contains(server.id()) {
                continue;
            }
            let _guard = server.lock_transition().await;
            if server.is_booked().await {
                info!(server = %server.id(), "Releasing server with no reservation");
                server.reset().await;
                report.released += 1;
            }
        }

        for server in self.pool.get_servers().await {
            match self.reservations.tick_rate(server.id()).await {
                Ok(Some((rate, samples))) => server.set_tick_rate(rate, samples).await,
                Ok(None) => {}
                Err(e) => warn!(server = %server.id(), error = %e, "Failed to load tick rate"),
            }
        }

        info!(
            restored = report.restored,
            released = report.released,
            cleared = report.cleared,
            "Synchronised with reservation store"
        );
        self.update_presence().await;
        Ok(report)
    }
}
