//! Server pools.
//!
//! A pool owns the server records and answers lookups. It does not track
//! reservations itself; availability is whatever each record says.

mod api_pool;
mod static_pool;

pub use api_pool::ApiPool;
pub use static_pool::{build_driver, StaticPool};

use std::sync::Arc;

use async_trait::async_trait;

use crate::driver::DriverResult;
use crate::server::Server;

/// Tick rate servers are ranked against during selection.
pub const DEFAULT_TICK_RATE_TARGET: f64 = 66.666_666;

/// Lookup and selection over a set of servers.
#[async_trait]
pub trait ServerPool: Send + Sync {
    /// Load or probe the initial server set.
    async fn initialise(&self) -> DriverResult<()>;

    /// Refresh the cached server set; a no-op for fixed pools.
    async fn refresh(&self) -> DriverResult<()> {
        Ok(())
    }

    /// Every known server, in iteration order.
    async fn get_servers(&self) -> Vec<Arc<Server>>;

    /// Servers that may be offered to a new booking.
    async fn get_available_servers(&self) -> Vec<Arc<Server>> {
        let mut available = Vec::new();
        for server in self.get_servers().await {
            if server.is_available().await {
                available.push(server);
            }
        }
        available
    }

    /// The best available server for a new booking, if any.
    async fn get_available_server(&self) -> Option<Arc<Server>>;

    async fn get_booked_servers(&self) -> Vec<Arc<Server>> {
        let mut booked = Vec::new();
        for server in self.get_servers().await {
            if server.is_booked().await {
                booked.push(server);
            }
        }
        booked
    }

    async fn get_server_by_id(&self, id: &str) -> Option<Arc<Server>> {
        self.get_servers().await.into_iter().find(|s| s.id() == id)
    }

    async fn get_server_by_address(&self, address: &str) -> Option<Arc<Server>> {
        self.get_servers()
            .await
            .into_iter()
            .find(|s| s.identity().address == address)
    }

    /// Case-insensitive lookup by session name.
    async fn get_server_by_session_name(&self, session_name: &str) -> Option<Arc<Server>> {
        self.get_servers()
            .await
            .into_iter()
            .find(|s| s.identity().session_name.eq_ignore_ascii_case(session_name))
    }

    /// Case-insensitive lookup by display name.
    async fn get_server_by_name(&self, name: &str) -> Option<Arc<Server>> {
        self.get_servers()
            .await
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
    }
}

/// Pick the server whose tick rate is closest to `target`.
///
/// Ties go to the earliest server in iteration order.
pub async fn select_best(servers: &[Arc<Server>], target: f64) -> Option<Arc<Server>> {
    let mut best: Option<(f64, &Arc<Server>)> = None;
    for server in servers {
        let distance = (server.tick_rate().await - target).abs();
        match best {
            Some((best_distance, _)) if distance >= best_distance => {}
            _ => best = Some((distance, server)),
        }
    }
    best.map(|(_, server)| Arc::clone(server))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Driver, MockDriver};
    use crate::server::ServerIdentity;
    use rstest::rstest;

    async fn server(id: &str, tick_rate: f64) -> Arc<Server> {
        let server = Server::new(
            ServerIdentity {
                id: id.into(),
                name: id.into(),
                address: format!("{id}:27015"),
                stv_address: format!("{id}:27020"),
                session_name: id.into(),
            },
            Driver::Mock(MockDriver::new()),
        );
        server.set_tick_rate(tick_rate, 1).await;
        Arc::new(server)
    }

    #[rstest]
    #[case(vec![60.0, 66.0, 66.6666], "s2")]
    #[case(vec![66.6666, 66.0, 60.0], "s0")]
    #[case(vec![66.0, 67.0, 10.0], "s1")]
    #[case(vec![100.0, 33.0], "s0")]
    #[tokio::test]
    async fn test_select_best(#[case] rates: Vec<f64>, #[case] expected: &str) {
        let mut servers = Vec::new();
        for (i, rate) in rates.into_iter().enumerate() {
            servers.push(server(&format!("s{i}"), rate).await);
        }
        let best = select_best(&servers, DEFAULT_TICK_RATE_TARGET).await.unwrap();
        assert_eq!(best.id(), expected);
    }

    #[tokio::test]
    async fn test_select_best_ties_use_iteration_order() {
        let servers = vec![server("a", 66.0).await, server("b", 66.0).await];
        let best = select_best(&servers, DEFAULT_TICK_RATE_TARGET).await.unwrap();
        assert_eq!(best.id(), "a");
    }

    #[tokio::test]
    async fn test_select_best_empty() {
        assert!(select_best(&[], DEFAULT_TICK_RATE_TARGET).await.is_none());
    }
}
