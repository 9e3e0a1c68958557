//! Pool backed by the external booking API.
//!
//! The API hands out one free server per `next` call. Every server it has
//! ever offered stays in the cache so reservations and counters survive a
//! refresh; only the servers offered by the latest refresh are available.
//! Since `next` returns a single server, at most one server is ever
//! available at a time, and presence reports "1 server available" even when
//! the API holds more. The watchdog refreshes the pool every minute.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{select_best, ServerPool};
use crate::client::{ApiServer, BookingApiClient};
use crate::driver::password::PasswordGenerator;
use crate::driver::{ApiDriver, Driver, DriverResult};
use crate::server::{Server, ServerIdentity};

pub struct ApiPool {
    client: BookingApiClient,
    tag: String,
    passwords: Arc<PasswordGenerator>,
    kick_message: String,
    tick_rate_target: f64,
    cache: RwLock<Vec<Arc<Server>>>,
    offered: RwLock<HashSet<String>>,
}

impl ApiPool {
    pub fn new(
        client: BookingApiClient,
        tag: impl Into<String>,
        passwords: Arc<PasswordGenerator>,
        kick_message: impl Into<String>,
        tick_rate_target: f64,
    ) -> Self {
        Self {
            client,
            tag: tag.into(),
            passwords,
            kick_message: kick_message.into(),
            tick_rate_target,
            cache: RwLock::new(Vec::new()),
            offered: RwLock::new(HashSet::new()),
        }
    }

    fn new_server(&self, handle: ApiServer) -> Server {
        let identity = ServerIdentity {
            id: handle.uuid.clone(),
            name: handle.name.clone(),
            address: handle.address(),
            stv_address: handle.stv_address(),
            session_name: handle.name.to_lowercase().replace(' ', "-"),
        };
        let driver = ApiDriver::new(
            self.client.clone(),
            Arc::clone(&self.passwords),
            handle,
            self.kick_message.clone(),
        );
        Server::new(identity, Driver::Api(driver))
    }

    /// Insert a newly seen server or refresh the handle of a cached one.
    async fn upsert(&self, handle: ApiServer) {
        let mut cache = self.cache.write().await;
        if let Some(existing) = cache.iter().find(|s| s.id() == handle.uuid) {
            if let Some(driver) = existing.driver().as_api() {
                driver.refresh(handle);
            }
            return;
        }

        info!(server = %handle.uuid, name = %handle.name, "Discovered API server");
        cache.push(Arc::new(self.new_server(handle)));
    }
}

#[async_trait]
impl ServerPool for ApiPool {
    async fn initialise(&self) -> DriverResult<()> {
        self.refresh().await
    }

    async fn refresh(&self) -> DriverResult<()> {
        let next = self.client.next(&self.tag).await?;

        let mut offered = HashSet::new();
        if let Some(handle) = next {
            offered.insert(handle.uuid.clone());
            self.upsert(handle).await;
        }

        debug!(offered = offered.len(), "Refreshed API pool");
        *self.offered.write().await = offered;
        Ok(())
    }

    async fn get_servers(&self) -> Vec<Arc<Server>> {
        self.cache.read().await.clone()
    }

    async fn get_available_servers(&self) -> Vec<Arc<Server>> {
        let offered = self.offered.read().await.clone();
        let mut available = Vec::new();
        for server in self.get_servers().await {
            if offered.contains(server.id()) && server.is_available().await {
                available.push(server);
            }
        }
        available
    }

    async fn get_available_server(&self) -> Option<Arc<Server>> {
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Failed to refresh API pool");
            return None;
        }

        let available = self.get_available_servers().await;
        select_best(&available, self.tick_rate_target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Booker;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn server_json(uuid: &str) -> serde_json::Value {
        serde_json::json!({
            "uuid": uuid,
            "name": format!("API {uuid}"),
            "ip_address": "10.1.1.1",
            "port": 27015,
            "stv_port": 27020
        })
    }

    fn pool(uri: &str) -> ApiPool {
        ApiPool::new(
            BookingApiClient::new(uri, 1).unwrap(),
            "eu",
            Arc::new(PasswordGenerator::seeded(3)),
            "bye",
            super::super::DEFAULT_TICK_RATE_TARGET,
        )
    }

    #[tokio::test]
    async fn test_refresh_keeps_counters_and_drops_unoffered() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/servers/next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(server_json("a")))
            .up_to_n_times(1)
            .mount(&mock)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/servers/next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(server_json("b")))
            .mount(&mock)
            .await;

        let pool = pool(&mock.uri());
        let first = pool.get_available_server().await.unwrap();
        assert_eq!(first.id(), "a");
        first.record_players(0, 6).await;

        let second = pool.get_available_server().await.unwrap();
        assert_eq!(second.id(), "b");
        assert_eq!(pool.get_servers().await.len(), 2);

        let cached = pool.get_server_by_id("a").await.unwrap();
        assert_eq!(cached.snapshot().await.idle_minutes, 1);
        assert!(Arc::ptr_eq(&cached, &first));
    }

    #[tokio::test]
    async fn test_no_content_means_none_available() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/servers/next"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock)
            .await;

        let pool = pool(&mock.uri());
        assert!(pool.get_available_server().await.is_none());
    }

    #[tokio::test]
    async fn test_booked_server_not_offered_again() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/servers/next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(server_json("a")))
            .mount(&mock)
            .await;

        let pool = pool(&mock.uri());
        let server = pool.get_available_server().await.unwrap();
        server
            .claim(Booker::new("1", "alice"), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(pool.get_available_server().await.is_none());
        assert_eq!(pool.get_booked_servers().await.len(), 1);
    }
}
