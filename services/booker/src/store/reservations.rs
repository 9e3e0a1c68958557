//! Typed view over the key-value store.
//!
//! Key layout:
//! - `user.<user-id>`: held server id, empty when not holding
//! - `server.<id>.tickrate`: average tick rate
//! - `server.<id>.tickrate_samples`: samples behind the average

use std::sync::Arc;

use super::{KeyValueStore, StoreError, StoreResult};

const USER_PREFIX: &str = "user.";

#[derive(Clone)]
pub struct Reservations {
    store: Arc<dyn KeyValueStore>,
}

fn user_key(user_id: &str) -> String {
    format!("{USER_PREFIX}{user_id}")
}

fn tick_rate_key(server_id: &str) -> String {
    format!("server.{server_id}.tickrate")
}

fn tick_rate_samples_key(server_id: &str) -> String {
    format!("server.{server_id}.tickrate_samples")
}

impl Reservations {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Server held by `user_id`, if any.
    pub async fn held_server(&self, user_id: &str) -> StoreResult<Option<String>> {
        Ok(self
            .store
            .get(&user_key(user_id))
            .await?
            .filter(|server| !server.is_empty()))
    }

    pub async fn hold(&self, user_id: &str, server_id: &str) -> StoreResult<()> {
        self.store.set(&user_key(user_id), server_id).await
    }

    pub async fn release(&self, user_id: &str) -> StoreResult<()> {
        self.store.set(&user_key(user_id), "").await
    }

    /// Drop the user's entry entirely, for entries naming servers that no
    /// longer exist.
    pub async fn forget(&self, user_id: &str) -> StoreResult<()> {
        self.store.delete(&user_key(user_id)).await
    }

    /// Every `(user_id, server_id)` pair currently held.
    pub async fn holders(&self) -> StoreResult<Vec<(String, String)>> {
        Ok(self
            .store
            .scan_prefix(USER_PREFIX)
            .await?
            .into_iter()
            .filter(|(_, server)| !server.is_empty())
            .filter_map(|(key, server)| {
                key.strip_prefix(USER_PREFIX)
                    .map(|user| (user.to_string(), server))
            })
            .collect())
    }

    /// Persisted tick-rate average and sample count.
    pub async fn tick_rate(&self, server_id: &str) -> StoreResult<Option<(f64, u64)>> {
        let rate_key = tick_rate_key(server_id);
        let Some(rate) = self.store.get(&rate_key).await? else {
            return Ok(None);
        };
        let rate: f64 = rate.parse().map_err(|_| StoreError::Malformed {
            key: rate_key,
            value: rate.clone(),
        })?;

        let samples_key = tick_rate_samples_key(server_id);
        let samples = match self.store.get(&samples_key).await? {
            Some(value) => value.parse().map_err(|_| StoreError::Malformed {
                key: samples_key,
                value: value.clone(),
            })?,
            None => 1,
        };

        Ok(Some((rate, samples)))
    }

    pub async fn save_tick_rate(&self, server_id: &str, rate: f64, samples: u64) -> StoreResult<()> {
        self.store
            .set(&tick_rate_key(server_id), &rate.to_string())
            .await?;
        self.store
            .set(&tick_rate_samples_key(server_id), &samples.to_string())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn reservations() -> (Arc<MemoryStore>, Reservations) {
        let store = Arc::new(MemoryStore::new());
        (Arc::clone(&store), Reservations::new(store))
    }

    #[tokio::test]
    async fn test_hold_and_release() {
        let (store, r) = reservations();
        assert_eq!(r.held_server("1").await.unwrap(), None);

        r.hold("1", "tf2-1").await.unwrap();
        assert_eq!(r.held_server("1").await.unwrap().as_deref(), Some("tf2-1"));
        assert_eq!(store.get("user.1").await.unwrap().as_deref(), Some("tf2-1"));

        r.release("1").await.unwrap();
        assert_eq!(r.held_server("1").await.unwrap(), None);
        assert_eq!(store.get("user.1").await.unwrap().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_holders_skips_released() {
        let (_, r) = reservations();
        r.hold("1", "tf2-1").await.unwrap();
        r.hold("2", "tf2-2").await.unwrap();
        r.release("2").await.unwrap();

        assert_eq!(
            r.holders().await.unwrap(),
            vec![("1".to_string(), "tf2-1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_tick_rate_round_trip() {
        let (store, r) = reservations();
        assert_eq!(r.tick_rate("tf2-1").await.unwrap(), None);

        r.save_tick_rate("tf2-1", 66.5, 12).await.unwrap();
        assert_eq!(r.tick_rate("tf2-1").await.unwrap(), Some((66.5, 12)));

        store.set("server.tf2-1.tickrate", "fast").await.unwrap();
        assert!(matches!(
            r.tick_rate("tf2-1").await,
            Err(StoreError::Malformed { .. })
        ));
    }
}
