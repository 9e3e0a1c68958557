//! Shared fixture for coordinator integration tests.
//!
//! Wires a coordinator to mock drivers, the in-memory store, a scripted game
//! query and a recording chat front-end.

#![allow(dead_code)]

use std::sync::Arc;

use booker::chat::{CommandInfo, RecordingFrontend};
use booker::config::Config;
use booker::coordinator::{Coordinator, CoordinatorParts};
use booker::db::MemoryHistory;
use booker::driver::{Driver, MockDriver};
use booker::env::Env;
use booker::pool::{ServerPool, StaticPool, DEFAULT_TICK_RATE_TARGET};
use booker::query::MockQuery;
use booker::server::{Server, ServerIdentity};
use booker::store::{MemoryStore, Reservations};
use booker::supervisor::TaskSupervisor;
use tokio::sync::watch;

pub const CHANNEL: &str = "bookings";
pub const BROADCAST: &str = "announcements";
pub const ADMIN: &str = "admin-1";

pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub pool: Arc<dyn ServerPool>,
    pub servers: Vec<Arc<Server>>,
    pub drivers: Vec<MockDriver>,
    pub chat: Arc<RecordingFrontend>,
    pub store: Arc<MemoryStore>,
    pub reservations: Reservations,
    pub query: Arc<MockQuery>,
    pub history: Arc<MemoryHistory>,
    pub supervisor: Arc<TaskSupervisor>,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.discord.default_channel = BROADCAST.to_string();
    config.discord.notification_users = vec![ADMIN.to_string()];
    config.discord.demos_url = "https://demos.example.com".to_string();
    config
}

pub fn address(index: usize) -> String {
    format!("10.0.0.{}:27015", index + 1)
}

pub fn harness(servers: usize) -> Harness {
    harness_with(servers, test_config())
}

pub fn harness_with(count: usize, config: Config) -> Harness {
    let drivers: Vec<MockDriver> = (0..count).map(|_| MockDriver::new()).collect();
    let servers: Vec<Arc<Server>> = drivers
        .iter()
        .enumerate()
        .map(|(i, driver)| {
            Arc::new(Server::new(
                ServerIdentity {
                    id: format!("s{}", i + 1),
                    name: format!("Server {}", i + 1),
                    address: address(i),
                    stv_address: format!("10.0.0.{}:27020", i + 1),
                    session_name: format!("s{}", i + 1),
                },
                Driver::Mock(driver.clone()),
            ))
        })
        .collect();

    let pool: Arc<dyn ServerPool> =
        Arc::new(StaticPool::new(servers.clone(), DEFAULT_TICK_RATE_TARGET));
    let chat = Arc::new(RecordingFrontend::new("bot"));
    let store = Arc::new(MemoryStore::new());
    let reservations = Reservations::new(store.clone());
    let query = Arc::new(MockQuery::new());
    let history = Arc::new(MemoryHistory::new());
    let supervisor = Arc::new(TaskSupervisor::new());

    let coordinator = Coordinator::new(CoordinatorParts {
        config: Arc::new(config),
        pool: Arc::clone(&pool),
        reservations: reservations.clone(),
        chat: chat.clone(),
        query: query.clone(),
        history: Some(history.clone()),
        supervisor: Arc::clone(&supervisor),
    });

    Harness {
        coordinator,
        pool,
        servers,
        drivers,
        chat,
        store,
        reservations,
        query,
        history,
        supervisor,
    }
}

impl Harness {
    pub fn env(&self) -> Arc<Env> {
        let (shutdown, _) = watch::channel(false);
        Env::new(Arc::clone(&self.coordinator), None, shutdown)
    }

    /// Wait for all detached work.
    pub async fn settle(&self) {
        self.supervisor.drain().await;
    }

    pub async fn minute_tick(&self) {
        self.coordinator.minute_tick().await;
        self.settle().await;
    }
}

pub fn info(user: &str) -> CommandInfo {
    CommandInfo {
        user_id: user.to_string(),
        channel_id: CHANNEL.to_string(),
        is_private: false,
        permissions: 0,
    }
}
