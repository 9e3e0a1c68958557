//! booker
//!
//! Runs the reservation broker against the configured server pool, with a
//! console front-end on stdin/stdout and an optional UDP log server for
//! in-game commands.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use booker::{
    chat::{ChatFrontend, ConsoleFrontend},
    client::BookingApiClient,
    config::{Config, PoolKind},
    coordinator::{Coordinator, CoordinatorParts, WatchdogConfig, WatchdogWorker},
    db::{BookingHistory, Database, DbConfig, HistoryStore},
    dispatch::{ChatDispatcher, GameDispatcher},
    driver::password::PasswordGenerator,
    env::Env,
    logserver::LogServer,
    pool::{ApiPool, ServerPool, StaticPool},
    query::A2sQuery,
    store::{KeyValueStore, MemoryStore, PgKeyValueStore, Reservations},
    supervisor::TaskSupervisor,
    updater::SelfUpdater,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Chat user id the console operator acts as.
const CONSOLE_OPERATOR: &str = "operator";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Config::from_env()?);

    // Initialize tracing (prefer RUST_LOG, fallback to BOOKER_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!(revision = booker::revision(), "Starting booker");
    info!(servers = config.servers.len(), pool = ?config.pool, "Configuration loaded");

    let database = match &config.database {
        Some(db) => Some(connect(&db.url, db.max_connections).await?),
        None => {
            info!("No database configured, booking history disabled");
            None
        }
    };

    let store: Arc<dyn KeyValueStore> = if config.store.is_memory() {
        warn!("Using in-memory reservation store, reservations will not survive restarts");
        Arc::new(MemoryStore::new())
    } else {
        let pool = match (&database, &config.database) {
            (Some(db), Some(db_config)) if db_config.url == config.store.url => db.pool().clone(),
            _ => connect(&config.store.url, 5).await?.pool().clone(),
        };
        Arc::new(PgKeyValueStore::new(pool))
    };

    let history = database
        .as_ref()
        .map(|db| Arc::new(HistoryStore::new(db.pool().clone())) as Arc<dyn BookingHistory>);

    let pool: Arc<dyn ServerPool> = match config.pool {
        PoolKind::Static => Arc::new(StaticPool::from_config(&config)?),
        PoolKind::Api => {
            let api = config
                .api
                .as_ref()
                .context("pool = \"api\" requires an [api] section")?;
            let client = BookingApiClient::new(&api.url, api.retry_attempts)?;
            Arc::new(ApiPool::new(
                client,
                api.tag.clone(),
                Arc::new(PasswordGenerator::new()),
                config.booking.kick_message.clone(),
                config.booking.tick_rate_target,
            ))
        }
    };
    pool.initialise().await.context("Failed to initialise server pool")?;

    let console = Arc::new(ConsoleFrontend::new(
        CONSOLE_OPERATOR,
        config.commands.admin_permissions,
    ));
    let supervisor = Arc::new(TaskSupervisor::new());

    let coordinator = Coordinator::new(CoordinatorParts {
        config: Arc::clone(&config),
        pool: Arc::clone(&pool),
        reservations: Reservations::new(store),
        chat: Arc::clone(&console) as Arc<dyn ChatFrontend>,
        query: Arc::new(A2sQuery::new(config.query_timeout)),
        history,
        supervisor: Arc::clone(&supervisor),
    });

    let report = coordinator
        .sync_from_store()
        .await
        .context("Failed to load reservations")?;
    info!(%report, "Reservations loaded");

    let updater = config
        .updater
        .as_ref()
        .map(SelfUpdater::new)
        .transpose()?;

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, _) = watch::channel(false);
    let env = Env::new(Arc::clone(&coordinator), updater, shutdown_tx);

    let worker = WatchdogWorker::new(Arc::clone(&coordinator), WatchdogConfig::default());
    let worker_handle = tokio::spawn({
        let shutdown_rx = env.subscribe_shutdown();
        async move {
            worker.run(shutdown_rx).await;
        }
    });

    let log_handle = match &config.log_server {
        Some(log) => {
            let addr: SocketAddr = format!("{}:{}", log.log_address, log.log_port)
                .parse()
                .context("Invalid log server address")?;
            let server = LogServer::bind(
                addr,
                Arc::clone(&pool),
                Arc::new(GameDispatcher::new(Arc::clone(&env))),
                Arc::clone(&supervisor),
            )
            .await
            .context("Failed to bind log server")?;
            let shutdown_rx = env.subscribe_shutdown();
            Some(tokio::spawn(async move { server.run(shutdown_rx).await }))
        }
        None => None,
    };

    coordinator.update_presence().await;

    let dispatcher = ChatDispatcher::new(Arc::clone(&env));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shutdown = env.subscribe_shutdown();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    dispatcher.handle(&console.event(&line)).await;
                }
                Ok(None) => {
                    info!("Console input closed, serving until shutdown");
                    stdin_open = false;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read console input");
                    break;
                }
            },
        }
    }

    // Signal shutdown to all workers
    env.request_shutdown();

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);

    if tokio::time::timeout(shutdown_timeout, worker_handle).await.is_err() {
        warn!("Watchdog worker did not shut down in time");
    }
    if let Some(handle) = log_handle {
        if tokio::time::timeout(shutdown_timeout, handle).await.is_err() {
            warn!("Log server did not shut down in time");
        }
    }
    if tokio::time::timeout(Duration::from_secs(60), supervisor.drain())
        .await
        .is_err()
    {
        warn!(in_flight = supervisor.in_flight(), "Detached work did not finish in time");
    }

    info!("booker shutdown complete");
    Ok(())
}

async fn connect(url: &str, max_connections: u32) -> Result<Database> {
    let db = match Database::connect(&DbConfig::new(url, max_connections)).await {
        Ok(db) => {
            info!("Database connection established");
            db
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    if let Err(e) = db.run_migrations().await {
        error!(error = %e, "Failed to run migrations");
        return Err(e.into());
    }
    Ok(db)
}
