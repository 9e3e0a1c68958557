//! Chat-driven reservation broker for a fleet of game servers.
//!
//! Users book, extend and return servers from chat; watchdogs reclaim
//! expired and idle bookings. The crate ships a `booker` binary and exposes
//! its internals for integration testing and alternative front-ends.

pub mod chat;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod dispatch;
pub mod driver;
pub mod env;
pub mod error;
pub mod logserver;
pub mod messages;
pub mod pool;
pub mod query;
pub mod server;
pub mod stats;
pub mod store;
pub mod supervisor;
pub mod updater;

/// Git revision captured at build time, or the package version.
pub fn revision() -> &'static str {
    option_env!("BOOKER_GIT_REVISION").unwrap_or(env!("CARGO_PKG_VERSION"))
}
