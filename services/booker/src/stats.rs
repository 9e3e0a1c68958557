//! Tables for the admin `stats` command.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::db::UsageRow;
use crate::server::Server;

/// Days of history shown by `stats`.
pub const USAGE_WINDOW_DAYS: i32 = 7;

#[derive(Debug, Clone, Tabled)]
pub struct ServerRow {
    #[tabled(rename = "Server")]
    pub name: String,
    #[tabled(rename = "Status")]
    pub status: &'static str,
    #[tabled(rename = "Time left")]
    pub time_left: String,
    #[tabled(rename = "Booker")]
    pub booker: String,
    #[tabled(rename = "Tick rate")]
    pub tick_rate: String,
}

#[derive(Debug, Clone, Tabled)]
struct UsageLine {
    #[tabled(rename = "Server")]
    server: String,
    #[tabled(rename = "Bookings")]
    bookings: i64,
    #[tabled(rename = "Hours")]
    hours: String,
}

/// One row per server at `now`.
pub async fn server_rows(servers: &[Arc<Server>], now: DateTime<Utc>) -> Vec<ServerRow> {
    let mut rows = Vec::with_capacity(servers.len());
    for server in servers {
        let state = server.snapshot().await;
        let (status, time_left) = match state.remaining(now) {
            Some(left) if state.booked => (
                "booked",
                booker_durations::render_secs(left.num_seconds().max(0)),
            ),
            _ => ("available", "-".to_string()),
        };

        rows.push(ServerRow {
            name: server.name().to_string(),
            status,
            time_left,
            booker: state.booker.map(|b| b.name).unwrap_or_else(|| "-".into()),
            tick_rate: format!("{:.2}", state.tick_rate),
        });
    }
    rows
}

pub fn render_servers(rows: &[ServerRow]) -> String {
    if rows.is_empty() {
        return "No servers configured.".to_string();
    }
    Table::new(rows).with(Style::markdown()).to_string()
}

pub fn render_usage(rows: &[UsageRow]) -> String {
    if rows.is_empty() {
        return format!("No bookings in the last {USAGE_WINDOW_DAYS} days.");
    }

    let lines: Vec<UsageLine> = rows
        .iter()
        .map(|row| UsageLine {
            server: row.server_name.clone(),
            bookings: row.bookings,
            hours: format!("{:.1}", row.hours),
        })
        .collect();
    Table::new(lines).with(Style::markdown()).to_string()
}
