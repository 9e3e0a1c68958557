//! Booking history.
//!
//! Finished bookings are appended with their recordings; `stats` reads back
//! per-server usage. Rows reference each other by key only.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

use super::DbError;
use crate::driver::DemoRef;

/// A finished booking.
#[derive(Debug, Clone)]
pub struct BookingRecord {
    pub server_name: String,
    /// Chat user id of the booker.
    pub booker_id: String,
    pub booker_name: String,
    pub booked_at: DateTime<Utc>,
    pub unbooked_at: DateTime<Utc>,
    pub demos: Vec<DemoRef>,
}

/// Per-server usage over a window.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRow {
    pub server_name: String,
    pub bookings: i64,
    pub hours: f64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for UsageRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            server_name: row.try_get("server_name")?,
            bookings: row.try_get("bookings")?,
            hours: row.try_get("hours")?,
        })
    }
}

#[async_trait]
pub trait BookingHistory: Send + Sync {
    async fn record_booking(&self, record: &BookingRecord) -> Result<(), DbError>;

    /// Usage per server over the last `days` days, sorted by server name.
    async fn recent_usage(&self, days: i32) -> Result<Vec<UsageRow>, DbError>;
}

/// Postgres history store.
#[derive(Clone)]
pub struct HistoryStore {
    pool: PgPool,
}

impl HistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingHistory for HistoryStore {
    async fn record_booking(&self, record: &BookingRecord) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        let user_id: i64 = sqlx::query(
            r#"
            INSERT INTO users (name, discord_id)
            VALUES ($1, $2)
            ON CONFLICT (discord_id) DO UPDATE SET name = EXCLUDED.name
            RETURNING user_id
            "#,
        )
        .bind(&record.booker_name)
        .bind(&record.booker_id)
        .fetch_one(&mut *tx)
        .await
        .and_then(|row| row.try_get("user_id"))
        .map_err(DbError::Query)?;

        let booking_id: i64 = sqlx::query(
            r#"
            INSERT INTO bookings (booker_id, server_name, booked_time, unbooked_time)
            VALUES ($1, $2, $3, $4)
            RETURNING booking_id
            "#,
        )
        .bind(user_id)
        .bind(&record.server_name)
        .bind(record.booked_at)
        .bind(record.unbooked_at)
        .fetch_one(&mut *tx)
        .await
        .and_then(|row| row.try_get("booking_id"))
        .map_err(DbError::Query)?;

        for demo in &record.demos {
            let demo_id: i64 = sqlx::query(
                r#"
                INSERT INTO demos (booking_id, name, map_name, configuration, url, uploaded_time)
                VALUES ($1, $2, $3, '', $4, $5)
                RETURNING demo_id
                "#,
            )
            .bind(booking_id)
            .bind(&demo.name)
            .bind(&demo.map_name)
            .bind(&demo.url)
            .bind(demo.uploaded_at)
            .fetch_one(&mut *tx)
            .await
            .and_then(|row| row.try_get("demo_id"))
            .map_err(DbError::Query)?;

            sqlx::query("INSERT INTO demo_users (demo_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(demo_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::Query)?;
        }

        tx.commit().await.map_err(DbError::Query)?;
        debug!(
            booking_id,
            server = %record.server_name,
            demos = record.demos.len(),
            "Recorded booking"
        );
        Ok(())
    }

    async fn recent_usage(&self, days: i32) -> Result<Vec<UsageRow>, DbError> {
        sqlx::query_as::<_, UsageRow>(
            r#"
            SELECT server_name,
                   COUNT(*) AS bookings,
                   (COALESCE(SUM(EXTRACT(EPOCH FROM (unbooked_time - booked_time))), 0) / 3600.0)::float8 AS hours
            FROM bookings
            WHERE booked_time >= now() - make_interval(days => $1)
            GROUP BY server_name
            ORDER BY server_name
            "#,
        )
        .bind(days)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)
    }
}

/// In-memory history for tests.
#[derive(Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<BookingRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<BookingRecord> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BookingHistory for MemoryHistory {
    async fn record_booking(&self, record: &BookingRecord) -> Result<(), DbError> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    async fn recent_usage(&self, days: i32) -> Result<Vec<UsageRow>, DbError> {
        let since = Utc::now() - TimeDelta::days(i64::from(days));
        let mut rows: Vec<UsageRow> = Vec::new();

        for record in self.records().iter().filter(|r| r.booked_at >= since) {
            let hours = (record.unbooked_at - record.booked_at).num_seconds() as f64 / 3600.0;
            match rows.iter_mut().find(|r| r.server_name == record.server_name) {
                Some(row) => {
                    row.bookings += 1;
                    row.hours += hours;
                }
                None => rows.push(UsageRow {
                    server_name: record.server_name.clone(),
                    bookings: 1,
                    hours,
                }),
            }
        }

        rows.sort_by(|a, b| a.server_name.cmp(&b.server_name));
        Ok(rows)
    }
}
