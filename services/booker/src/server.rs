//! In-memory server records.
//!
//! A [`Server`] is owned by the pool for the life of the process. Its
//! reservation fields live behind an async `RwLock`; whole transitions
//! (book, return, auto-return) are additionally serialised through a
//! per-server transition mutex so that a watchdog return and a user return
//! can never interleave.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};

use crate::driver::{ControlPlane, Driver};
use crate::error::{BookingError, BookingResult};

/// Stable identity and addressing of a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    /// Stable key: the API UUID, or the session name for static servers.
    pub id: String,
    pub name: String,
    /// Game endpoint (`host:port`).
    pub address: String,
    /// Spectator endpoint (`host:port`).
    pub stv_address: String,
    /// Terminal multiplexer session tag.
    pub session_name: String,
}

/// The user holding a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booker {
    pub user_id: String,
    /// Chat mention, e.g. `<@1234>`.
    pub mention: String,
    pub name: String,
}

impl Booker {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            mention: format!("<@{user_id}>"),
            user_id,
            name: name.into(),
        }
    }
}

/// Passwords applied to a server by the last `setup`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub rcon_password: String,
    pub server_password: String,
}

/// Mutable state of a server record.
#[derive(Debug, Clone, Default)]
pub struct ServerState {
    pub credentials: Credentials,

    /// Running average of measured tick rate.
    pub tick_rate: f64,
    pub tick_rate_samples: u64,

    pub booked: bool,
    pub booked_at: Option<DateTime<Utc>>,
    pub return_at: Option<DateTime<Utc>>,
    pub booker: Option<Booker>,

    pub idle_minutes: u32,
    pub error_minutes: u32,

    pub sent_idle_warning: bool,
    pub sent_lobby_warning: bool,
    pub sent_return_warning: bool,

    /// Number of `extend` calls applied to the current booking.
    pub extensions: u32,
}

impl ServerState {
    fn clear_reservation(&mut self) {
        self.booked = false;
        self.booked_at = None;
        self.return_at = None;
        self.booker = None;
        self.idle_minutes = 0;
        self.error_minutes = 0;
        self.sent_idle_warning = false;
        self.sent_lobby_warning = false;
        self.sent_return_warning = false;
        self.extensions = 0;
    }

    /// Time until the return deadline; negative once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.return_at.map(|at| at - now)
    }
}

/// A booking that just ended.
#[derive(Debug, Clone)]
pub struct FinishedBooking {
    pub booker: Booker,
    pub booked_at: DateTime<Utc>,
    pub unbooked_at: DateTime<Utc>,
}

/// One reservable server.
pub struct Server {
    identity: ServerIdentity,
    driver: Driver,
    state: RwLock<ServerState>,
    transition: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("identity", &self.identity)
            .field("driver", &self.driver.kind())
            .finish_non_exhaustive()
    }
}

pub(crate) fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

fn add(at: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Server {
    pub fn new(identity: ServerIdentity, driver: Driver) -> Self {
        Self {
            identity,
            driver,
            state: RwLock::new(ServerState::default()),
            transition: Arc::new(Mutex::new(())),
        }
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Acquire the per-server transition lock.
    ///
    /// The guard is owned so it can move into a detached task (async start,
    /// stop and upload) and is released when that work finishes.
    pub async fn lock_transition(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.transition).lock_owned().await
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> ServerState {
        self.state.read().await.clone()
    }

    pub async fn is_available(&self) -> bool {
        !self.state.read().await.booked
    }

    pub async fn is_booked(&self) -> bool {
        self.state.read().await.booked
    }

    pub async fn booker(&self) -> Option<Booker> {
        self.state.read().await.booker.clone()
    }

    pub async fn credentials(&self) -> Credentials {
        self.state.read().await.credentials.clone()
    }

    pub async fn tick_rate(&self) -> f64 {
        self.state.read().await.tick_rate
    }

    /// Reserve this server for `booker` and provision fresh credentials.
    ///
    /// The claim is taken before `setup` runs so a concurrent booking of the
    /// same server fails with `AlreadyBooked`. If `setup` fails the claim is
    /// released and the driver error is returned.
    pub async fn book(&self, booker: Booker, duration: Duration) -> BookingResult<ServerState> {
        self.claim(booker, duration).await?;
        self.provision().await
    }

    /// Mark the server booked without touching the driver.
    pub async fn claim(&self, booker: Booker, duration: Duration) -> BookingResult<()> {
        let mut state = self.state.write().await;
        if state.booked {
            return Err(BookingError::AlreadyBooked);
        }

        let now = Utc::now();
        state.clear_reservation();
        state.booked = true;
        state.booked_at = Some(now);
        state.return_at = Some(add(now, to_delta(duration)));
        state.booker = Some(booker);
        Ok(())
    }

    /// Run `setup` for a claimed server, releasing the claim on failure.
    pub async fn provision(&self) -> BookingResult<ServerState> {
        if !self.is_booked().await {
            return Err(BookingError::NotBooked);
        }

        match self.driver.setup(&self.identity).await {
            Ok(credentials) => {
                let mut state = self.state.write().await;
                state.credentials = credentials;
                debug!(server = %self.identity.id, "Server credentials provisioned");
                Ok(state.clone())
            }
            Err(e) => {
                warn!(server = %self.identity.id, error = %e, "Setup failed, releasing claim");
                self.state.write().await.clear_reservation();
                Err(e.into())
            }
        }
    }

    /// Push the return deadline back by `delta`.
    pub async fn extend_booking(&self, delta: Duration) -> BookingResult<DateTime<Utc>> {
        let mut state = self.state.write().await;
        let return_at = match state.return_at {
            Some(at) if state.booked => at,
            _ => return Err(BookingError::NotBooked),
        };

        let new_return_at = add(return_at, to_delta(delta));
        state.return_at = Some(new_return_at);
        state.extensions += 1;
        state.sent_return_warning = false;
        Ok(new_return_at)
    }

    /// Clear the reservation, returning what it was.
    pub async fn unbook(&self) -> BookingResult<FinishedBooking> {
        let mut state = self.state.write().await;
        if !state.booked {
            return Err(BookingError::NotBooked);
        }

        let booker = state.booker.clone().ok_or_else(|| {
            BookingError::InvalidState(format!("{} is booked without a booker", self.identity.id))
        });
        let booked_at = state.booked_at.unwrap_or_else(Utc::now);
        state.clear_reservation();

        Ok(FinishedBooking {
            booker: booker?,
            booked_at,
            unbooked_at: Utc::now(),
        })
    }

    /// Mark the server booked from persisted state without running `setup`.
    pub async fn restore(&self, booker: Booker, duration: Duration) {
        let mut state = self.state.write().await;
        if state.booked && state.booker.as_ref() == Some(&booker) {
            return;
        }

        let now = Utc::now();
        state.clear_reservation();
        state.booked = true;
        state.booked_at = Some(now);
        state.return_at = Some(add(now, to_delta(duration)));
        state.booker = Some(booker);
    }

    /// Drop the reservation without the booker check `unbook` performs.
    pub async fn reset(&self) {
        self.state.write().await.clear_reservation();
    }

    pub async fn set_return_at(&self, return_at: DateTime<Utc>) {
        self.state.write().await.return_at = Some(return_at);
    }

    /// Record a successful population query. Returns the idle minute count.
    pub async fn record_players(&self, players: u32, min_players: u32) -> u32 {
        let mut state = self.state.write().await;
        state.error_minutes = 0;
        if players < min_players {
            state.idle_minutes += 1;
        } else {
            state.idle_minutes = 0;
            state.sent_idle_warning = false;
        }
        state.idle_minutes
    }

    /// Count a failed query. Returns the failure count when it reaches
    /// `threshold`, resetting the counter.
    pub async fn record_query_error(&self, threshold: u32) -> Option<u32> {
        let mut state = self.state.write().await;
        state.error_minutes += 1;
        if state.error_minutes >= threshold {
            let count = state.error_minutes;
            state.error_minutes = 0;
            Some(count)
        } else {
            None
        }
    }

    /// Set the idle-warning flag; true if it was not already set.
    pub async fn take_idle_warning(&self) -> bool {
        let mut state = self.state.write().await;
        !std::mem::replace(&mut state.sent_idle_warning, true)
    }

    pub async fn take_lobby_warning(&self) -> bool {
        let mut state = self.state.write().await;
        !std::mem::replace(&mut state.sent_lobby_warning, true)
    }

    /// Claim the return warning if the deadline is within `window`.
    pub async fn take_return_warning(&self, now: DateTime<Utc>, window: Duration) -> Option<TimeDelta> {
        let mut state = self.state.write().await;
        if !state.booked || state.sent_return_warning {
            return None;
        }

        let remaining = state.remaining(now)?;
        if remaining <= to_delta(window) {
            state.sent_return_warning = true;
            Some(remaining)
        } else {
            None
        }
    }

    /// Fold a tick-rate sample into the running average.
    pub async fn record_tick_rate(&self, sample: f64) -> (f64, u64) {
        let mut state = self.state.write().await;
        let n = state.tick_rate_samples as f64;
        state.tick_rate = (state.tick_rate * n + sample) / (n + 1.0);
        state.tick_rate_samples += 1;
        (state.tick_rate, state.tick_rate_samples)
    }

    pub async fn set_tick_rate(&self, tick_rate: f64, samples: u64) {
        let mut state = self.state.write().await;
        state.tick_rate = tick_rate;
        state.tick_rate_samples = samples;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDriver;

    fn server(mock: MockDriver) -> Server {
        Server::new(
            ServerIdentity {
                id: "tf2-1".into(),
                name: "Server 1".into(),
                address: "10.0.0.1:27015".into(),
                stv_address: "10.0.0.1:27020".into(),
                session_name: "tf2-1".into(),
            },
            Driver::Mock(mock),
        )
    }

    fn alice() -> Booker {
        Booker::new("100", "alice")
    }

    #[tokio::test]
    async fn test_book_sets_reservation_fields() {
        let s = server(MockDriver::new());
        let state = s.book(alice(), Duration::from_secs(3600)).await.unwrap();

        assert!(state.booked);
        assert_eq!(state.booker.as_ref().unwrap().mention, "<@100>");
        let booked_at = state.booked_at.unwrap();
        let return_at = state.return_at.unwrap();
        assert_eq!(return_at - booked_at, TimeDelta::hours(1));
        assert!(!state.credentials.server_password.is_empty());
        assert!(!s.is_available().await);
    }

    #[tokio::test]
    async fn test_book_twice_fails() {
        let s = server(MockDriver::new());
        s.book(alice(), Duration::from_secs(60)).await.unwrap();

        let err = s.book(Booker::new("200", "bob"), Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, BookingError::AlreadyBooked));
        assert_eq!(s.booker().await.unwrap().user_id, "100");
    }

    #[tokio::test]
    async fn test_setup_failure_reverts_claim() {
        let mock = MockDriver::new();
        mock.fail_setup(true);
        let s = server(mock);

        let err = s.book(alice(), Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, BookingError::DriverUnavailable(_)));
        let state = s.snapshot().await;
        assert!(!state.booked);
        assert!(state.booker.is_none());
        assert!(state.return_at.is_none());
    }

    #[tokio::test]
    async fn test_extend_adds_delta() {
        let s = server(MockDriver::new());
        let before = s.book(alice(), Duration::from_secs(3600)).await.unwrap().return_at.unwrap();

        let after = s.extend_booking(Duration::from_secs(1800)).await.unwrap();
        assert_eq!(after - before, TimeDelta::minutes(30));
        assert_eq!(s.snapshot().await.extensions, 1);
    }

    #[tokio::test]
    async fn test_extend_unbooked_fails() {
        let s = server(MockDriver::new());
        assert!(matches!(
            s.extend_booking(Duration::from_secs(60)).await,
            Err(BookingError::NotBooked)
        ));
    }

    #[tokio::test]
    async fn test_unbook_resets_everything() {
        let s = server(MockDriver::new());
        s.book(alice(), Duration::from_secs(60)).await.unwrap();
        s.record_players(0, 6).await;
        s.take_lobby_warning().await;

        let finished = s.unbook().await.unwrap();
        assert_eq!(finished.booker.user_id, "100");

        let state = s.snapshot().await;
        assert!(!state.booked);
        assert!(state.booker.is_none());
        assert!(state.return_at.is_none());
        assert_eq!(state.idle_minutes, 0);
        assert!(!state.sent_lobby_warning);

        assert!(matches!(s.unbook().await, Err(BookingError::NotBooked)));
    }

    #[tokio::test]
    async fn test_idle_accrual_and_reset() {
        let s = server(MockDriver::new());
        assert_eq!(s.record_players(1, 6).await, 1);
        assert_eq!(s.record_players(2, 6).await, 2);
        assert!(s.take_idle_warning().await);
        assert!(!s.take_idle_warning().await);

        assert_eq!(s.record_players(12, 6).await, 0);
        assert!(!s.snapshot().await.sent_idle_warning);
    }

    #[tokio::test]
    async fn test_query_error_threshold() {
        let s = server(MockDriver::new());
        for _ in 0..4 {
            assert_eq!(s.record_query_error(5).await, None);
        }
        assert_eq!(s.record_query_error(5).await, Some(5));
        assert_eq!(s.snapshot().await.error_minutes, 0);
    }

    #[tokio::test]
    async fn test_return_warning_once() {
        let s = server(MockDriver::new());
        s.book(alice(), Duration::from_secs(300)).await.unwrap();

        let now = Utc::now();
        assert!(s.take_return_warning(now, Duration::from_secs(60)).await.is_none());
        assert!(s.take_return_warning(now, Duration::from_secs(600)).await.is_some());
        assert!(s.take_return_warning(now, Duration::from_secs(600)).await.is_none());

        s.extend_booking(Duration::from_secs(60)).await.unwrap();
        assert!(!s.snapshot().await.sent_return_warning);
    }

    #[tokio::test]
    async fn test_tick_rate_average() {
        let s = server(MockDriver::new());
        s.record_tick_rate(60.0).await;
        let (avg, n) = s.record_tick_rate(70.0).await;
        assert_eq!(n, 2);
        assert!((avg - 65.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_transition_lock_is_exclusive() {
        let s = server(MockDriver::new());
        let guard = s.lock_transition().await;
        assert!(s.transition.try_lock().is_err());
        drop(guard);
        assert!(s.transition.try_lock().is_ok());
    }
}
