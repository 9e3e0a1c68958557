//! Error types for reservation transitions.

use thiserror::Error;

use crate::driver::DriverError;
use crate::store::StoreError;

/// Errors surfaced by coordinator operations.
///
/// Every variant maps to a fixed user-facing reply; the `Display` output is
/// for logs only.
#[derive(Debug, Error)]
pub enum BookingError {
    /// The server or user already holds a reservation.
    #[error("already booked")]
    AlreadyBooked,

    /// No reservation to act on.
    #[error("not booked")]
    NotBooked,

    /// The pool has no free server.
    #[error("no available server")]
    NoAvailableServer,

    /// Transport failure talking to the control plane.
    #[error("driver unavailable: {0}")]
    DriverUnavailable(String),

    /// The control plane refused the request.
    #[error("driver rejected request: {0}")]
    DriverRejected(String),

    /// The reservation store could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Store and pool disagree.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The per-booking extension limit was reached.
    #[error("extension limit of {0} reached")]
    ExtensionLimit(u32),
}

impl BookingError {
    /// Whether the error came from a transport fault that a retry could fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DriverUnavailable(_) | Self::StoreUnavailable(_))
    }
}

impl From<DriverError> for BookingError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Unavailable(msg) => Self::DriverUnavailable(msg),
            DriverError::Rejected(msg) => Self::DriverRejected(msg),
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

/// Result type for coordinator operations.
pub type BookingResult<T> = Result<T, BookingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_conversion() {
        let err: BookingError = DriverError::Unavailable("dial tcp: refused".into()).into();
        assert!(matches!(err, BookingError::DriverUnavailable(_)));
        assert!(err.is_transient());

        let err: BookingError = DriverError::Rejected("409 conflict".into()).into();
        assert!(matches!(err, BookingError::DriverRejected(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: BookingError = StoreError::Unavailable("connection reset".into()).into();
        assert!(matches!(err, BookingError::StoreUnavailable(_)));
        assert!(err.to_string().contains("connection reset"));
    }
}
