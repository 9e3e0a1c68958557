//! Error types for identifier parsing.

use thiserror::Error;

/// Errors that can occur when parsing an account identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SteamIdError {
    /// The input string is empty.
    #[error("steam id cannot be empty")]
    Empty,

    /// The input does not start with a recognised prefix.
    #[error("invalid steam id prefix in '{0}'")]
    InvalidPrefix(String),

    /// The input has the wrong number of `:`-separated parts.
    #[error("malformed steam id '{0}'")]
    Malformed(String),

    /// A numeric component could not be parsed or is out of range.
    #[error("invalid number in steam id '{0}'")]
    InvalidNumber(String),

    /// A 64-bit community id below the individual-account base.
    #[error("community id {0} is outside the individual account range")]
    OutOfRange(u64),
}

impl SteamIdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, SteamIdError::Empty)
    }
}
