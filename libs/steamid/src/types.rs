//! The `SteamId` type and its encodings.

use std::fmt;
use std::str::FromStr;

use crate::SteamIdError;

/// Community id of account number zero for individual accounts in the public universe.
pub const COMMUNITY_BASE: u64 = 76_561_197_960_265_728;

/// An individual account identifier.
///
/// Internally only the 32-bit account number is kept; every encoding is
/// derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SteamId(u32);

impl SteamId {
    /// Creates an id from a raw account number.
    #[must_use]
    pub const fn from_account_id(account_id: u32) -> Self {
        Self(account_id)
    }

    /// Returns the raw account number.
    #[must_use]
    pub const fn account_id(&self) -> u32 {
        self.0
    }

    /// Parses the textual `STEAM_X:Y:Z` encoding.
    pub fn from_steamid(s: &str) -> Result<Self, SteamIdError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SteamIdError::Empty);
        }

        let rest = s
            .strip_prefix("STEAM_")
            .ok_or_else(|| SteamIdError::InvalidPrefix(s.to_string()))?;

        let parts: Vec<&str> = rest.split(':').collect();
        let [universe, auth, number] = parts.as_slice() else {
            return Err(SteamIdError::Malformed(s.to_string()));
        };

        if !matches!(*universe, "0" | "1") {
            return Err(SteamIdError::InvalidNumber(s.to_string()));
        }

        let auth: u64 = match *auth {
            "0" => 0,
            "1" => 1,
            _ => return Err(SteamIdError::InvalidNumber(s.to_string())),
        };
        let number: u64 = number
            .parse()
            .map_err(|_| SteamIdError::InvalidNumber(s.to_string()))?;

        let account = number
            .checked_mul(2)
            .and_then(|n| n.checked_add(auth))
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| SteamIdError::InvalidNumber(s.to_string()))?;

        Ok(Self(account))
    }

    /// Parses the steam3 encoding, with or without surrounding brackets.
    pub fn from_steamid3(s: &str) -> Result<Self, SteamIdError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SteamIdError::Empty);
        }

        let inner = s
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .unwrap_or(s);

        let rest = inner
            .strip_prefix("U:")
            .ok_or_else(|| SteamIdError::InvalidPrefix(s.to_string()))?;

        let Some((universe, number)) = rest.split_once(':') else {
            return Err(SteamIdError::Malformed(s.to_string()));
        };

        if universe != "1" {
            return Err(SteamIdError::InvalidNumber(s.to_string()));
        }

        let account: u32 = number
            .parse()
            .map_err(|_| SteamIdError::InvalidNumber(s.to_string()))?;

        Ok(Self(account))
    }

    /// Converts a 64-bit community id.
    pub fn from_community(id: u64) -> Result<Self, SteamIdError> {
        let account = id
            .checked_sub(COMMUNITY_BASE)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or(SteamIdError::OutOfRange(id))?;
        Ok(Self(account))
    }

    /// Parses any of the three encodings.
    pub fn parse(s: &str) -> Result<Self, SteamIdError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SteamIdError::Empty);
        }
        if s.starts_with("STEAM_") {
            return Self::from_steamid(s);
        }
        if s.starts_with('[') || s.starts_with("U:") {
            return Self::from_steamid3(s);
        }
        let id: u64 = s
            .parse()
            .map_err(|_| SteamIdError::InvalidPrefix(s.to_string()))?;
        Self::from_community(id)
    }

    /// Textual encoding, always in universe `0`.
    #[must_use]
    pub fn steam_id(&self) -> String {
        format!("STEAM_0:{}:{}", self.0 & 1, self.0 >> 1)
    }

    /// Bracketed steam3 encoding.
    #[must_use]
    pub fn steam3(&self) -> String {
        format!("[U:1:{}]", self.0)
    }

    /// 64-bit community encoding.
    #[must_use]
    pub fn community(&self) -> u64 {
        COMMUNITY_BASE + u64::from(self.0)
    }

    /// Public profile URL for this account.
    #[must_use]
    pub fn profile_url(&self) -> String {
        format!("https://steamcommunity.com/profiles/{}", self.community())
    }
}

impl fmt::Display for SteamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.steam3())
    }
}

impl FromStr for SteamId {
    type Err = SteamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for SteamId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.steam3())
    }
}

impl<'de> serde::Deserialize<'de> for SteamId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
