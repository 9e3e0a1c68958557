//! Human-readable durations.
//!
//! Parsing accepts a sequence of `<integer><unit>` groups, optionally
//! separated by whitespace, with units `d`, `h`, `m`, `s` and `ms`:
//! `"1h30m"`, `"90m"`, `"5400s"` and `"1h 30m"` are all the same duration.
//! A bare integer is read as seconds.
//!
//! Rendering produces the compact form used in chat replies (`"1h 30m"`).

use std::time::Duration;

use thiserror::Error;

/// Errors from [`parse`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("duration cannot be empty")]
    Empty,

    #[error("expected a number at '{0}'")]
    ExpectedNumber(String),

    #[error("unknown duration unit '{0}'")]
    UnknownUnit(String),

    #[error("duration '{0}' overflows")]
    Overflow(String),
}

/// Parse a human duration such as `"1h30m"`.
pub fn parse(input: &str) -> Result<Duration, DurationParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }

    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;

    while !rest.is_empty() {
        rest = rest.trim_start();
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return Err(DurationParseError::ExpectedNumber(rest.to_string()));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| DurationParseError::Overflow(input.to_string()))?;
        rest = &rest[digits..];

        let unit_len = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()).len();
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let millis_per_unit: u64 = match unit {
            "ms" => 1,
            "s" | "sec" | "secs" => 1_000,
            "m" | "min" | "mins" => 60_000,
            "h" | "hr" | "hrs" => 3_600_000,
            "d" | "day" | "days" => 86_400_000,
            "" => return Err(DurationParseError::UnknownUnit(String::new())),
            other => return Err(DurationParseError::UnknownUnit(other.to_string())),
        };

        let part = value
            .checked_mul(millis_per_unit)
            .ok_or_else(|| DurationParseError::Overflow(input.to_string()))?;
        total = total
            .checked_add(Duration::from_millis(part))
            .ok_or_else(|| DurationParseError::Overflow(input.to_string()))?;
    }

    Ok(total)
}

/// Render a duration for humans, down to whole seconds.
///
/// Zero renders as `"0s"`; sub-second remainders are dropped.
pub fn render(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }

    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3_600;
    secs %= 3_600;
    let minutes = secs / 60;
    secs %= 60;

    let parts: Vec<String> = [(days, "d"), (hours, "h"), (minutes, "m"), (secs, "s")]
        .into_iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect();

    parts.join(" ")
}

/// Render a signed chrono-style span given in seconds; negative spans clamp to zero.
pub fn render_secs(secs: i64) -> String {
    render(Duration::from_secs(secs.max(0) as u64))
}

/// Serde adapter: `#[serde(with = "booker_durations::serde")]`.
pub mod serde {
    use std::time::Duration;

    use ::serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::render(*value).replace(' ', ""))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => super::parse(&text).map_err(de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1h30m")]
    #[case("90m")]
    #[case("5400s")]
    #[case("1h 30m")]
    #[case("5400")]
    fn test_equivalent_forms(#[case] input: &str) {
        assert_eq!(parse(input).unwrap(), Duration::from_secs(5400));
    }

    #[rstest]
    #[case("", DurationParseError::Empty)]
    #[case("h", DurationParseError::ExpectedNumber("h".to_string()))]
    #[case("10x", DurationParseError::UnknownUnit("x".to_string()))]
    #[case("5m10", DurationParseError::UnknownUnit(String::new()))]
    fn test_parse_errors(#[case] input: &str, #[case] expected: DurationParseError) {
        assert_eq!(parse(input).unwrap_err(), expected);
    }

    #[test]
    fn test_milliseconds_and_days() {
        assert_eq!(parse("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse("1d2h").unwrap(), Duration::from_secs(26 * 3600));
    }

    #[rstest]
    #[case(0, "0s")]
    #[case(45, "45s")]
    #[case(5400, "1h 30m")]
    #[case(3 * 3600, "3h")]
    #[case(86_400 + 61, "1d 1m 1s")]
    fn test_render(#[case] secs: u64, #[case] expected: &str) {
        assert_eq!(render(Duration::from_secs(secs)), expected);
    }

    #[test]
    fn test_render_secs_clamps_negative() {
        assert_eq!(render_secs(-30), "0s");
    }

    #[test]
    fn test_serde_adapter() {
        #[derive(::serde::Deserialize, ::serde::Serialize)]
        struct Wrapper {
            #[serde(with = "crate::serde")]
            value: Duration,
        }

        let w: Wrapper = serde_json::from_str(r#"{"value":"1h30m"}"#).unwrap();
        assert_eq!(w.value, Duration::from_secs(5400));
        let w: Wrapper = serde_json::from_str(r#"{"value":120}"#).unwrap();
        assert_eq!(w.value, Duration::from_secs(120));
        assert_eq!(serde_json::to_string(&w).unwrap(), r#"{"value":"2m"}"#);
    }
}
