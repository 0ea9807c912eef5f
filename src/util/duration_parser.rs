//! Duration parser for CLI arguments.
//!
//! Supports:
//! - Plain seconds: `5`, `0.5`
//! - Anything `humantime` accepts: `250ms`, `1s`, `2m`, `1m30s`

use std::time::Duration;

/// Error type for duration parsing failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("failed to parse duration '{input}': {message}")]
pub struct DurationParseError {
    pub input: String,
    pub message: String,
}

/// Parse a duration string such as `1s`, `500ms` or `1m30s`.
///
/// A bare number is taken as seconds.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use memcached_exporter::util::parse_duration;
///
/// assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let input = input.trim();
    let err = |message: String| DurationParseError {
        input: input.to_string(),
        message,
    };

    if input.is_empty() {
        return Err(err("empty duration".to_string()));
    }

    if let Ok(secs) = input.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).map_err(|e| err(e.to_string()));
    }

    humantime::parse_duration(input).map_err(|e| err(e.to_string()))
}
