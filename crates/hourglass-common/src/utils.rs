//! Utility functions for Hourglass
//!
//! Duration strings, wall-clock helpers and command-name normalisation.

use std::sync::LazyLock;

use crate::error::{HourglassError, Result};

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 3_600;
const SECONDS_PER_DAY: u64 = 86_400;

/// Compound duration such as `1d12h30m45s`; every unit is optional but the
/// order is fixed.
static DURATION_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^(?:(\d+)d)?(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$")
        .expect("Invalid regex pattern")
});

/// Parse a duration string into whole seconds.
///
/// Accepts a bare number of seconds (`"30"`) or a compound form made of
/// day, hour, minute and second parts (`"30s"`, `"5m"`, `"1h30m"`,
/// `"1d12h30m45s"`). Matching is case-insensitive and surrounding whitespace
/// is ignored.
///
/// # Examples
///
/// ```
/// use hourglass_common::parse_duration;
///
/// assert_eq!(parse_duration("90").unwrap(), 90);
/// assert_eq!(parse_duration("1h30m").unwrap(), 5400);
/// assert!(parse_duration("soon").is_err());
/// ```
pub fn parse_duration(input: &str) -> Result<u64> {
    let text = input.trim().to_lowercase();
    if text.is_empty() {
        return Err(HourglassError::config("empty duration"));
    }

    if let Ok(seconds) = text.parse::<u64>() {
        return Ok(seconds);
    }

    let caps = DURATION_PATTERN
        .captures(&text)
        .ok_or_else(|| HourglassError::config(format!("invalid duration '{}'", input)))?;

    let units = [SECONDS_PER_DAY, SECONDS_PER_HOUR, SECONDS_PER_MINUTE, 1];
    let mut total: u64 = 0;
    for (idx, unit) in units.iter().enumerate() {
        if let Some(m) = caps.get(idx + 1) {
            let value: u64 = m
                .as_str()
                .parse()
                .map_err(|_| HourglassError::config(format!("invalid duration '{}'", input)))?;
            total = value
                .checked_mul(*unit)
                .and_then(|v| total.checked_add(v))
                .ok_or_else(|| HourglassError::config(format!("duration '{}' overflows", input)))?;
        }
    }

    Ok(total)
}

/// Format whole seconds as a compact duration (`5400` -> `"1h30m"`).
///
/// Zero-valued units are omitted; zero itself renders as `"0s"`.
pub fn format_duration(seconds: u64) -> String {
    if seconds == 0 {
        return "0s".to_string();
    }

    let days = seconds / SECONDS_PER_DAY;
    let hours = (seconds % SECONDS_PER_DAY) / SECONDS_PER_HOUR;
    let minutes = (seconds % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE;
    let secs = seconds % SECONDS_PER_MINUTE;

    let mut out = String::new();
    for (value, suffix) in [(days, 'd'), (hours, 'h'), (minutes, 'm'), (secs, 's')] {
        if value > 0 {
            out.push_str(&value.to_string());
            out.push(suffix);
        }
    }
    out
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Lower-case and trim a command or key name
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}
