//! Duration and memory-size parsing
//!
//! Durations are `<integer><s|m|h>` and are normalized to minutes.
//! Memory sizes are `<integer><M|G>` and are normalized to bytes.

use std::time::Duration;

use crate::error::UnitError;

/// Shortest accepted TTL or timeout, in minutes
pub const MIN_DURATION_MINUTES: u64 = 1;

/// Longest accepted TTL or timeout, in minutes (24 hours)
pub const MAX_DURATION_MINUTES: u64 = 1440;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * 1024 * 1024;

/// Split `value` into its integer magnitude and single-character unit.
///
/// Returns `None` unless the string is one or more ASCII digits followed by
/// exactly one unit character.
fn split_magnitude(value: &str) -> Option<(u64, char)> {
    let unit = value.chars().last()?;
    let digits = &value[..value.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok().map(|n| (n, unit))
}

/// Parse a duration string into minutes.
///
/// `30s` is `0.5`, `15m` is `15`, `2h` is `120`. No bounds are applied here.
pub fn parse_duration(value: &str) -> Result<f64, UnitError> {
    let invalid = || UnitError::InvalidDuration {
        value: value.to_string(),
    };
    let (n, unit) = split_magnitude(value).ok_or_else(invalid)?;
    let n = n as f64;
    match unit {
        's' => Ok(n / 60.0),
        'm' => Ok(n),
        'h' => Ok(n * 60.0),
        _ => Err(invalid()),
    }
}

/// Parse a duration string into whole milliseconds.
pub fn parse_duration_ms(value: &str) -> Result<u64, UnitError> {
    let invalid = || UnitError::InvalidDuration {
        value: value.to_string(),
    };
    let (n, unit) = split_magnitude(value).ok_or_else(invalid)?;
    let factor = match unit {
        's' => 1_000,
        'm' => 60_000,
        'h' => 3_600_000,
        _ => return Err(invalid()),
    };
    n.checked_mul(factor).ok_or_else(invalid)
}

/// Parse a duration string into a [`Duration`].
pub fn parse_std_duration(value: &str) -> Result<Duration, UnitError> {
    parse_duration_ms(value).map(Duration::from_millis)
}

/// Parse a duration and require it to fall within 1 minute to 24 hours.
///
/// Both the sandbox TTL and the per-run timeout are held to this range.
pub fn validate_bounded_duration(value: &str) -> Result<f64, UnitError> {
    let minutes = parse_duration(value)?;
    if minutes < MIN_DURATION_MINUTES as f64 || minutes > MAX_DURATION_MINUTES as f64 {
        return Err(UnitError::DurationOutOfRange {
            value: value.to_string(),
            min: MIN_DURATION_MINUTES,
            max: MAX_DURATION_MINUTES,
        });
    }
    Ok(minutes)
}

/// Parse a memory size string into bytes.
///
/// `M` is mebibytes and `G` is gibibytes; `512M` is `512 * 1024 * 1024`.
pub fn parse_memory(value: &str) -> Result<u64, UnitError> {
    let invalid = || UnitError::InvalidMemory {
        value: value.to_string(),
    };
    let (n, unit) = split_magnitude(value).ok_or_else(invalid)?;
    let factor = match unit {
        'M' => MIB,
        'G' => GIB,
        _ => return Err(invalid()),
    };
    n.checked_mul(factor).ok_or_else(invalid)
}
