//! Duration literals
//!
//! Widths are written as `<n><unit>` where unit is one of `s`, `m`, `h`,
//! `d` or `w` (e.g. `90s`, `15m`, `2h`, `1d`).

use super::error::{SpanError, SpanResult};
use chrono::Duration;
use serde::{Deserialize, Deserializer};

/// Parse a duration literal such as `15m` or `7d`
pub fn parse_duration(input: &str) -> SpanResult<Duration> {
    let re = regex::Regex::new(r"^(\d+)([smhdw])$")
        .map_err(|e| SpanError::InvalidDuration(e.to_string()))?;

    let invalid = || SpanError::InvalidDuration(input.to_string());
    let caps = re.captures(input.trim()).ok_or_else(invalid)?;
    let amount: i64 = caps[1].parse().map_err(|_| invalid())?;

    let duration = match &caps[2] {
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        "w" => Duration::try_weeks(amount),
        _ => None,
    };

    duration.ok_or_else(invalid)
}

/// Render a duration using the largest unit that divides it exactly
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.num_seconds();
    let units = [("w", 7 * 86_400), ("d", 86_400), ("h", 3_600), ("m", 60)];

    for (suffix, size) in units {
        if seconds != 0 && seconds % size == 0 {
            return format!("{}{}", seconds / size, suffix);
        }
    }
    format!("{}s", seconds)
}

/// Serde helper for optional duration literals
pub(crate) fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let literal: Option<String> = Option::deserialize(deserializer)?;
    literal
        .map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::seconds(90));
        assert_eq!(parse_duration("15m").unwrap(), Duration::minutes(15));
        assert_eq!(parse_duration("2h").unwrap(), Duration::hours(2));
        assert_eq!(parse_duration("1d").unwrap(), Duration::days(1));
        assert_eq!(parse_duration(" 2w ").unwrap(), Duration::weeks(2));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(
            parse_duration("2 hours"),
            Err(SpanError::InvalidDuration(_))
        ));
        assert!(parse_duration("-5m").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_format() {
        assert_eq!(format_duration(Duration::minutes(15)), "15m");
        assert_eq!(format_duration(Duration::hours(48)), "2d");
        assert_eq!(format_duration(Duration::seconds(90)), "90s");
        assert_eq!(format_duration(Duration::zero()), "0s");
    }
}
