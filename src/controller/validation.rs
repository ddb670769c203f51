//! # Duration Validation
//!
//! Handles parsing and validating Kubernetes duration strings.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

// One or more <number><unit> pairs, e.g. "30s", "10m", "1h30m"
static DURATION_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<number>\d+)(?P<unit>[smhd])").expect("static regex is valid")
});
static DURATION_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+[smhd])+$").expect("static regex is valid"));

/// Parse Kubernetes duration string into std::time::Duration
/// Supports formats: "30s", "1m", "5m", "1h", "1h30m", "1d"
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration> {
    let duration_lower = duration_str.trim().to_lowercase();

    if duration_lower.is_empty() {
        return Err(anyhow!("Duration string cannot be empty"));
    }

    if !DURATION_FORMAT.is_match(&duration_lower) {
        return Err(anyhow!(
            "Invalid duration format '{}'. Expected format: <number><unit> (e.g., '1m', '10m', '1h')",
            duration_str.trim()
        ));
    }

    let mut seconds: u64 = 0;
    for captures in DURATION_PART.captures_iter(&duration_lower) {
        let number: u64 = captures["number"]
            .parse()
            .map_err(|e| anyhow!("Invalid duration number in '{duration_lower}': {e}"))?;
        let multiplier = match &captures["unit"] {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            _ => 86400,
        };
        seconds = number
            .checked_mul(multiplier)
            .and_then(|part| seconds.checked_add(part))
            .ok_or_else(|| anyhow!("Duration '{duration_lower}' is too large"))?;
    }

    if seconds == 0 {
        return Err(anyhow!(
            "Duration must be greater than 0, got '{duration_lower}'"
        ));
    }

    Ok(Duration::from_secs(seconds))
}

/// Parse a duration interval and enforce a minimum
///
/// # Arguments
/// * `interval` - The duration string to validate
/// * `field_name` - The name of the field being validated (for error messages)
/// * `min_seconds` - Minimum duration in seconds
pub fn validate_duration_interval(
    interval: &str,
    field_name: &str,
    min_seconds: u64,
) -> Result<Duration> {
    let interval_trimmed = interval.trim();

    if interval_trimmed.is_empty() {
        return Err(anyhow!("{field_name} cannot be empty"));
    }

    let duration = parse_kubernetes_duration(interval_trimmed)
        .map_err(|e| anyhow!("{field_name}: {e}"))?;

    if duration.as_secs() < min_seconds {
        return Err(anyhow!(
            "{field_name} '{interval_trimmed}' must be at least {min_seconds} seconds (got {} seconds)",
            duration.as_secs()
        ));
    }

    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_kubernetes_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_kubernetes_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_kubernetes_duration(" 2H ").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_kubernetes_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_kubernetes_duration("1h30m").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn test_parse_rejects_invalid() {
        for value in ["", "10", "m", "0s", "1w", "1.5m", "-1m"] {
            assert!(parse_kubernetes_duration(value).is_err(), "{value} should be rejected");
        }
    }

    #[test]
    fn test_minimum_enforced() {
        assert!(validate_duration_interval("30s", "spec.interval", 60).is_err());
        assert_eq!(
            validate_duration_interval("1m", "spec.interval", 60).unwrap(),
            Duration::from_secs(60)
        );
    }
}
