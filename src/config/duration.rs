//! # Duration Strings
//!
//! Kubernetes-style duration strings: `30s`, `5m`, `2h`, `1d`.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$").ok());

/// Parse `<number><unit>` into a [`Duration`]. Units are case insensitive and
/// the number must be greater than zero.
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration> {
    let trimmed = duration_str.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Duration string cannot be empty"));
    }

    let regex = DURATION_REGEX
        .as_ref()
        .ok_or_else(|| anyhow!("Failed to compile duration regex"))?;
    let lower = trimmed.to_lowercase();
    let captures = regex.captures(&lower).ok_or_else(|| {
        anyhow!(
            "Invalid duration format '{trimmed}'. \
             Expected format: <number><unit> (e.g., '30s', '5m', '2h')"
        )
    })?;

    let number: u64 = captures["number"]
        .parse()
        .map_err(|e| anyhow!("Invalid duration number in '{trimmed}': {e}"))?;
    if number == 0 {
        return Err(anyhow!(
            "Duration number must be greater than 0, got '{trimmed}'"
        ));
    }

    let multiplier = match &captures["unit"] {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        unit => return Err(anyhow!("Invalid unit '{unit}' in duration '{trimmed}'")),
    };
    number
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("Duration '{trimmed}' is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(parse_kubernetes_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_kubernetes_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_kubernetes_duration(" 2H ").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_kubernetes_duration("1d").unwrap(), Duration::from_secs(86400));
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "0m", "5", "m", "1.5h", "5w", "-1s"] {
            assert!(parse_kubernetes_duration(bad).is_err(), "{bad} should be rejected");
        }
    }
}
