//! Refresh interval parsing (§4.9), grounded on
//! `original_source/semantic_layer/scheduling/scheduler.py`: each
//! pre-aggregation's `refresh_key.every` string is turned into a
//! [`Duration`] driving its `ScheduledExecutor` loop (wired up in
//! [`super::manager`]).

use std::time::Duration;

/// Parses `"every 1 hour"` / `"1 hour"` / `"30 minutes"` into a [`Duration`].
/// Unparseable or missing intervals fall back to one hour, matching the
/// original's `DEFAULT_REFRESH_INTERVAL`.
pub fn parse_interval(spec: &str) -> Duration {
    let trimmed = spec.trim().strip_prefix("every").unwrap_or(spec).trim();
    let mut parts = trimmed.split_whitespace();
    let (Some(amount_str), Some(unit)) = (parts.next(), parts.next()) else {
        return Duration::from_secs(3600);
    };
    let Ok(amount) = amount_str.parse::<u64>() else {
        return Duration::from_secs(3600);
    };
    let seconds = match unit.trim_end_matches('s') {
        "second" => amount,
        "minute" => amount * 60,
        "hour" => amount * 3600,
        "day" => amount * 86400,
        _ => return Duration::from_secs(3600),
    };
    Duration::from_secs(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_n_hours() {
        assert_eq!(parse_interval("every 2 hours"), Duration::from_secs(7200));
    }

    #[test]
    fn parses_bare_interval() {
        assert_eq!(parse_interval("30 minutes"), Duration::from_secs(1800));
    }

    #[test]
    fn unparseable_falls_back_to_one_hour() {
        assert_eq!(parse_interval("garbage"), Duration::from_secs(3600));
    }
}
