//! Relative date-range normalization (§4.2), grounded on
//! `original_source/semantic_layer/utils/date_parser.py`. Uses `chrono` for
//! all calendar math rather than hand-rolled month arithmetic (§9: "Date
//! arithmetic uses the platform's calendar library").

use crate::error::ValidationError;
use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

static ISO_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static LAST_NEXT_N: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(last|next)\s+(\d+)\s+(day|days|week|weeks|month|months|year|years)$").unwrap()
});
static THIS_LAST_NEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(this|last|next)\s+(week|month|quarter|year)$").unwrap());
static FROM_TO: Lazy<Regex> = Lazy::new(|| Regex::new(r"^from\s+(.+?)\s+to\s+(.+)$").unwrap());
static N_DAYS_AGO: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\s+days?\s+ago$").unwrap());
static N_WEEKS_FROM_NOW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s+weeks?\s+from\s+now$").unwrap());
static N_DAYS_FROM_NOW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s+days?\s+from\s+now$").unwrap());

/// `today` for the purpose of this normalizer. Callers that need
/// determinism for tests pass `today` explicitly via [`parse_relative_date`].
pub fn parse(date_string: &str) -> Result<[String; 2], ValidationError> {
    parse_relative_date(date_string, chrono::Utc::now().date_naive())
}

/// Core entry point with an injected "today" so behavior is testable and
/// so the orchestrator can pin a single `today` across one request.
pub fn parse_relative_date(input: &str, today: NaiveDate) -> Result<[String; 2], ValidationError> {
    let s = input.trim();
    let lower = s.to_lowercase();

    if ISO_DATE.is_match(s) {
        return Ok([s.to_string(), s.to_string()]);
    }

    match lower.as_str() {
        "today" => return Ok([fmt(today), fmt(today)]),
        "yesterday" => {
            let d = today - Duration::days(1);
            return Ok([fmt(d), fmt(d)]);
        }
        "tomorrow" => {
            let d = today + Duration::days(1);
            return Ok([fmt(d), fmt(d)]);
        }
        _ => {}
    }

    if let Some(caps) = THIS_LAST_NEXT.captures(&lower) {
        let which = &caps[1];
        let unit = &caps[2];
        return this_last_next(which, unit, today);
    }

    if let Some(caps) = LAST_NEXT_N.captures(&lower) {
        let direction = &caps[1];
        let n: i64 = caps[2].parse().unwrap_or(0);
        let unit = &caps[3];
        return Ok(last_next_n(direction, n, unit, today));
    }

    if let Some(caps) = FROM_TO.captures(&lower) {
        let start = parse_endpoint_start(&caps[1], today)?;
        let end = parse_endpoint_end(&caps[2], today)?;
        return Ok([fmt(start), fmt(end)]);
    }

    Err(ValidationError::UnparseableDateExpression(input.to_string()))
}

fn fmt(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn this_last_next(which: &str, unit: &str, today: NaiveDate) -> Result<[String; 2], ValidationError> {
    match unit {
        "week" => {
            // Monday-anchored.
            let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
            let (start, end) = match which {
                "this" => (monday, monday + Duration::days(6)),
                "last" => (monday - Duration::days(7), monday - Duration::days(1)),
                "next" => (monday + Duration::days(7), monday + Duration::days(13)),
                _ => unreachable!(),
            };
            Ok([fmt(start), fmt(end)])
        }
        "month" => {
            let (y, m) = match which {
                "this" => (today.year(), today.month()),
                "last" => prev_month(today.year(), today.month()),
                "next" => next_month(today.year(), today.month()),
                _ => unreachable!(),
            };
            Ok(month_bounds(y, m))
        }
        "quarter" => {
            let quarter = (today.month() - 1) / 3 + 1;
            let (y, q) = match which {
                "this" => (today.year(), quarter),
                "last" => {
                    if quarter == 1 {
                        (today.year() - 1, 4)
                    } else {
                        (today.year(), quarter - 1)
                    }
                }
                "next" => {
                    if quarter == 4 {
                        (today.year() + 1, 1)
                    } else {
                        (today.year(), quarter + 1)
                    }
                }
                _ => unreachable!(),
            };
            Ok(quarter_bounds(y, q))
        }
        "year" => {
            let y = match which {
                "this" => today.year(),
                "last" => today.year() - 1,
                "next" => today.year() + 1,
                _ => unreachable!(),
            };
            Ok([
                fmt(NaiveDate::from_ymd_opt(y, 1, 1).unwrap()),
                fmt(NaiveDate::from_ymd_opt(y, 12, 31).unwrap()),
            ])
        }
        _ => unreachable!(),
    }
}

fn prev_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 { (year - 1, 12) } else { (year, month - 1) }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 { (year + 1, 1) } else { (year, month + 1) }
}

fn month_bounds(year: i32, month: u32) -> [String; 2] {
    let start = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    let (next_y, next_m) = next_month(year, month);
    let end = NaiveDate::from_ymd_opt(next_y, next_m, 1).unwrap() - Duration::days(1);
    [fmt(start), fmt(end)]
}

fn quarter_bounds(year: i32, quarter: u32) -> [String; 2] {
    let first_month = (quarter - 1) * 3 + 1;
    let start = NaiveDate::from_ymd_opt(year, first_month, 1).unwrap();
    let (end_y, end_m) = next_month(year, first_month + 2);
    let end = NaiveDate::from_ymd_opt(end_y, end_m, 1).unwrap() - Duration::days(1);
    [fmt(start), fmt(end)]
}

/// `last/next N unit` deliberately approximates month=30 days, year=365
/// days rather than true calendar arithmetic, matching
/// `date_parser.py`'s `_parse_last_n`/`_parse_next_n` (unlike the singular
/// "last month"/"last year" forms, which do use calendar math).
fn last_next_n(direction: &str, n: i64, unit: &str, today: NaiveDate) -> [String; 2] {
    let days = match unit {
        "day" | "days" => n,
        "week" | "weeks" => n * 7,
        "month" | "months" => n * 30,
        "year" | "years" => n * 365,
        _ => n,
    };
    match direction {
        "last" => [fmt(today - Duration::days(days - 1)), fmt(today)],
        "next" => [fmt(today), fmt(today + Duration::days(days - 1))],
        _ => unreachable!(),
    }
}

fn parse_endpoint_start(expr: &str, today: NaiveDate) -> Result<NaiveDate, ValidationError> {
    let e = expr.trim();
    if e == "now" {
        return Ok(today);
    }
    if let Some(caps) = N_DAYS_AGO.captures(e) {
        let n: i64 = caps[1].parse().unwrap_or(0);
        return Ok(today - Duration::days(n));
    }
    if ISO_DATE.is_match(e) {
        return NaiveDate::parse_from_str(e, "%Y-%m-%d")
            .map_err(|_| ValidationError::UnparseableDateExpression(expr.to_string()));
    }
    Err(ValidationError::UnparseableDateExpression(expr.to_string()))
}

fn parse_endpoint_end(expr: &str, today: NaiveDate) -> Result<NaiveDate, ValidationError> {
    let e = expr.trim();
    if e == "now" {
        return Ok(today);
    }
    if let Some(caps) = N_WEEKS_FROM_NOW.captures(e) {
        let n: i64 = caps[1].parse().unwrap_or(0);
        return Ok(today + Duration::weeks(n));
    }
    if let Some(caps) = N_DAYS_FROM_NOW.captures(e) {
        let n: i64 = caps[1].parse().unwrap_or(0);
        return Ok(today + Duration::days(n));
    }
    if ISO_DATE.is_match(e) {
        return NaiveDate::parse_from_str(e, "%Y-%m-%d")
            .map_err(|_| ValidationError::UnparseableDateExpression(expr.to_string()));
    }
    Err(ValidationError::UnparseableDateExpression(expr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    #[test]
    fn today_returns_equal_dates() {
        let [start, end] = parse_relative_date("today", fixed_today()).unwrap();
        assert_eq!(start, end);
        assert_eq!(start, "2024-01-15");
    }

    #[test]
    fn last_7_days_is_a_7_day_window_ending_today() {
        let [start, end] = parse_relative_date("last 7 days", fixed_today()).unwrap();
        assert_eq!(end, "2024-01-15");
        assert_eq!(start, "2024-01-09");
    }

    #[test]
    fn last_month_respects_year_rollover() {
        let january = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let [start, end] = parse_relative_date("last month", january).unwrap();
        assert_eq!(start, "2023-12-01");
        assert_eq!(end, "2023-12-31");
    }

    #[test]
    fn this_week_is_monday_anchored() {
        // 2024-01-15 is a Monday.
        let [start, end] = parse_relative_date("this week", fixed_today()).unwrap();
        assert_eq!(start, "2024-01-15");
        assert_eq!(end, "2024-01-21");
    }

    #[test]
    fn from_to_range() {
        let [start, end] = parse_relative_date("from 7 days ago to now", fixed_today()).unwrap();
        assert_eq!(start, "2024-01-08");
        assert_eq!(end, "2024-01-15");
    }

    #[test]
    fn iso_date_passes_through() {
        let [start, end] = parse_relative_date("2024-03-01", fixed_today()).unwrap();
        assert_eq!(start, "2024-03-01");
        assert_eq!(end, "2024-03-01");
    }

    #[test]
    fn unparseable_input_errors() {
        assert!(parse_relative_date("whenever", fixed_today()).is_err());
    }
}
