//! Date and duration helpers

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

/// Parse a `YYYY-MM-DD` CLI argument into the UTC instant at start of day.
pub fn parse_date_start(s: &str) -> Result<DateTime<Utc>, String> {
    let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{}': {}", s, e))?;
    Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("valid midnight")))
}

/// Parse a `YYYY-MM-DD` CLI argument into the last instant of that day,
/// making `--end-date` inclusive.
pub fn parse_date_end(s: &str) -> Result<DateTime<Utc>, String> {
    let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{}': {}", s, e))?;
    Ok(Utc.from_utc_datetime(&date.and_hms_opt(23, 59, 59).expect("valid end of day")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_day_bounds() {
        let start = parse_date_start("2024-01-15").unwrap();
        let end = parse_date_end("2024-01-15").unwrap();
        assert_eq!(start.to_rfc3339(), "2024-01-15T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-01-15T23:59:59+00:00");
        assert!(start < end);
    }

    #[test]
    fn rejects_malformed_dates() {
        assert!(parse_date_start("2024-13-01").is_err());
        assert!(parse_date_start("yesterday").is_err());
    }
}
