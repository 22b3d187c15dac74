//! Time utilities: timezone-aware kata intervals.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use std::sync::OnceLock;

const LOCAL_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"];

pub fn parse_timezone(tz: &str) -> Result<Tz> {
    tz.parse().map_err(|_| anyhow!("invalid timezone: {tz}"))
}

/// Parse a kata boundary, returning UTC.
///
/// Accepts RFC 3339 (offset honoured) or a local wall-clock time like
/// "2026-02-20 23:59" / "2026-02-20T23:59" interpreted in `tz`.
pub fn parse_kata_time(input: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    let ndt = LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .ok_or_else(|| anyhow!("invalid local datetime '{input}' (expected YYYY-MM-DD HH:MM)"))?;

    let local_dt = tz
        .from_local_datetime(&ndt)
        .single()
        .ok_or_else(|| anyhow!("ambiguous or invalid local time (DST?): {input} {tz}"))?;

    Ok(local_dt.with_timezone(&Utc))
}

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:(?P<h>\d+)\s*h)?\s*(?:(?P<m>\d+)\s*m(?:in)?)?\s*$")
            .expect("valid duration regex")
    })
}

/// Parse a kata length like "45m", "1h", "1h30m" or a bare minute count.
pub fn parse_kata_length(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    if let Ok(minutes) = trimmed.parse::<i64>() {
        return positive_minutes(minutes, input);
    }

    let caps = duration_re()
        .captures(trimmed)
        .ok_or_else(|| anyhow!("invalid length '{input}' (expected e.g. 45m or 1h30m)"))?;
    let hours: i64 = caps.name("h").map_or(Ok(0), |m| m.as_str().parse())?;
    let minutes: i64 = caps.name("m").map_or(Ok(0), |m| m.as_str().parse())?;

    let total = hours
        .checked_mul(60)
        .and_then(|m| m.checked_add(minutes))
        .ok_or_else(|| anyhow!("length too large: '{input}'"))?;
    positive_minutes(total, input)
}

fn positive_minutes(minutes: i64, input: &str) -> Result<Duration> {
    if minutes <= 0 {
        return Err(anyhow!("length must be positive: '{input}'"));
    }
    Duration::try_minutes(minutes).ok_or_else(|| anyhow!("length too large: '{input}'"))
}

/// `[local midnight today, local midnight tomorrow)` in `tz`, as UTC.
pub fn local_day_bounds(now: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.with_timezone(&tz).date_naive();
    let tomorrow = today.succ_opt().unwrap_or(today);
    (
        local_midnight(today.and_time(NaiveTime::MIN), tz),
        local_midnight(tomorrow.and_time(NaiveTime::MIN), tz),
    )
}

fn local_midnight(ndt: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    // Midnight can be skipped by a DST jump; take the first instant after it.
    tz.from_local_datetime(&ndt)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(ndt + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&ndt))
}

/// "HH:MM" in `tz`.
pub fn format_local_hm(dt: DateTime<Utc>, tz: Tz) -> String {
    dt.with_timezone(&tz).format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chicago_kata_time() {
        // Feb is CST (UTC-6)
        let tz = parse_timezone("America/Chicago").unwrap();
        let utc = parse_kata_time("2026-02-20 23:59", tz).unwrap();
        assert_eq!(utc.to_rfc3339(), "2026-02-21T05:59:00+00:00");

        let form = parse_kata_time("2026-02-20T23:59", tz).unwrap();
        assert_eq!(form, utc);
    }

    #[test]
    fn rfc3339_ignores_configured_zone() {
        let tz = parse_timezone("Asia/Tokyo").unwrap();
        let utc = parse_kata_time("2025-01-01T10:00:00Z", tz).unwrap();
        assert_eq!(utc.to_rfc3339(), "2025-01-01T10:00:00+00:00");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timezone("Mars/Olympus").is_err());
        assert!(parse_kata_time("tomorrow-ish", Tz::UTC).is_err());
    }

    #[test]
    fn parses_lengths() {
        assert_eq!(parse_kata_length("45m").unwrap(), Duration::minutes(45));
        assert_eq!(parse_kata_length("1h30m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_kata_length("2h").unwrap(), Duration::minutes(120));
        assert_eq!(parse_kata_length("25").unwrap(), Duration::minutes(25));
        assert!(parse_kata_length("0m").is_err());
        assert!(parse_kata_length("soon").is_err());
        assert!(parse_kata_length("").is_err());
    }

    #[test]
    fn oversized_lengths_are_errors() {
        for input in ["999999999999999999", "999999999999999999h", "9223372036854775807m"] {
            let err = parse_kata_length(input).unwrap_err();
            assert!(err.to_string().starts_with("length too large"), "{input}: {err}");
        }
        // more digits than i64 holds
        assert!(parse_kata_length("99999999999999999999h").is_err());
    }

    #[test]
    fn day_bounds_follow_local_midnight() {
        let tz = parse_timezone("America/Chicago").unwrap();
        let now = parse_kata_time("2026-02-20 23:00", tz).unwrap();
        let (start, end) = local_day_bounds(now, tz);
        assert_eq!(start.to_rfc3339(), "2026-02-20T06:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2026-02-21T06:00:00+00:00");
        assert_eq!(format_local_hm(now, tz), "23:00");
    }
}
