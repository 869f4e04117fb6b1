use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::bail;
use crate::error::{EngineResult, ErrorKind};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S%.f", "%H:%M"];
const TIMESTAMP_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];
const TIMESTAMPTZ_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"];

/// Parses a date, tolerating a trailing time part as rendered for date-time columns.
pub fn parse_date(s: &str) -> EngineResult<NaiveDate> {
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
        return Ok(date);
    }

    Ok(parse_timestamp(s)?.date())
}

/// Parses a time of day. A trailing UTC offset is dropped.
pub fn parse_time(s: &str) -> EngineResult<NaiveTime> {
    let s = strip_offset(s.trim());
    for format in TIME_FORMATS {
        if let Ok(time) = NaiveTime::parse_from_str(s, format) {
            return Ok(time);
        }
    }

    bail!(
        ErrorKind::ConversionError,
        "Temporal value parsing failed",
        format!("`{s}` is not a valid time")
    );
}

/// Parses a timestamp without time zone. A bare date is read as midnight.
pub fn parse_timestamp(s: &str) -> EngineResult<NaiveDateTime> {
    let s = s.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(timestamp);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
        return Ok(date.and_time(NaiveTime::MIN));
    }

    bail!(
        ErrorKind::ConversionError,
        "Temporal value parsing failed",
        format!("`{s}` is not a valid timestamp")
    );
}

/// Parses a timestamp with time zone and normalizes it to UTC.
///
/// Values without an offset are taken as UTC.
pub fn parse_timestamptz(s: &str) -> EngineResult<DateTime<Utc>> {
    let s = s.trim();
    for format in TIMESTAMPTZ_FORMATS {
        if let Ok(timestamp) = DateTime::parse_from_str(s, format) {
            return Ok(timestamp.with_timezone(&Utc));
        }
    }

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(s) {
        return Ok(timestamp.with_timezone(&Utc));
    }

    match parse_timestamp(s) {
        Ok(timestamp) => Ok(timestamp.and_utc()),
        Err(_) => bail!(
            ErrorKind::ConversionError,
            "Temporal value parsing failed",
            format!("`{s}` is not a valid timestamp with time zone")
        ),
    }
}

fn strip_offset(s: &str) -> &str {
    // Offsets start after the seconds, never inside `HH:MM`.
    match s.get(5..).and_then(|rest| rest.find(['+', '-', 'Z'])) {
        Some(pos) => &s[..pos + 5],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    #[test]
    fn parses_dates_and_date_times_as_dates() {
        assert_eq!(
            parse_date("2021-03-04").unwrap(),
            NaiveDate::from_ymd_opt(2021, 3, 4).unwrap()
        );
        assert_eq!(parse_date("2021-03-04 10:11:12").unwrap().day(), 4);
        assert!(parse_date("04/03/2021").is_err());
    }

    #[test]
    fn parses_times_with_and_without_fractions() {
        assert_eq!(parse_time("10:11:12").unwrap().second(), 12);
        assert_eq!(
            parse_time("10:11:12.250").unwrap().nanosecond(),
            250_000_000
        );
        assert_eq!(parse_time("10:11").unwrap().minute(), 11);
        assert_eq!(parse_time("10:11:12+02").unwrap().hour(), 10);
        assert!(parse_time("25:00:00").is_err());
    }

    #[test]
    fn parses_timestamps_in_common_renderings() {
        let expected = NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();

        assert_eq!(parse_timestamp("2020-01-02 03:04:05").unwrap(), expected);
        assert_eq!(parse_timestamp("2020-01-02T03:04:05").unwrap(), expected);
        assert_eq!(
            parse_timestamp("2020-01-02").unwrap(),
            NaiveDate::from_ymd_opt(2020, 1, 2)
                .unwrap()
                .and_time(NaiveTime::MIN)
        );
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn parses_timestamptz_and_normalizes_to_utc() {
        let parsed = parse_timestamptz("2020-01-02 03:04:05+02").unwrap();
        assert_eq!(parsed.hour(), 1);

        let parsed = parse_timestamptz("2020-01-02T03:04:05.5-01:00").unwrap();
        assert_eq!(parsed.hour(), 4);

        let parsed = parse_timestamptz("2020-01-02T03:04:05Z").unwrap();
        assert_eq!(parsed.hour(), 3);

        let parsed = parse_timestamptz("2020-01-02 03:04:05").unwrap();
        assert_eq!(parsed.hour(), 3);
    }
}
