//! Zip entry timestamps
//!
//! Zip stores MS-DOS dates, which only cover 1980-01-01 to 2107-12-31 with
//! two-second resolution. Filesystem times are clamped into that range.
//! Caller-supplied timestamps are either integers (seconds, or a finer unit
//! detected by magnitude) which are clamped to the floor, or text, which
//! must already be representable.

use crate::error::{PackError, PackResult};
use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;
use zip::DateTime as ZipDateTime;

/// 1980-01-01T00:00:00Z in seconds since the Unix epoch
pub const MIN_ZIP_EPOCH: i64 = 315_532_800;

/// Number of decimal digits of a seconds value that still fits zip's range
const SECONDS_DIGITS: u32 = 10;

const MIN_YEAR: i32 = 1980;
const MAX_YEAR: i32 = 2107;

/// A caller-supplied entry timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Integer time since the Unix epoch (seconds, or ms/us/ns by magnitude)
    Epoch(i64),
    /// Numeric string, fractional seconds, or an RFC 3339 date
    Text(String),
}

impl Timestamp {
    /// Timestamp used for generated content: the earliest zip date
    pub const GENERATED: Timestamp = Timestamp::Epoch(0);

    /// Convert to a zip date, applying clamping rules
    pub fn to_zip_datetime(&self) -> PackResult<ZipDateTime> {
        match self {
            Self::Epoch(value) => Ok(from_epoch_integer(*value)),
            Self::Text(text) => from_text(text),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Epoch(value) => write!(f, "{}", value),
            Self::Text(text) => write!(f, "{}", text),
        }
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Self::Epoch(value)
    }
}

impl FromStr for Timestamp {
    type Err = PackError;

    /// Integers become [`Timestamp::Epoch`]; anything else is kept as text
    /// and validated when converted
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(invalid(s, "empty timestamp"));
        }
        match trimmed.parse::<i64>() {
            Ok(value) => Ok(Self::Epoch(value)),
            Err(_) => Ok(Self::Text(trimmed.to_string())),
        }
    }
}

/// Integers below the zip floor clamp to it; longer values are scaled down
/// to seconds by their digit count.
fn from_epoch_integer(value: i64) -> ZipDateTime {
    if value < MIN_ZIP_EPOCH {
        return ZipDateTime::default();
    }
    clamped(&utc_from_seconds(normalize_magnitude(value)))
}

fn normalize_magnitude(value: i64) -> i64 {
    let digits = value.unsigned_abs().checked_ilog10().unwrap_or(0) + 1;
    if digits > SECONDS_DIGITS {
        value / 10_i64.pow(digits - SECONDS_DIGITS)
    } else {
        value
    }
}

fn from_text(text: &str) -> PackResult<ZipDateTime> {
    let trimmed = text.trim();

    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let value = trimmed
            .parse::<i64>()
            .map_err(|e| invalid(text, e.to_string()))?;
        return Ok(from_epoch_integer(value));
    }

    let datetime = if let Ok(seconds) = trimmed.parse::<f64>() {
        if !seconds.is_finite() {
            return Err(invalid(text, "not a finite number"));
        }
        utc_from_seconds(seconds.floor() as i64)
    } else {
        DateTime::parse_from_rfc3339(trimmed)
            .map(|dt| dt.naive_utc())
            .map_err(|e| invalid(text, e.to_string()))?
    };

    if datetime.year() < MIN_YEAR {
        return Err(PackError::TimestampBeforeZipEpoch(text.to_string()));
    }
    if datetime.year() > MAX_YEAR {
        return Err(invalid(text, "zip dates end in 2107"));
    }
    to_zip(&datetime).ok_or_else(|| invalid(text, "not representable as a zip date"))
}

/// Convert a filesystem modification time, clamping into zip's range
pub fn from_system_time(time: SystemTime) -> ZipDateTime {
    let datetime: DateTime<Utc> = time.into();
    clamped(&datetime.naive_utc())
}

fn utc_from_seconds(seconds: i64) -> NaiveDateTime {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .map(|dt| dt.naive_utc())
        .unwrap_or(NaiveDateTime::MAX)
}

fn clamped(datetime: &NaiveDateTime) -> ZipDateTime {
    if datetime.year() < MIN_YEAR {
        ZipDateTime::default()
    } else if datetime.year() > MAX_YEAR {
        max_zip_datetime()
    } else {
        to_zip(datetime).unwrap_or_default()
    }
}

fn max_zip_datetime() -> ZipDateTime {
    ZipDateTime::from_date_and_time(2107, 12, 31, 23, 59, 59).unwrap_or_default()
}

fn to_zip(datetime: &NaiveDateTime) -> Option<ZipDateTime> {
    ZipDateTime::from_date_and_time(
        u16::try_from(datetime.year()).ok()?,
        datetime.month() as u8,
        datetime.day() as u8,
        datetime.hour() as u8,
        datetime.minute() as u8,
        datetime.second() as u8,
    )
    .ok()
}

fn invalid(value: &str, reason: impl Into<String>) -> PackError {
    PackError::InvalidTimestamp {
        value: value.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parts(dt: ZipDateTime) -> (u16, u8, u8, u8, u8, u8) {
        (
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
        )
    }

    #[test]
    fn zero_clamps_to_floor() {
        let dt = Timestamp::GENERATED.to_zip_datetime().unwrap();
        assert_eq!(parts(dt), (1980, 1, 1, 0, 0, 0));
    }

    #[test]
    fn numeric_text_before_floor_clamps() {
        let dt = Timestamp::Text("12345".into()).to_zip_datetime().unwrap();
        assert_eq!(parts(dt), (1980, 1, 1, 0, 0, 0));
    }

    #[test]
    fn seconds_convert_in_utc() {
        // 2023-11-14T22:13:20Z
        let dt = Timestamp::Epoch(1_700_000_000).to_zip_datetime().unwrap();
        assert_eq!(parts(dt), (2023, 11, 14, 22, 13, 20));
    }

    #[test]
    fn nanoseconds_are_scaled() {
        let seconds = Timestamp::Epoch(1_700_000_000).to_zip_datetime().unwrap();
        let nanos = Timestamp::Epoch(1_700_000_000_123_456_789)
            .to_zip_datetime()
            .unwrap();
        let nanos_text = Timestamp::Text("1700000000123456789".into())
            .to_zip_datetime()
            .unwrap();
        assert_eq!(parts(seconds), parts(nanos));
        assert_eq!(parts(seconds), parts(nanos_text));
    }

    #[test]
    fn text_before_1980_is_error() {
        let err = Timestamp::Text("1979-06-01T00:00:00Z".into())
            .to_zip_datetime()
            .unwrap_err();
        assert!(matches!(err, PackError::TimestampBeforeZipEpoch(_)));

        let err = Timestamp::Text("100.5".into()).to_zip_datetime().unwrap_err();
        assert!(matches!(err, PackError::TimestampBeforeZipEpoch(_)));
    }

    #[test]
    fn text_fractional_and_rfc3339() {
        let frac = Timestamp::Text("1700000000.75".into())
            .to_zip_datetime()
            .unwrap();
        assert_eq!(parts(frac), (2023, 11, 14, 22, 13, 20));

        let rfc = Timestamp::Text("2001-02-03T04:05:06Z".into())
            .to_zip_datetime()
            .unwrap();
        assert_eq!(parts(rfc), (2001, 2, 3, 4, 5, 6));
    }

    #[test]
    fn garbage_text_is_invalid() {
        let err = Timestamp::Text("yesterday".into())
            .to_zip_datetime()
            .unwrap_err();
        assert!(matches!(err, PackError::InvalidTimestamp { .. }));
    }

    #[test]
    fn system_time_clamps_both_ends() {
        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(86_400);
        assert_eq!(parts(from_system_time(old)), (1980, 1, 1, 0, 0, 0));

        // Year 2200
        let future = SystemTime::UNIX_EPOCH + Duration::from_secs(7_258_118_400);
        let (year, month, day, hour, minute, _) = parts(from_system_time(future));
        assert_eq!((year, month, day, hour, minute), (2107, 12, 31, 23, 59));
    }

    #[test]
    fn deserializes_number_or_string() {
        let n: Timestamp = serde_json::from_str("0").unwrap();
        assert_eq!(n, Timestamp::Epoch(0));
        let s: Timestamp = serde_json::from_str("\"1700000000\"").unwrap();
        assert_eq!(s, Timestamp::Text("1700000000".into()));
    }

    #[test]
    fn parses_cli_values() {
        assert_eq!("1700000000".parse::<Timestamp>().unwrap(), Timestamp::Epoch(1_700_000_000));
        assert_eq!(
            " 2001-02-03T04:05:06Z ".parse::<Timestamp>().unwrap(),
            Timestamp::Text("2001-02-03T04:05:06Z".into())
        );
        assert!("".parse::<Timestamp>().is_err());
    }
}
