//! Timestamp parsing for tracker exports.
//!
//! Devices write time cells in several incompatible ways. [`DateParser`]
//! tries, in order:
//!
//! 1. Localized dotted text, `DD.MM.YYYY [connector] HH:MM[:SS]`, where the
//!    connector is a single word such as "о" or "at"
//! 2. Spreadsheet serial dates (days since 1899-12-30), with comma decimals
//! 3. Common free-form layouts (RFC 3339, RFC 2822, ISO-like, slashes)
//!
//! The first success wins. Anything else is `None`, and the caller drops
//! the row.
//!
//! ## Example
//! ```rust
//! use track_anomaly::{CellValue, DateParser};
//!
//! let parser = DateParser::default();
//! let a = parser.parse(&CellValue::from("15.03.2024 о 14:30:00"));
//! let b = parser.parse(&CellValue::from("2024-03-15T14:30:00"));
//! assert!(a.is_some());
//! assert_eq!(a, b);
//! ```

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};

use crate::CellValue;

/// Serial day number of 1970-01-01 in the 1899-12-30 spreadsheet epoch.
const SERIAL_UNIX_EPOCH: f64 = 25569.0;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Serials spreadsheets can represent: 1900-01-01 up to the end of 9999-12-31.
const SERIAL_RANGE: std::ops::Range<f64> = 1.0..2_958_466.0;

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%d.%m.%Y %H:%M:%S%.f",
    "%d.%m.%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
];

const OFFSET_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%d/%m/%Y"];

/// Converts raw time cells into UTC instants.
#[derive(Debug, Clone, Copy)]
pub struct DateParser {
    /// Offset assumed for timestamps that carry no zone of their own
    offset: FixedOffset,
}

impl Default for DateParser {
    fn default() -> Self {
        Self::utc()
    }
}

impl DateParser {
    /// Parser treating naive timestamps as UTC.
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    /// Parser treating naive timestamps as local time at `offset`.
    pub fn with_offset(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Parse one cell; `None` means the row should be dropped.
    pub fn parse(&self, cell: &CellValue) -> Option<DateTime<Utc>> {
        match cell {
            CellValue::Number(serial) => from_serial(*serial),
            CellValue::Text(text) => self.parse_text(text),
            CellValue::Bool(_) | CellValue::Empty => None,
        }
    }

    /// Parse a textual timestamp.
    pub fn parse_text(&self, text: &str) -> Option<DateTime<Utc>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if let Some(naive) = parse_dotted(text) {
            return self.localize(naive);
        }

        if let Ok(serial) = text.replace(',', ".").parse::<f64>() {
            if let Some(instant) = from_serial(serial) {
                return Some(instant);
            }
        }

        self.parse_free_form(text)
    }

    fn parse_free_form(&self, text: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
            return Some(dt.with_timezone(&Utc));
        }

        for format in OFFSET_DATETIME_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(text, format) {
                return Some(dt.with_timezone(&Utc));
            }
        }

        for format in NAIVE_DATETIME_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                return self.localize(naive);
            }
        }

        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(text, format) {
                return self.localize(date.and_time(NaiveTime::MIN));
            }
        }

        None
    }

    fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Spreadsheet serial day number to an instant: `(serial - 25569) * 86400` seconds.
///
/// Serials outside the range a spreadsheet can hold (including non-finite
/// values) are rejected.
pub fn from_serial(serial: f64) -> Option<DateTime<Utc>> {
    if !SERIAL_RANGE.contains(&serial) {
        return None;
    }
    let millis = ((serial - SERIAL_UNIX_EPOCH) * MILLIS_PER_DAY).round();
    DateTime::from_timestamp_millis(millis as i64)
}

/// `DD.MM.YYYY [connector] HH:MM[:SS]`, e.g. "15.03.2024 о 14:30:00".
fn parse_dotted(text: &str) -> Option<NaiveDateTime> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let (date_token, time_token) = match tokens.as_slice() {
        [date, time] => (*date, *time),
        [date, connector, time] if !connector.chars().any(|c| c.is_ascii_digit()) => {
            (*date, *time)
        }
        _ => return None,
    };

    let date_token = date_token.trim_end_matches(',');
    let date_parts = split_numeric(date_token, '.')?;
    let [day, month, year] = date_parts.as_slice() else {
        return None;
    };
    if year.len() != 4 || day.len() > 2 || month.len() > 2 {
        return None;
    }

    let time_parts = split_numeric(time_token, ':')?;
    let (hour, minute, second) = match time_parts.as_slice() {
        [h, m] => (*h, *m, "0"),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };

    let date = NaiveDate::from_ymd_opt(
        year.parse().ok()?,
        month.parse().ok()?,
        day.parse().ok()?,
    )?;
    let time = NaiveTime::from_hms_opt(
        hour.parse().ok()?,
        minute.parse().ok()?,
        second.parse().ok()?,
    )?;
    Some(date.and_time(time))
}

/// Split on `sep`, requiring every part to be a non-empty run of ASCII digits.
fn split_numeric(token: &str, sep: char) -> Option<Vec<&str>> {
    let parts: Vec<&str> = token.split(sep).collect();
    let all_digits = parts
        .iter()
        .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    all_digits.then_some(parts)
}
