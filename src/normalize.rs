//! Point normalization.
//!
//! Turns raw sheet rows into a time-ordered [`TrackPoint`] sequence. Rows
//! with an unusable latitude, longitude or timestamp are dropped quietly;
//! only a sheet in which *no* row survives is an error, since that signals a
//! header or format mismatch rather than per-row noise.
//!
//! [`normalize_with_fallback`] handles exports that put metadata rows above
//! the real header: it walks an explicit list of header-row candidates and
//! keeps the first layout that yields points.

use std::path::Path;

use chrono::FixedOffset;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::dates::DateParser;
use crate::error::{LayoutAttempt, Result, TrackError};
use crate::headers::{resolve_columns, HeaderAliases};
use crate::reader::read_csv;
use crate::{CellValue, GpsPoint, RawRow, RawSheet, TrackPoint};

/// Configuration for normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Header-row indices to try, in order.
    /// Default: [0, 6] (plain exports, then exports with a six-row preamble)
    pub header_row_candidates: Vec<usize>,

    /// Offset in minutes east of UTC assumed for timestamps without a zone.
    /// Default: 0 (UTC)
    pub utc_offset_minutes: i32,

    /// Column alias lists
    pub aliases: HeaderAliases,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            header_row_candidates: vec![0, 6],
            utc_offset_minutes: 0,
            aliases: HeaderAliases::default(),
        }
    }
}

impl NormalizeConfig {
    /// Date parser for the configured offset.
    pub fn date_parser(&self) -> Result<DateParser> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(DateParser::with_offset)
            .ok_or_else(|| TrackError::Config {
                message: format!(
                    "UTC offset of {} minutes is out of range",
                    self.utc_offset_minutes
                ),
            })
    }
}

/// Normalize rows into a timestamp-sorted point sequence.
///
/// Fails if the columns cannot be resolved, or if rows were present but none
/// produced a valid point. An empty row list yields an empty sequence.
pub fn normalize_rows(
    rows: &[RawRow],
    headers: &[String],
    config: &NormalizeConfig,
) -> Result<Vec<TrackPoint>> {
    let columns = resolve_columns(headers, &config.aliases)?;
    let parser = config.date_parser()?;
    debug!(
        "[Normalize] {} rows, naive timestamps at {}",
        rows.len(),
        parser.offset()
    );

    let mut points: Vec<TrackPoint> = rows
        .iter()
        .filter_map(|row| {
            let latitude = cell(row, &columns.latitude).as_f64()?;
            let longitude = cell(row, &columns.longitude).as_f64()?;
            if !GpsPoint::new(latitude, longitude).is_valid() {
                return None;
            }
            let timestamp = parser.parse(cell(row, &columns.timestamp))?;
            Some(TrackPoint::new(latitude, longitude, timestamp, row.clone()))
        })
        .collect();

    let dropped = rows.len() - points.len();
    if dropped > 0 {
        debug!("[Normalizer] Dropped {} of {} rows", dropped, rows.len());
    }

    if points.is_empty() && !rows.is_empty() {
        return Err(TrackError::NoUsablePoints { rows: rows.len() });
    }

    // Stable: fixes sharing a timestamp keep file order
    points.sort_by_key(|p| p.timestamp);
    Ok(points)
}

/// Normalize a parsed sheet.
pub fn normalize_sheet(sheet: &RawSheet, config: &NormalizeConfig) -> Result<Vec<TrackPoint>> {
    normalize_rows(&sheet.rows, &sheet.headers, config)
}

/// Try each header-row candidate in order until one yields points.
///
/// `load` re-parses the source assuming the given header row.
pub fn normalize_with_fallback<F>(mut load: F, config: &NormalizeConfig) -> Result<Vec<TrackPoint>>
where
    F: FnMut(usize) -> Result<RawSheet>,
{
    let mut attempts = Vec::with_capacity(config.header_row_candidates.len());

    for &header_row in &config.header_row_candidates {
        let outcome = load(header_row).and_then(|sheet| normalize_sheet(&sheet, config));
        match outcome {
            Ok(points) if !points.is_empty() => {
                if !attempts.is_empty() {
                    info!(
                        "[Normalizer] Header row {} produced {} points after {} failed layout(s)",
                        header_row,
                        points.len(),
                        attempts.len()
                    );
                }
                return Ok(points);
            }
            Ok(_) => attempts.push(LayoutAttempt::new(header_row, "no data rows")),
            Err(TrackError::Io(e)) => return Err(TrackError::Io(e)),
            Err(e) => attempts.push(LayoutAttempt::new(header_row, e.to_string())),
        }
    }

    Err(TrackError::NoMatchingLayout { attempts })
}

/// Read and normalize a CSV file, applying the header-row fallback.
pub fn normalize_file(path: impl AsRef<Path>, config: &NormalizeConfig) -> Result<Vec<TrackPoint>> {
    let path = path.as_ref();
    let points = normalize_with_fallback(|header_row| read_csv(path, header_row), config)?;
    info!(
        "[Normalizer] {}: {} points",
        path.display(),
        points.len()
    );
    Ok(points)
}

static EMPTY_CELL: CellValue = CellValue::Empty;

fn cell<'a>(row: &'a RawRow, header: &str) -> &'a CellValue {
    row.get(header).unwrap_or(&EMPTY_CELL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_csv_str;
    use chrono::{TimeZone, Utc};

    fn headers() -> Vec<String> {
        vec!["Lat".to_string(), "Lon".to_string(), "Time".to_string(), "Speed".to_string()]
    }

    fn row(lat: &str, lon: &str, time: &str) -> RawRow {
        [("Lat", lat), ("Lon", lon), ("Time", time), ("Speed", "42")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), CellValue::from_text(v)))
            .collect()
    }

    #[test]
    fn test_sorted_by_timestamp_regardless_of_row_order() {
        let rows = vec![
            row("50.3", "30.3", "15.03.2024 о 14:40:00"),
            row("50.1", "30.1", "15.03.2024 о 14:20:00"),
            row("50.2", "30.2", "15.03.2024 о 14:30:00"),
        ];
        let points = normalize_rows(&rows, &headers(), &NormalizeConfig::default()).unwrap();
        assert_eq!(points.len(), 3);
        assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(points[0].latitude, 50.1);
        assert_eq!(points[2].latitude, 50.3);
    }

    #[test]
    fn test_comma_decimals_and_whitespace() {
        let rows = vec![row(" 50,4501 ", "30,5234", "2024-03-15 14:30:00")];
        let points = normalize_rows(&rows, &headers(), &NormalizeConfig::default()).unwrap();
        assert_eq!(points[0].latitude, 50.4501);
        assert_eq!(points[0].longitude, 30.5234);
        assert_eq!(points[0].timestamp, Utc.with_ymd_and_hms(2024, 3, 15, 14, 30, 0).unwrap());
    }

    #[test]
    fn test_invalid_rows_dropped() {
        let rows = vec![
            row("50.1", "30.1", "2024-03-15 14:30:00"),
            row("abc", "30.1", "2024-03-15 14:31:00"),
            row("50.1", "", "2024-03-15 14:32:00"),
            row("50.1", "30.1", "yesterday"),
            row("95.0", "30.1", "2024-03-15 14:33:00"),
        ];
        let points = normalize_rows(&rows, &headers(), &NormalizeConfig::default()).unwrap();
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn test_original_data_round_trip() {
        let rows = vec![row("50,1", "30,1", "15.03.2024 о 14:30:00")];
        let points = normalize_rows(&rows, &headers(), &NormalizeConfig::default()).unwrap();
        let original = &points[0].original_data;
        for header in headers() {
            assert_eq!(original[&header], rows[0][&header]);
        }
    }

    #[test]
    fn test_all_rows_invalid_is_error() {
        let rows = vec![row("x", "y", "z"), row("", "", "")];
        let err = normalize_rows(&rows, &headers(), &NormalizeConfig::default()).unwrap_err();
        assert!(matches!(err, TrackError::NoUsablePoints { rows: 2 }));
    }

    #[test]
    fn test_empty_input_is_empty_output() {
        let points = normalize_rows(&[], &headers(), &NormalizeConfig::default()).unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn test_missing_headers_is_error() {
        let h = vec!["Speed".to_string()];
        let err = normalize_rows(&[], &h, &NormalizeConfig::default()).unwrap_err();
        assert!(matches!(err, TrackError::MissingColumns { .. }));
    }

    #[test]
    fn test_fallback_uses_second_candidate() {
        let mut csv = String::new();
        for i in 0..6 {
            csv.push_str(&format!("Meta {};value\n", i));
        }
        csv.push_str("Latitude;Longitude;Date/Time\n");
        csv.push_str("50,45;30,52;15.03.2024 о 14:30:00\n");
        csv.push_str("50,46;30,53;15.03.2024 о 14:35:00\n");

        let mut tried = Vec::new();
        let points = normalize_with_fallback(
            |header_row| {
                tried.push(header_row);
                read_csv_str(&csv, header_row)
            },
            &NormalizeConfig::default(),
        )
        .unwrap();

        assert_eq!(tried, vec![0, 6]);
        assert_eq!(points.len(), 2);
    }

    #[test]
    fn test_fallback_reports_every_attempt() {
        let csv = "Speed;Heading\n10;20\n";
        let err = normalize_with_fallback(
            |header_row| read_csv_str(csv, header_row),
            &NormalizeConfig::default(),
        )
        .unwrap_err();

        match err {
            TrackError::NoMatchingLayout { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].header_row, 0);
                assert_eq!(attempts[1].header_row, 6);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_out_of_range_offset_is_config_error() {
        let config = NormalizeConfig {
            utc_offset_minutes: 24 * 60,
            ..NormalizeConfig::default()
        };
        let rows = vec![row("50.1", "30.1", "15.03.2024 о 14:30:00")];
        let err = normalize_rows(&rows, &headers(), &config).unwrap_err();
        assert!(matches!(err, TrackError::Config { .. }));
    }

    #[test]
    fn test_overflowing_offset_is_config_error() {
        for minutes in [40_000_000, i32::MIN] {
            let config = NormalizeConfig {
                utc_offset_minutes: minutes,
                ..NormalizeConfig::default()
            };
            assert!(matches!(config.date_parser(), Err(TrackError::Config { .. })));
        }
    }

    #[test]
    fn test_duplicate_time_columns_use_first() {
        let csv = "Lat,Lon,Time,Time\n50.1,30.1,2024-03-15 10:00:00,garbage\n";
        let sheet = read_csv_str(csv, 0).unwrap();
        let points = normalize_sheet(&sheet, &NormalizeConfig::default()).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(
            points[0].timestamp,
            Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap()
        );
        assert_eq!(
            points[0].original_data["Time_1"],
            CellValue::Text("garbage".to_string())
        );
    }

    #[test]
    fn test_utc_offset_applied() {
        let config = NormalizeConfig {
            utc_offset_minutes: 120,
            ..NormalizeConfig::default()
        };
        let rows = vec![row("50.1", "30.1", "15.03.2024 о 14:30:00")];
        let points = normalize_rows(&rows, &headers(), &config).unwrap();
        assert_eq!(points[0].timestamp, Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 0).unwrap());
    }
}
