//! Unified error handling for the track-anomaly library.
//!
//! Format errors (missing columns, no usable rows) are fatal to a single
//! normalization attempt. Row-level problems never reach this type: bad rows
//! are dropped by the normalizer. Routing failures are represented here so the
//! client can report them, but the geometry resolver degrades instead of
//! propagating them.

use std::fmt;

use thiserror::Error;

/// One failed header-row attempt during file-level fallback.
#[derive(Debug, Clone)]
pub struct LayoutAttempt {
    pub header_row: usize,
    pub message: String,
}

impl LayoutAttempt {
    pub fn new(header_row: usize, message: impl Into<String>) -> Self {
        Self {
            header_row,
            message: message.into(),
        }
    }
}

impl fmt::Display for LayoutAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "header row {}: {}", self.header_row, self.message)
    }
}

/// Unified error type for track-anomaly operations.
#[derive(Debug, Error)]
pub enum TrackError {
    /// The sheet has no header row at all
    #[error("File has no header row")]
    NoHeaders,

    /// Required semantic columns could not be matched to any header
    #[error("Could not find {} column(s); headers present: {headers:?}", .missing.join(", "))]
    MissingColumns {
        missing: Vec<&'static str>,
        headers: Vec<String>,
    },

    /// Rows were present but none had valid coordinates and a parseable time
    #[error("None of the {rows} rows had valid coordinates and a parseable timestamp")]
    NoUsablePoints { rows: usize },

    /// Every header-row candidate failed
    #[error("No header layout produced usable points: {}", format_attempts(.attempts))]
    NoMatchingLayout { attempts: Vec<LayoutAttempt> },

    /// CSV decoding error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// File system error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Routing service error
    #[error("HTTP error{}: {message}", .status_code.map(|c| format!(" ({})", c)).unwrap_or_default())]
    Http {
        message: String,
        status_code: Option<u16>,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// No route with this id in the store
    #[error("Route '{id}' not found")]
    RouteNotFound { id: String },

    /// Coordinates outside the valid latitude/longitude range
    #[error("Invalid coordinates ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    /// Point index past the end of a route
    #[error("Route '{id}' has {len} points, index {index} is out of range")]
    PointOutOfRange { id: String, index: usize, len: usize },
}

fn format_attempts(attempts: &[LayoutAttempt]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for track-anomaly operations.
pub type Result<T> = std::result::Result<T, TrackError>;

/// Extension trait for converting Option to TrackError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a route-not-found error.
    fn ok_or_route_not_found(self, id: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_route_not_found(self, id: &str) -> Result<T> {
        self.ok_or_else(|| TrackError::RouteNotFound { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_display() {
        let err = TrackError::MissingColumns {
            missing: vec!["latitude", "timestamp"],
            headers: vec!["Lon".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("latitude, timestamp"));
        assert!(msg.contains("Lon"));
    }

    #[test]
    fn test_http_display_with_status() {
        let err = TrackError::Http {
            message: "Bad Gateway".to_string(),
            status_code: Some(502),
        };
        assert_eq!(err.to_string(), "HTTP error (502): Bad Gateway");

        let err = TrackError::Http {
            message: "timed out".to_string(),
            status_code: None,
        };
        assert_eq!(err.to_string(), "HTTP error: timed out");
    }

    #[test]
    fn test_no_matching_layout_lists_attempts() {
        let err = TrackError::NoMatchingLayout {
            attempts: vec![
                LayoutAttempt::new(0, "missing latitude"),
                LayoutAttempt::new(6, "no rows"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("header row 0: missing latitude"));
        assert!(msg.contains("header row 6: no rows"));
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        let result = none.ok_or_route_not_found("route-7");
        assert!(matches!(result, Err(TrackError::RouteNotFound { ref id }) if id == "route-7"));
    }
}
