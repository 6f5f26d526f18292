//! # Track Anomaly
//!
//! GPS track normalization and travel-time anomaly scoring for files exported
//! by vehicle-tracking devices.
//!
//! This library provides:
//! - Header resolution for heterogeneous, multilingual column layouts
//! - Tolerant timestamp parsing (localized text, spreadsheet serials, ISO)
//! - Normalization of raw rows into a time-ordered [`TrackPoint`] sequence
//! - Road geometry resolution through a routing service, chunked and stitched
//! - Anomaly scoring of actual vs. expected travel time per segment
//!
//! ## Features
//!
//! - **`http`** - OSRM-compatible HTTP routing client (default)
//! - **`cli`** - Build the `track-anomaly` command-line tool
//!
//! ## Quick Start
//!
//! ```rust
//! use track_anomaly::{
//!     normalize_rows, score_points, AnomalyThresholds, CellValue, Leg, NormalizeConfig, RawRow,
//! };
//!
//! let headers = vec!["Latitude".to_string(), "Longitude".to_string(), "Time".to_string()];
//! let row = |lat: &str, lon: &str, time: &str| -> RawRow {
//!     [("Latitude", lat), ("Longitude", lon), ("Time", time)]
//!         .into_iter()
//!         .map(|(k, v)| (k.to_string(), CellValue::Text(v.to_string())))
//!         .collect()
//! };
//! let rows = vec![
//!     row("50,4501", "30,5234", "15.03.2024 14:30:00"),
//!     row("50,4601", "30,5334", "15.03.2024 14:45:00"),
//! ];
//!
//! let mut points = normalize_rows(&rows, &headers, &NormalizeConfig::default()).unwrap();
//! let legs = vec![Leg::new(600.0, 1500.0)];
//! score_points(&mut points, &legs, &AnomalyThresholds::default());
//! assert!(points[1].timing_info.is_some());
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{LayoutAttempt, OptionExt, Result, TrackError};

// Geographic utilities (distance, path length)
pub mod geo_utils;

// Header/column resolution
pub mod headers;
pub use headers::{find_column, resolve_columns, HeaderAliases, ResolvedColumns, TrackField};

// Timestamp parsing
pub mod dates;
pub use dates::DateParser;

// CSV row extraction
pub mod reader;
pub use reader::{read_csv, read_csv_str};

// Point normalization and header-row fallback
pub mod normalize;
pub use normalize::{normalize_file, normalize_rows, normalize_with_fallback, NormalizeConfig};

// Route geometry resolution (chunked routing requests)
pub mod geometry;
pub use geometry::{GeometryResolver, RoutedChunk, RoutingConfig, RoutingService};

// HTTP routing client
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::OsrmClient;

// Anomaly scoring
pub mod anomaly;
pub use anomaly::{classify, score_points, summarize, AnomalySummary, AnomalyThresholds};

// Per-route state store
pub mod store;
pub use store::{with_store, GeometryCallback, RouteStore, StoreStats, STORE};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use track_anomaly::GpsPoint;
/// let point = GpsPoint::new(50.4501, 30.5234); // Kyiv
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// A raw spreadsheet cell, passed through untouched for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Bool(bool),
    Text(String),
    Empty,
}

impl CellValue {
    /// Build a cell from CSV text; blank text becomes `Empty`.
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(trimmed.to_string())
        }
    }

    /// Interpret the cell as a float, accepting comma decimal separators.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            CellValue::Number(n) => *n,
            CellValue::Text(s) => s.trim().replace(',', ".").parse::<f64>().ok()?,
            CellValue::Bool(_) | CellValue::Empty => return None,
        };
        value.is_finite().then_some(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::from_text(value)
    }
}

/// One row of a sheet, keyed by the original header string.
pub type RawRow = HashMap<String, CellValue>;

/// Parsed sheet contents: header list plus rows keyed by header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSheet {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Severity of a timing deviation on the segment arriving at a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyLevel {
    None,
    Medium,
    High,
}

/// Actual vs. expected travel time for the segment ending at a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingInfo {
    pub expected_seconds: f64,
    pub actual_seconds: f64,
    pub diff_seconds: f64,
    pub diff_percent: f64,
}

/// One normalized GPS fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    /// The source row, keyed by the original header strings
    pub original_data: RawRow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_level: Option<AnomalyLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing_info: Option<TimingInfo>,
}

impl TrackPoint {
    pub fn new(
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
        original_data: RawRow,
    ) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            original_data,
            anomaly_level: None,
            timing_info: None,
        }
    }

    pub fn position(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }

    /// Drop any scoring result from a previous run.
    pub fn clear_anomaly(&mut self) {
        self.anomaly_level = None;
        self.timing_info = None;
    }
}

/// A routing-service segment between two consecutive waypoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    /// Expected traversal time in seconds
    pub duration: f64,
    /// Road distance in meters
    pub distance: f64,
}

impl Leg {
    pub fn new(duration: f64, distance: f64) -> Self {
        Self { duration, distance }
    }
}

/// How a route is travelled; decides whether road routing applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    #[default]
    Car,
    Bike,
    Foot,
    /// Straight lines between fixes, no road network
    Straight,
}

impl TravelMode {
    /// Routing profile name, or `None` when the mode has no road-network meaning.
    pub fn profile(&self) -> Option<&'static str> {
        match self {
            TravelMode::Car => Some("car"),
            TravelMode::Bike => Some("bike"),
            TravelMode::Foot => Some("foot"),
            TravelMode::Straight => None,
        }
    }
}

impl std::str::FromStr for TravelMode {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "car" | "driving" => Ok(TravelMode::Car),
            "bike" | "bicycle" | "cycling" => Ok(TravelMode::Bike),
            "foot" | "walking" => Ok(TravelMode::Foot),
            "straight" | "none" | "direct" => Ok(TravelMode::Straight),
            other => Err(TrackError::Config {
                message: format!("Unknown travel mode '{}'", other),
            }),
        }
    }
}

/// Resolved road path plus per-leg expectations for one point sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteGeometry {
    /// Path to draw, in order
    pub path: Vec<GpsPoint>,
    /// One leg per consecutive waypoint pair; empty when routing was skipped or failed
    pub legs: Vec<Leg>,
    /// Coordinates this geometry was computed from
    pub source: Vec<GpsPoint>,
    pub mode: TravelMode,
}

impl RouteGeometry {
    /// Straight-line geometry with no legs (skipped or failed routing).
    pub fn straight(coords: &[GpsPoint], mode: TravelMode) -> Self {
        Self {
            path: coords.to_vec(),
            legs: Vec::new(),
            source: coords.to_vec(),
            mode,
        }
    }

    /// Whether this geometry was computed from exactly these points.
    pub fn is_current_for(&self, points: &[TrackPoint]) -> bool {
        self.source.len() == points.len()
            && self
                .source
                .iter()
                .zip(points)
                .all(|(s, p)| *s == p.position())
    }
}

/// One imported file's worth of points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: String,
    pub name: String,
    /// Sorted ascending by timestamp
    pub points: Vec<TrackPoint>,
    pub geometry: Option<RouteGeometry>,
    pub is_locked: bool,
    pub is_visible: bool,
}

impl Route {
    pub fn new(id: String, name: String, points: Vec<TrackPoint>) -> Self {
        Self {
            id,
            name,
            points,
            geometry: None,
            is_locked: false,
            is_visible: true,
        }
    }

    /// Current point coordinates, in order.
    pub fn coordinates(&self) -> Vec<GpsPoint> {
        self.points.iter().map(TrackPoint::position).collect()
    }

    /// Legs usable for scoring: only from a geometry computed for the current points.
    pub fn current_legs(&self) -> &[Leg] {
        match &self.geometry {
            Some(geometry) if geometry.is_current_for(&self.points) => &geometry.legs,
            _ => &[],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
