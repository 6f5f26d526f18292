//! Anomaly scoring.
//!
//! Compares the time actually spent between consecutive fixes with the
//! routing service's expected duration for the same leg, and tags the
//! arrival fix when the overrun crosses a threshold.
//!
//! Scoring is a full recomputation every time: previous tags are cleared
//! before anything is scored, so running it twice on unchanged input gives
//! identical results.
//!
//! ## Example
//! ```rust
//! use track_anomaly::anomaly::{classify, AnomalyThresholds};
//! use track_anomaly::AnomalyLevel;
//!
//! let thresholds = AnomalyThresholds::default();
//! assert_eq!(classify(10.0, &thresholds), AnomalyLevel::None);
//! assert_eq!(classify(30.0, &thresholds), AnomalyLevel::Medium);
//! assert_eq!(classify(50.0, &thresholds), AnomalyLevel::High);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::{AnomalyLevel, Leg, TimingInfo, TrackPoint};

/// Percentage overrun thresholds for tagging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyThresholds {
    /// Overrun (percent of expected) at which a fix is tagged medium.
    /// Default: 20.0
    pub warning: f64,

    /// Overrun (percent of expected) at which a fix is tagged high.
    /// Default: 50.0
    pub danger: f64,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            warning: 20.0,
            danger: 50.0,
        }
    }
}

impl AnomalyThresholds {
    pub fn new(warning: f64, danger: f64) -> Result<Self> {
        let thresholds = Self { warning, danger };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.warning.is_finite() || !self.danger.is_finite() {
            return Err(TrackError::Config {
                message: "anomaly thresholds must be finite".to_string(),
            });
        }
        if self.danger <= self.warning {
            return Err(TrackError::Config {
                message: format!(
                    "danger threshold ({}) must exceed warning threshold ({})",
                    self.danger, self.warning
                ),
            });
        }
        Ok(())
    }
}

/// Level for a percentage overrun; [`AnomalyLevel::None`] below the warning threshold.
pub fn classify(diff_percent: f64, thresholds: &AnomalyThresholds) -> AnomalyLevel {
    if diff_percent >= thresholds.danger {
        AnomalyLevel::High
    } else if diff_percent >= thresholds.warning {
        AnomalyLevel::Medium
    } else {
        AnomalyLevel::None
    }
}

/// Rescore every fix of a route against its legs.
///
/// Leg `i` covers the segment from fix `i` to fix `i + 1`; the result is
/// stored on the arrival fix, so the first fix is never tagged. Scored fixes
/// within tolerance carry [`AnomalyLevel::None`]. Segments
/// where either the actual or the expected duration is not strictly positive
/// are left untagged. With no legs at all, every fix ends up cleared.
pub fn score_points(points: &mut [TrackPoint], legs: &[Leg], thresholds: &AnomalyThresholds) {
    points.iter_mut().for_each(TrackPoint::clear_anomaly);

    if legs.is_empty() {
        return;
    }

    for (i, leg) in legs.iter().enumerate() {
        let Some(start) = points.get(i).map(|p| p.timestamp) else {
            break;
        };
        let Some(arrival) = points.get_mut(i + 1) else {
            break;
        };

        let actual_seconds = (arrival.timestamp - start).num_milliseconds() as f64 / 1000.0;
        let expected_seconds = leg.duration;
        if !(actual_seconds > 0.0 && expected_seconds > 0.0) || !expected_seconds.is_finite() {
            continue;
        }

        let diff_seconds = actual_seconds - expected_seconds;
        let diff_percent = 100.0 * diff_seconds / expected_seconds;

        arrival.timing_info = Some(TimingInfo {
            expected_seconds,
            actual_seconds,
            diff_seconds,
            diff_percent,
        });
        arrival.anomaly_level = Some(classify(diff_percent, thresholds));
    }
}

/// Counts for badge display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalySummary {
    /// Fixes carrying timing info
    pub scored: usize,
    pub medium: usize,
    pub high: usize,
}

pub fn summarize(points: &[TrackPoint]) -> AnomalySummary {
    points.iter().fold(AnomalySummary::default(), |mut acc, p| {
        if p.timing_info.is_some() {
            acc.scored += 1;
        }
        match p.anomaly_level {
            Some(AnomalyLevel::Medium) => acc.medium += 1,
            Some(AnomalyLevel::High) => acc.high += 1,
            Some(AnomalyLevel::None) | None => {}
        }
        acc
    })
}
