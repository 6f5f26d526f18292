//! Route geometry resolution.
//!
//! Sends a route's fixes to a routing service and collects the road path plus
//! one leg (expected duration and distance) per consecutive pair of fixes.
//!
//! Routing APIs cap the number of waypoints per request, so long tracks are
//! split into chunks. Each chunk after the first starts with the last point
//! of the previous chunk's *result*, which keeps legs continuous across the
//! seams; that dependency makes the chunk requests a sequential fold.
//!
//! Any failure (non-success response, transport error, timeout) degrades the
//! whole call to straight lines with no legs. Callers read "no legs" as "no
//! anomaly scoring possible", never as an error.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, TryStreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::geo_utils::haversine_distance;
use crate::{GpsPoint, Leg, RouteGeometry, TravelMode};

/// Path and legs returned for one routing request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutedChunk {
    pub path: Vec<GpsPoint>,
    pub legs: Vec<Leg>,
}

/// A service that routes an ordered waypoint list under a travel profile.
#[async_trait]
pub trait RoutingService: Send + Sync {
    /// Route through `waypoints` in order. Expected to return one leg per
    /// consecutive waypoint pair.
    async fn route(&self, waypoints: &[GpsPoint], profile: &str) -> Result<RoutedChunk>;
}

#[async_trait]
impl<S: RoutingService + ?Sized> RoutingService for std::sync::Arc<S> {
    async fn route(&self, waypoints: &[GpsPoint], profile: &str) -> Result<RoutedChunk> {
        (**self).route(waypoints, profile).await
    }
}

/// Configuration for geometry resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Maximum waypoints per routing request (including the seam point).
    /// Default: 100
    pub chunk_size: usize,

    /// Per-request timeout in milliseconds.
    /// Default: 15000
    pub timeout_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            timeout_ms: 15_000,
        }
    }
}

impl RoutingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < 2 {
            return Err(TrackError::Config {
                message: format!("chunk_size must be at least 2, got {}", self.chunk_size),
            });
        }
        if self.timeout_ms == 0 {
            return Err(TrackError::Config {
                message: "timeout_ms must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Resolves route geometry through a [`RoutingService`].
pub struct GeometryResolver<S> {
    service: S,
    config: RoutingConfig,
}

impl<S: RoutingService> GeometryResolver<S> {
    pub fn new(service: S, config: RoutingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { service, config })
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Resolve geometry for `coords`. Never fails: routing problems degrade
    /// to the input coordinates with no legs.
    pub async fn resolve(&self, coords: &[GpsPoint], mode: TravelMode) -> RouteGeometry {
        let Some(profile) = mode.profile() else {
            return RouteGeometry::straight(coords, mode);
        };

        if coords.len() < 2 {
            return RouteGeometry {
                path: Vec::new(),
                legs: Vec::new(),
                source: coords.to_vec(),
                mode,
            };
        }

        match self.resolve_chunks(coords, profile).await {
            Ok(routed) => {
                if routed.legs.len() != coords.len() - 1 {
                    warn!(
                        "[GeometryResolver] {} legs for {} points, scoring will align by position",
                        routed.legs.len(),
                        coords.len()
                    );
                }
                info!(
                    "[GeometryResolver] Resolved {} points into {} path points, {} legs",
                    coords.len(),
                    routed.path.len(),
                    routed.legs.len()
                );
                RouteGeometry {
                    path: routed.path,
                    legs: routed.legs,
                    source: coords.to_vec(),
                    mode,
                }
            }
            Err(e) => {
                warn!(
                    "[GeometryResolver] Routing failed for {} points, using straight lines: {}",
                    coords.len(),
                    e
                );
                RouteGeometry::straight(coords, mode)
            }
        }
    }

    async fn resolve_chunks(&self, coords: &[GpsPoint], profile: &str) -> Result<RoutedChunk> {
        let chunks = partition(coords, self.config.chunk_size);
        let total = chunks.len();

        stream::iter(chunks.into_iter().enumerate().map(Ok::<_, TrackError>))
            .try_fold(RoutedChunk::default(), |mut acc, (index, chunk)| async move {
                let mut request = Vec::with_capacity(chunk.len() + 1);
                if let Some(seam) = acc.path.last() {
                    request.push(*seam);
                }
                request.extend_from_slice(chunk);

                let routed = self.request(&request, profile).await?;
                debug!(
                    "[GeometryResolver] Chunk {}/{}: {} waypoints -> {} path points, {} legs",
                    index + 1,
                    total,
                    request.len(),
                    routed.path.len(),
                    routed.legs.len()
                );

                let seam_repeated = !acc.path.is_empty() && routed.path.first() == acc.path.last();
                acc.path
                    .extend(routed.path.into_iter().skip(usize::from(seam_repeated)));
                acc.legs.extend(routed.legs);
                Ok(acc)
            })
            .await
    }

    async fn request(&self, waypoints: &[GpsPoint], profile: &str) -> Result<RoutedChunk> {
        let routed = tokio::time::timeout(
            self.config.timeout(),
            self.service.route(waypoints, profile),
        )
        .await
        .map_err(|_| TrackError::Http {
            message: format!("routing request timed out after {:?}", self.config.timeout()),
            status_code: None,
        })??;

        if routed.path.is_empty() {
            return Err(TrackError::Http {
                message: "routing service returned an empty path".to_string(),
                status_code: None,
            });
        }
        Ok(routed)
    }
}

/// Split `coords` into request-sized chunks. The first chunk holds
/// `chunk_size` points; later chunks hold `chunk_size - 1` so there is room
/// for the seam point prepended at request time.
pub fn partition(coords: &[GpsPoint], chunk_size: usize) -> Vec<&[GpsPoint]> {
    if coords.is_empty() || chunk_size < 2 {
        return Vec::new();
    }
    let (first, rest) = coords.split_at(chunk_size.min(coords.len()));
    std::iter::once(first)
        .chain(rest.chunks(chunk_size - 1))
        .collect()
}

/// Offline routing at a constant speed along straight lines.
///
/// Useful when no routing server is reachable: expected durations become
/// great-circle distance divided by the configured speed.
#[derive(Debug, Clone, Copy)]
pub struct ConstantSpeedRouter {
    /// Speed in meters per second
    pub speed_mps: f64,
}

impl ConstantSpeedRouter {
    pub fn from_kmh(speed_kmh: f64) -> Self {
        Self {
            speed_mps: speed_kmh / 3.6,
        }
    }
}

#[async_trait]
impl RoutingService for ConstantSpeedRouter {
    async fn route(&self, waypoints: &[GpsPoint], _profile: &str) -> Result<RoutedChunk> {
        if !(self.speed_mps.is_finite() && self.speed_mps > 0.0) {
            return Err(TrackError::Config {
                message: format!("speed must be positive, got {} m/s", self.speed_mps),
            });
        }
        let legs = waypoints
            .windows(2)
            .map(|pair| {
                let distance = haversine_distance(&pair[0], &pair[1]);
                Leg::new(distance / self.speed_mps, distance)
            })
            .collect();
        Ok(RoutedChunk {
            path: waypoints.to_vec(),
            legs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records requests; snaps raw waypoints east so results differ from input.
    #[derive(Default)]
    struct RecordingRouter {
        requests: Mutex<Vec<Vec<GpsPoint>>>,
        fail_on_call: Option<usize>,
        delay: Option<Duration>,
    }

    impl RecordingRouter {
        fn requests(&self) -> Vec<Vec<GpsPoint>> {
            self.requests.lock().unwrap().clone()
        }
    }

    const RAW_LON: f64 = 30.0;
    const SNAPPED_LON: f64 = 30.00001;

    fn snap(p: &GpsPoint) -> GpsPoint {
        if p.longitude == RAW_LON {
            GpsPoint::new(p.latitude, SNAPPED_LON)
        } else {
            *p
        }
    }

    #[async_trait]
    impl RoutingService for RecordingRouter {
        async fn route(&self, waypoints: &[GpsPoint], _profile: &str) -> Result<RoutedChunk> {
            let call = {
                let mut requests = self.requests.lock().unwrap();
                requests.push(waypoints.to_vec());
                requests.len() - 1
            };
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_on_call == Some(call) {
                return Err(TrackError::Http {
                    message: "Service Unavailable".to_string(),
                    status_code: Some(503),
                });
            }
            Ok(RoutedChunk {
                path: waypoints.iter().map(snap).collect(),
                legs: waypoints.windows(2).map(|_| Leg::new(60.0, 500.0)).collect(),
            })
        }
    }

    fn line(n: usize) -> Vec<GpsPoint> {
        (0..n)
            .map(|i| GpsPoint::new(50.0 + i as f64 * 0.001, RAW_LON))
            .collect()
    }

    fn resolver(router: RecordingRouter) -> GeometryResolver<RecordingRouter> {
        GeometryResolver::new(router, RoutingConfig::default()).unwrap()
    }

    #[test]
    fn test_partition_sizes() {
        let coords = line(250);
        let chunks = partition(&coords, 100);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![100, 99, 51]);
        assert!(partition(&line(100), 100).len() == 1);
        assert!(partition(&[], 100).is_empty());
    }

    #[tokio::test]
    async fn test_chunks_stitch_across_seams() {
        let r = resolver(RecordingRouter::default());
        let coords = line(250);
        let geometry = r.resolve(&coords, TravelMode::Car).await;

        let requests = r.service.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|req| req.len() <= 100));

        // Each chunk's request starts where the previous chunk's result ended
        for pair in requests.windows(2) {
            let previous_result_last = snap(pair[0].last().unwrap());
            assert_eq!(pair[1][0], previous_result_last);
        }

        assert_eq!(geometry.legs.len(), 249);
        assert_eq!(geometry.source, coords);
        // Seam point is not duplicated in the stitched path
        assert_eq!(geometry.path.len(), 100 + 99 + 51);
    }

    #[tokio::test]
    async fn test_straight_mode_skips_routing() {
        let r = resolver(RecordingRouter::default());
        let coords = line(5);
        let geometry = r.resolve(&coords, TravelMode::Straight).await;
        assert!(r.service.requests().is_empty());
        assert_eq!(geometry.path, coords);
        assert!(geometry.legs.is_empty());
    }

    #[tokio::test]
    async fn test_fewer_than_two_points() {
        let r = resolver(RecordingRouter::default());
        let geometry = r.resolve(&line(1), TravelMode::Car).await;
        assert!(geometry.path.is_empty());
        assert!(geometry.legs.is_empty());
        assert!(r.service.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failure_degrades_whole_call() {
        let r = resolver(RecordingRouter {
            fail_on_call: Some(1),
            ..Default::default()
        });
        let coords = line(250);
        let geometry = r.resolve(&coords, TravelMode::Car).await;

        // Stops at the failing chunk and discards partial results
        assert_eq!(r.service.requests().len(), 2);
        assert_eq!(geometry.path, coords);
        assert!(geometry.legs.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_degrades() {
        let router = RecordingRouter {
            delay: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        let config = RoutingConfig {
            timeout_ms: 20,
            ..RoutingConfig::default()
        };
        let r = GeometryResolver::new(router, config).unwrap();
        let coords = line(3);
        let geometry = r.resolve(&coords, TravelMode::Car).await;
        assert_eq!(geometry.path, coords);
        assert!(geometry.legs.is_empty());
    }

    #[test]
    fn test_config_validation() {
        let config = RoutingConfig {
            chunk_size: 1,
            ..RoutingConfig::default()
        };
        assert!(GeometryResolver::new(RecordingRouter::default(), config).is_err());
    }

    #[tokio::test]
    async fn test_constant_speed_router() {
        let r = GeometryResolver::new(ConstantSpeedRouter::from_kmh(36.0), RoutingConfig::default())
            .unwrap();
        let coords = line(3);
        let geometry = r.resolve(&coords, TravelMode::Car).await;
        assert_eq!(geometry.legs.len(), 2);
        // ~111 m at 10 m/s
        let leg = geometry.legs[0];
        assert!((leg.duration - leg.distance / 10.0).abs() < 1e-9);
        assert!(leg.duration > 10.0 && leg.duration < 12.0);
    }
}
