//! # Route Store
//!
//! Keeps every imported route keyed by id. Each route sits behind its own
//! async mutex, so one route has a single writer at a time (a geometry
//! refresh holds the lock across the routing call) while different routes
//! are processed independently. The outer map lock is only held to look up
//! or insert handles, never across an await.
//!
//! Front ends that want process-wide state use the [`STORE`] singleton.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use log::{debug, info};
use once_cell::sync::Lazy;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::anomaly::{score_points, summarize, AnomalySummary, AnomalyThresholds};
use crate::error::{OptionExt, Result, TrackError};
use crate::geo_utils::polyline_length;
use crate::geometry::{GeometryResolver, RoutingService};
use crate::normalize::{normalize_with_fallback, NormalizeConfig};
use crate::reader::{decode_text, read_csv_str};
use crate::{GpsPoint, Route, RouteGeometry, TrackPoint, TravelMode};

/// Invoked with the route id and its new geometry after a refresh.
pub type GeometryCallback = Arc<dyn Fn(&str, &RouteGeometry) + Send + Sync>;

type RouteHandle = Arc<Mutex<Route>>;

/// Store of imported routes with per-route locking.
pub struct RouteStore {
    routes: RwLock<HashMap<String, RouteHandle>>,
    next_id: AtomicU64,
}

impl RouteStore {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Route Management
    // ========================================================================

    /// Add a normalized route and return its new id.
    pub fn insert_route(&self, name: &str, points: Vec<TrackPoint>) -> String {
        let id = format!("route-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let route = Route::new(id.clone(), name.to_string(), points);
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::new(Mutex::new(route)));
        id
    }

    /// Read and normalize a CSV export, then add it as a route.
    pub async fn import_file(
        &self,
        path: impl AsRef<Path>,
        config: &NormalizeConfig,
    ) -> Result<String> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let content = decode_text(&bytes, path);
        let points =
            normalize_with_fallback(|header_row| read_csv_str(&content, header_row), config)?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let id = self.insert_route(&name, points);
        info!("[RouteStore] Imported {} as {}", path.display(), id);
        Ok(id)
    }

    /// Snapshot of a route.
    pub async fn get(&self, id: &str) -> Option<Route> {
        let handle = self.handle(id).ok()?;
        let route = handle.lock().await;
        Some(route.clone())
    }

    /// All route ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn route_count(&self) -> usize {
        self.routes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Remove a route. Returns false if it did not exist.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some();
        if removed {
            info!("[RouteStore] Removed {}", id);
        }
        removed
    }

    /// Remove every route.
    pub fn clear(&self) {
        self.routes.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub async fn set_locked(&self, id: &str, locked: bool) -> Result<()> {
        self.handle(id)?.lock().await.is_locked = locked;
        Ok(())
    }

    pub async fn set_visible(&self, id: &str, visible: bool) -> Result<()> {
        self.handle(id)?.lock().await.is_visible = visible;
        Ok(())
    }

    // ========================================================================
    // Editing and Recomputation
    // ========================================================================

    /// Move one fix. The route's geometry no longer matches its points, so it
    /// is dropped and all anomaly tags are cleared until the next refresh.
    pub async fn move_point(
        &self,
        id: &str,
        index: usize,
        latitude: f64,
        longitude: f64,
    ) -> Result<()> {
        if !GpsPoint::new(latitude, longitude).is_valid() {
            return Err(TrackError::InvalidCoordinates {
                latitude,
                longitude,
            });
        }

        let handle = self.handle(id)?;
        let mut route = handle.lock().await;
        let len = route.points.len();
        let point = route
            .points
            .get_mut(index)
            .ok_or_else(|| TrackError::PointOutOfRange {
                id: id.to_string(),
                index,
                len,
            })?;
        point.latitude = latitude;
        point.longitude = longitude;

        route.geometry = None;
        route.points.iter_mut().for_each(TrackPoint::clear_anomaly);
        debug!("[RouteStore] Moved point {} of {}, geometry invalidated", index, id);
        Ok(())
    }

    /// Resolve geometry for a route's current points, then rescore it.
    ///
    /// The route stays locked for the whole refresh so concurrent edits or
    /// refreshes of the same route run one after another.
    pub async fn refresh_geometry<S: RoutingService>(
        &self,
        id: &str,
        resolver: &GeometryResolver<S>,
        mode: TravelMode,
        thresholds: &AnomalyThresholds,
        on_updated: Option<GeometryCallback>,
    ) -> Result<RouteGeometry> {
        thresholds.validate()?;
        let handle = self.handle(id)?;
        let mut route = handle.lock().await;

        let coords = route.coordinates();
        debug!(
            "[RouteStore] Refreshing {} ({} points, chunk size {})",
            id,
            coords.len(),
            resolver.config().chunk_size
        );
        let geometry = resolver.resolve(&coords, mode).await;
        route.geometry = Some(geometry.clone());
        let summary = rescore(&mut route, thresholds);

        info!(
            "[RouteStore] {}: {} legs, {} medium, {} high",
            id,
            geometry.legs.len(),
            summary.medium,
            summary.high
        );

        if let Some(callback) = on_updated {
            callback(id, &geometry);
        }
        Ok(geometry)
    }

    /// Rescore a route against its cached geometry.
    pub async fn recompute_anomalies(
        &self,
        id: &str,
        thresholds: &AnomalyThresholds,
    ) -> Result<AnomalySummary> {
        thresholds.validate()?;
        let handle = self.handle(id)?;
        let mut route = handle.lock().await;
        Ok(rescore(&mut route, thresholds))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Points of visible routes within `[start, end]`. Locked routes bypass
    /// the date filter and contribute all their points.
    pub async fn points_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<(String, Vec<TrackPoint>)> {
        let mut result = Vec::new();
        for (id, handle) in self.handles() {
            let route = handle.lock().await;
            if !route.is_visible {
                continue;
            }
            let points: Vec<TrackPoint> = if route.is_locked {
                route.points.clone()
            } else {
                route
                    .points
                    .iter()
                    .filter(|p| p.timestamp >= start && p.timestamp <= end)
                    .cloned()
                    .collect()
            };
            result.push((id, points));
        }
        result
    }

    /// Store statistics for monitoring.
    pub async fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for (_, handle) in self.handles() {
            let route = handle.lock().await;
            let summary = summarize(&route.points);
            stats.route_count += 1;
            stats.point_count += route.points.len();
            stats.medium_count += summary.medium;
            stats.high_count += summary.high;
            stats.total_distance_m += polyline_length(&route.coordinates());
            if route.geometry.is_some() {
                stats.routes_with_geometry += 1;
            }
        }
        stats
    }

    fn handle(&self, id: &str) -> Result<RouteHandle> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_route_not_found(id)
    }

    /// Handles sorted by id, cloned out so no map lock is held across awaits.
    fn handles(&self) -> Vec<(String, RouteHandle)> {
        let mut handles: Vec<(String, RouteHandle)> = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
            .collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0));
        handles
    }
}

impl Default for RouteStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Score with legs only from a geometry computed for the current points;
/// stale or missing geometry is the no-data state.
fn rescore(route: &mut Route, thresholds: &AnomalyThresholds) -> AnomalySummary {
    let Route { points, geometry, .. } = route;
    let legs = geometry
        .as_ref()
        .filter(|g| g.is_current_for(points.as_slice()))
        .map(|g| g.legs.as_slice())
        .unwrap_or(&[]);
    score_points(points, legs, thresholds);
    summarize(points)
}

/// Store statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub route_count: usize,
    pub point_count: usize,
    pub routes_with_geometry: usize,
    pub medium_count: usize,
    pub high_count: usize,
    /// Straight-line length of all routes in meters
    pub total_distance_m: f64,
}

// ============================================================================
// Global Singleton
// ============================================================================

/// Global store instance.
pub static STORE: Lazy<RouteStore> = Lazy::new(RouteStore::new);

/// Run `f` against the global store.
pub fn with_store<F, R>(f: F) -> R
where
    F: FnOnce(&RouteStore) -> R,
{
    f(&STORE)
}

// ============================================================================
// Tests
// ============================================================================
