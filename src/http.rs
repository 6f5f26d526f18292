//! HTTP client for OSRM-compatible routing servers.
//!
//! Requests `GET {base}/route/v1/{profile}/{lon,lat;lon,lat;...}` with full
//! GeoJSON geometry and reads the first route's path and legs. Retries are
//! deliberately absent: one failure makes the geometry resolver fall back to
//! straight lines.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{Result, TrackError};
use crate::geometry::{RoutedChunk, RoutingService};
use crate::{GpsPoint, Leg};

/// Public OSRM demo server
pub const DEFAULT_OSRM_URL: &str = "https://router.project-osrm.org";

/// API response for the route endpoint
#[derive(Debug, Deserialize)]
struct RouteApiResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<ApiRoute>,
}

#[derive(Debug, Deserialize)]
struct ApiRoute {
    geometry: ApiGeometry,
    #[serde(default)]
    legs: Vec<ApiLeg>,
}

#[derive(Debug, Deserialize)]
struct ApiGeometry {
    /// GeoJSON order: [lon, lat]
    coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Deserialize)]
struct ApiLeg {
    duration: f64,
    #[serde(default)]
    distance: f64,
}

/// Routing client for an OSRM-compatible server.
pub struct OsrmClient {
    client: Client,
    base_url: String,
}

impl OsrmClient {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackError::Http {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn route_url(&self, waypoints: &[GpsPoint], profile: &str) -> String {
        let coords = waypoints
            .iter()
            .map(|p| format!("{:.6},{:.6}", p.longitude, p.latitude))
            .collect::<Vec<_>>()
            .join(";");
        format!(
            "{}/route/v1/{}/{}?overview=full&geometries=geojson&steps=false",
            self.base_url, profile, coords
        )
    }
}

#[async_trait]
impl RoutingService for OsrmClient {
    async fn route(&self, waypoints: &[GpsPoint], profile: &str) -> Result<RoutedChunk> {
        let url = self.route_url(waypoints, profile);
        debug!(
            "[OsrmClient] Routing {} waypoints with profile '{}'",
            waypoints.len(),
            profile
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TrackError::Http {
                message: format!("Request error: {}", e),
                status_code: e.status().map(|s| s.as_u16()),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TrackError::Http {
                message: format!("HTTP {}", status),
                status_code: Some(status.as_u16()),
            });
        }

        let data = resp
            .json::<RouteApiResponse>()
            .await
            .map_err(|e| TrackError::Http {
                message: format!("Parse error: {}", e),
                status_code: Some(status.as_u16()),
            })?;

        parse_route_response(data)
    }
}

fn parse_route_response(data: RouteApiResponse) -> Result<RoutedChunk> {
    if data.code != "Ok" {
        return Err(TrackError::Http {
            message: format!(
                "Routing service returned {}: {}",
                data.code,
                data.message.unwrap_or_default()
            ),
            status_code: None,
        });
    }

    let route = data.routes.into_iter().next().ok_or_else(|| TrackError::Http {
        message: "Routing service returned no routes".to_string(),
        status_code: None,
    })?;

    Ok(RoutedChunk {
        path: route
            .geometry
            .coordinates
            .into_iter()
            .map(|[lon, lat]| GpsPoint::new(lat, lon))
            .collect(),
        legs: route
            .legs
            .into_iter()
            .map(|leg| Leg::new(leg.duration, leg.distance))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_url_uses_lon_lat_order() {
        let client = OsrmClient::new("http://localhost:5000/", Duration::from_secs(5)).unwrap();
        let url = client.route_url(
            &[GpsPoint::new(50.45, 30.52), GpsPoint::new(50.46, 30.53)],
            "car",
        );
        assert_eq!(
            url,
            "http://localhost:5000/route/v1/car/30.520000,50.450000;30.530000,50.460000?overview=full&geometries=geojson&steps=false"
        );
    }

    #[test]
    fn test_parse_ok_response() {
        let json = r#"{
            "code": "Ok",
            "routes": [{
                "geometry": {"coordinates": [[30.52, 50.45], [30.525, 50.455], [30.53, 50.46]]},
                "legs": [{"duration": 95.3, "distance": 1320.0}]
            }]
        }"#;
        let data: RouteApiResponse = serde_json::from_str(json).unwrap();
        let routed = parse_route_response(data).unwrap();
        assert_eq!(routed.path.len(), 3);
        assert_eq!(routed.path[0], GpsPoint::new(50.45, 30.52));
        assert_eq!(routed.legs, vec![Leg::new(95.3, 1320.0)]);
    }

    #[test]
    fn test_parse_error_code() {
        let json = r#"{"code": "NoRoute", "message": "Impossible route between points"}"#;
        let data: RouteApiResponse = serde_json::from_str(json).unwrap();
        let err = parse_route_response(data).unwrap_err();
        assert!(err.to_string().contains("NoRoute"));
    }

    #[test]
    fn test_parse_empty_routes() {
        let json = r#"{"code": "Ok", "routes": []}"#;
        let data: RouteApiResponse = serde_json::from_str(json).unwrap();
        assert!(parse_route_response(data).is_err());
    }
}
