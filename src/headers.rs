//! Header resolution.
//!
//! Maps whatever column names a tracking device exported onto the three
//! semantic fields the normalizer needs. Matching is case-insensitive and
//! ignores surrounding whitespace; the first header in sheet order that
//! matches a field's alias list wins.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};

/// A semantic column the normalizer requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackField {
    Latitude,
    Longitude,
    Timestamp,
}

impl TrackField {
    pub const ALL: [TrackField; 3] = [
        TrackField::Latitude,
        TrackField::Longitude,
        TrackField::Timestamp,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TrackField::Latitude => "latitude",
            TrackField::Longitude => "longitude",
            TrackField::Timestamp => "timestamp",
        }
    }
}

const LATITUDE_ALIASES: &[&str] = &[
    "lat",
    "latitude",
    "latitude (deg)",
    "latitude, deg",
    "gps latitude",
    "vehicle latitude",
    "y",
    "широта",
    "широта, град",
    "широта (град)",
];

const LONGITUDE_ALIASES: &[&str] = &[
    "lon",
    "lng",
    "long",
    "longitude",
    "longitude (deg)",
    "longitude, deg",
    "gps longitude",
    "vehicle longitude",
    "x",
    "довгота",
    "долгота",
    "довгота, град",
    "долгота, град",
    "довгота (град)",
    "долгота (град)",
];

const TIMESTAMP_ALIASES: &[&str] = &[
    "time",
    "timestamp",
    "date",
    "datetime",
    "date time",
    "date/time",
    "date and time",
    "gps time",
    "fix time",
    "vehicle time",
    "utc",
    "час",
    "дата",
    "дата/час",
    "дата і час",
    "дата та час",
    "время",
    "дата/время",
    "дата и время",
    "час фіксації",
];

/// Alias lists per semantic field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderAliases {
    pub latitude: Vec<String>,
    pub longitude: Vec<String>,
    pub timestamp: Vec<String>,
}

impl Default for HeaderAliases {
    fn default() -> Self {
        let owned = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            latitude: owned(LATITUDE_ALIASES),
            longitude: owned(LONGITUDE_ALIASES),
            timestamp: owned(TIMESTAMP_ALIASES),
        }
    }
}

impl HeaderAliases {
    /// Add an alias for a field (e.g. a device-specific export name).
    pub fn with_extra(mut self, field: TrackField, alias: &str) -> Self {
        self.for_field_mut(field).push(alias.trim().to_lowercase());
        self
    }

    pub fn for_field(&self, field: TrackField) -> &[String] {
        match field {
            TrackField::Latitude => &self.latitude,
            TrackField::Longitude => &self.longitude,
            TrackField::Timestamp => &self.timestamp,
        }
    }

    fn for_field_mut(&mut self, field: TrackField) -> &mut Vec<String> {
        match field {
            TrackField::Latitude => &mut self.latitude,
            TrackField::Longitude => &mut self.longitude,
            TrackField::Timestamp => &mut self.timestamp,
        }
    }
}

/// Header names chosen for each semantic field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedColumns {
    pub latitude: String,
    pub longitude: String,
    pub timestamp: String,
}

/// Find the first header matching any alias of `field`.
pub fn find_column<'a>(
    headers: &'a [String],
    field: TrackField,
    aliases: &HeaderAliases,
) -> Option<&'a String> {
    let candidates = aliases.for_field(field);
    headers.iter().find(|header| {
        let normalized = header.trim().to_lowercase();
        candidates.iter().any(|alias| alias.to_lowercase() == normalized)
    })
}

/// Resolve all three required columns or fail naming the missing ones.
pub fn resolve_columns(headers: &[String], aliases: &HeaderAliases) -> Result<ResolvedColumns> {
    if headers.is_empty() {
        return Err(TrackError::NoHeaders);
    }

    let [lat, lon, time] =
        TrackField::ALL.map(|field| find_column(headers, field, aliases).cloned());

    match (lat, lon, time) {
        (Some(latitude), Some(longitude), Some(timestamp)) => Ok(ResolvedColumns {
            latitude,
            longitude,
            timestamp,
        }),
        (lat, lon, time) => {
            let missing = [
                (TrackField::Latitude, lat.is_none()),
                (TrackField::Longitude, lon.is_none()),
                (TrackField::Timestamp, time.is_none()),
            ]
            .into_iter()
            .filter(|(_, is_missing)| *is_missing)
            .map(|(field, _)| field.name())
            .collect();

            Err(TrackError::MissingColumns {
                missing,
                headers: headers.to_vec(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_english_headers() {
        let h = headers(&["ID", "Latitude", "Longitude", "Timestamp", "Speed"]);
        let cols = resolve_columns(&h, &HeaderAliases::default()).unwrap();
        assert_eq!(cols.latitude, "Latitude");
        assert_eq!(cols.longitude, "Longitude");
        assert_eq!(cols.timestamp, "Timestamp");
    }

    #[test]
    fn test_resolve_is_case_and_whitespace_insensitive() {
        let h = headers(&["  LAT ", "Lng", "Vehicle Latitude", "DATE/TIME"]);
        let cols = resolve_columns(&h, &HeaderAliases::default()).unwrap();
        // First match in sheet order wins
        assert_eq!(cols.latitude, "  LAT ");
        assert_eq!(cols.longitude, "Lng");
        assert_eq!(cols.timestamp, "DATE/TIME");
    }

    #[test]
    fn test_resolve_cyrillic_headers() {
        let h = headers(&["Широта", "Довгота", "Дата і час", "Швидкість"]);
        let cols = resolve_columns(&h, &HeaderAliases::default()).unwrap();
        assert_eq!(cols.latitude, "Широта");
        assert_eq!(cols.longitude, "Довгота");
        assert_eq!(cols.timestamp, "Дата і час");
    }

    #[test]
    fn test_find_column_none_when_absent() {
        let h = headers(&["Speed", "Heading"]);
        assert!(find_column(&h, TrackField::Latitude, &HeaderAliases::default()).is_none());
    }

    #[test]
    fn test_missing_columns_error_lists_fields() {
        let h = headers(&["Latitude", "Speed"]);
        let err = resolve_columns(&h, &HeaderAliases::default()).unwrap_err();
        match err {
            TrackError::MissingColumns { missing, headers } => {
                assert_eq!(missing, vec!["longitude", "timestamp"]);
                assert_eq!(headers.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_headers() {
        assert!(matches!(
            resolve_columns(&[], &HeaderAliases::default()),
            Err(TrackError::NoHeaders)
        ));
    }

    #[test]
    fn test_extra_alias() {
        let aliases = HeaderAliases::default().with_extra(TrackField::Timestamp, "Zeit");
        let h = headers(&["lat", "lon", "ZEIT"]);
        let cols = resolve_columns(&h, &aliases).unwrap();
        assert_eq!(cols.timestamp, "ZEIT");
    }
}
