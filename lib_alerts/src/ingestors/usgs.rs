//! # USGS Earthquake Feed
//!
//! Polls a USGS GeoJSON summary feed (e.g. `all_hour.geojson`) and normalizes
//! each feature into an earthquake [`DisasterEvent`].
//!
//! Coordinates arrive as `[lon, lat, depth]`; `time` is epoch milliseconds.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;
use url::Url;

use super::IngestError;
use crate::models::{Category, DisasterEvent, SeverityLevel, SourceKind};
use crate::retrieve::ApiClient;

#[derive(Debug, Deserialize)]
struct UsgsResponse {
    #[serde(default)]
    features: Vec<UsgsFeature>,
}

#[derive(Debug, Deserialize)]
struct UsgsFeature {
    #[serde(default)]
    id: String,
    #[serde(default)]
    properties: UsgsProperties,
    #[serde(default)]
    geometry: Option<UsgsGeometry>,
}

#[derive(Debug, Default, Deserialize)]
struct UsgsProperties {
    mag: Option<f64>,
    place: Option<String>,
    time: Option<i64>,
    title: Option<String>,
    url: Option<String>,
    alert: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsgsGeometry {
    #[serde(default)]
    coordinates: Vec<f64>,
}

/// USGS adapter: one URL, shared client.
pub struct UsgsAdapter {
    client: ApiClient,
    url: Url,
}

impl UsgsAdapter {
    /// Creates an adapter polling `url`.
    pub fn new(client: ApiClient, url: Url) -> Self {
        Self { client, url }
    }

    /// Fetches and normalizes the feed.
    pub async fn fetch(&self) -> Result<Vec<DisasterEvent>, IngestError> {
        let response = self.client.get_text(&self.url).await?;
        parse_usgs_feed(&response.body, Utc::now())
    }
}

/// Normalizes a USGS GeoJSON document. `ingested_at` stamps every record.
///
/// Features with no id, fewer than two coordinates or an unusable time are
/// skipped with a warning.
pub fn parse_usgs_feed(body: &str, ingested_at: DateTime<Utc>) -> Result<Vec<DisasterEvent>, IngestError> {
    let document: UsgsResponse = serde_json::from_str(body)
        .map_err(|e| IngestError::Decode { feed: SourceKind::Usgs, reason: e.to_string() })?;

    let mut events = Vec::with_capacity(document.features.len());
    for feature in document.features {
        if feature.id.is_empty() {
            warn!(feed = "usgs", "skipping feature without id");
            continue;
        }

        let coordinates = feature.geometry.map(|g| g.coordinates).unwrap_or_default();
        if coordinates.len() < 2 {
            warn!(feed = "usgs", id = %feature.id, "skipping feature without coordinates");
            continue;
        }

        let Some(event_time) = feature.properties.time.and_then(DateTime::from_timestamp_millis) else {
            warn!(feed = "usgs", id = %feature.id, "skipping feature with missing or invalid time");
            continue;
        };

        let props = feature.properties;
        let place = props.place.unwrap_or_default();
        events.push(DisasterEvent {
            id: SourceKind::Usgs.composite_id(&feature.id),
            source: SourceKind::Usgs,
            category: Category::Earthquake,
            title: props.title.unwrap_or_default(),
            country: country_from_place(&place),
            description: place,
            magnitude: props.mag.unwrap_or(0.0),
            severity_level: props
                .alert
                .as_deref()
                .map(SeverityLevel::from_feed_text)
                .unwrap_or_default(),
            longitude: coordinates[0],
            latitude: coordinates[1],
            event_time,
            affected_population_text: String::new(),
            affected_population_count: None,
            report_url: props.url.unwrap_or_default(),
            ingested_at,
            delivered: false,
        });
    }

    Ok(events)
}

/// "10 km SSW of Hachijo-jima, Japan" -> "Japan".
fn country_from_place(place: &str) -> String {
    match place.rsplit_once(',') {
        Some((_, country)) => country.trim().to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "id": "us7000abcd",
                "properties": {
                    "mag": 6.1,
                    "place": "45 km SSW of Hachijo-jima, Japan",
                    "time": 1709294400000,
                    "title": "M 6.1 - 45 km SSW of Hachijo-jima, Japan",
                    "url": "https://earthquake.usgs.gov/earthquakes/eventpage/us7000abcd",
                    "alert": "yellow"
                },
                "geometry": { "type": "Point", "coordinates": [139.5, 32.7, 10.0] }
            },
            {
                "type": "Feature",
                "id": "nc0001",
                "properties": { "mag": null, "place": "Central California", "time": 1709294500000 },
                "geometry": { "type": "Point", "coordinates": [-120.1, 36.2, 4.0] }
            },
            {
                "type": "Feature",
                "id": "broken",
                "properties": { "mag": 2.0, "time": 1709294500000 },
                "geometry": null
            },
            {
                "type": "Feature",
                "id": "notime",
                "properties": { "mag": 2.0 },
                "geometry": { "type": "Point", "coordinates": [1.0, 2.0, 3.0] }
            }
        ]
    }"#;

    #[test]
    fn normalizes_features_and_skips_malformed_ones() {
        let now = Utc::now();
        let events = parse_usgs_feed(FEED, now).unwrap();
        assert_eq!(events.len(), 2);

        let first = &events[0];
        assert_eq!(first.id, "usgs_us7000abcd");
        assert_eq!(first.category, Category::Earthquake);
        assert_eq!(first.magnitude, 6.1);
        assert_eq!(first.latitude, 32.7);
        assert_eq!(first.longitude, 139.5);
        assert_eq!(first.country, "Japan");
        assert_eq!(first.severity_level, SeverityLevel::Green);
        assert_eq!(first.event_time.timestamp_millis(), 1709294400000);
        assert_eq!(first.ingested_at, now);

        let second = &events[1];
        assert_eq!(second.id, "usgs_nc0001");
        assert_eq!(second.magnitude, 0.0);
        assert_eq!(second.country, "");
        assert_eq!(second.severity_level, SeverityLevel::Unknown);
    }

    #[test]
    fn rejects_undecodable_document() {
        let err = parse_usgs_feed("<html>maintenance</html>", Utc::now()).unwrap_err();
        assert!(matches!(err, IngestError::Decode { feed: SourceKind::Usgs, .. }));
    }
}
