use chrono::{DateTime, Utc};
use lib_alerts::models::{Category, DisasterEvent, SeverityLevel, SourceKind};
use serde::Serialize;

pub const GEOJSON_CONTENT_TYPE: &str = "application/geo+json";

#[derive(Debug, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub geometry: Geometry,
    pub properties: Properties,
}

#[derive(Debug, Serialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// `[longitude, latitude]`, GeoJSON axis order.
    pub coordinates: [f64; 2],
}

#[derive(Debug, Serialize)]
pub struct Properties {
    pub id: String,
    #[serde(rename = "type")]
    pub category: Category,
    pub title: String,
    pub description: String,
    pub magnitude: f64,
    pub alert_level: SeverityLevel,
    pub source: SourceKind,
    pub timestamp: DateTime<Utc>,
    pub country: String,
    pub affected_population: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_population_count: Option<i64>,
    pub report_url: String,
    pub delivered: bool,
}

impl From<DisasterEvent> for Feature {
    fn from(event: DisasterEvent) -> Self {
        Feature {
            kind: "Feature",
            geometry: Geometry { kind: "Point", coordinates: [event.longitude, event.latitude] },
            properties: Properties {
                id: event.id,
                category: event.category,
                title: event.title,
                description: event.description,
                magnitude: event.magnitude,
                alert_level: event.severity_level,
                source: event.source,
                timestamp: event.event_time,
                country: event.country,
                affected_population: event.affected_population_text,
                affected_population_count: event.affected_population_count,
                report_url: event.report_url,
                delivered: event.delivered,
            },
        }
    }
}

impl FromIterator<DisasterEvent> for FeatureCollection {
    fn from_iter<I: IntoIterator<Item = DisasterEvent>>(events: I) -> Self {
        FeatureCollection { kind: "FeatureCollection", features: events.into_iter().map(Feature::from).collect() }
    }
}
