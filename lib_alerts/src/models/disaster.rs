//! # Disaster Event Record
//!
//! The canonical, source-independent shape every feed is normalized into.
//! One `DisasterEvent` flows from a Source Adapter through the dedup gate and
//! worker pool into storage, and from there into every live subscriber inbox.
//!
//! ## Identity
//! The `id` is `<source prefix>_<native id>` (e.g. `gdacs_12345`). It is
//! assigned once by the adapter and is the only deduplication key.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a textual enum value is not part of the closed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}

/// # Category
///
/// Closed set of disaster kinds. Serialized lowercase on every wire format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Seismic event.
    Earthquake,
    /// River or coastal flooding.
    Flood,
    /// Tropical cyclone, hurricane or typhoon.
    Cyclone,
    /// Tsunami wave.
    Tsunami,
    /// Volcanic eruption.
    Volcano,
    /// Forest or bush fire.
    Wildfire,
    /// Prolonged drought.
    Drought,
    /// Anything a feed reports that does not map to the set above.
    #[default]
    Unknown,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Category; 8] = [
        Category::Earthquake,
        Category::Flood,
        Category::Cyclone,
        Category::Tsunami,
        Category::Volcano,
        Category::Wildfire,
        Category::Drought,
        Category::Unknown,
    ];

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Earthquake => "earthquake",
            Category::Flood => "flood",
            Category::Cyclone => "cyclone",
            Category::Tsunami => "tsunami",
            Category::Volcano => "volcano",
            Category::Wildfire => "wildfire",
            Category::Drought => "drought",
            Category::Unknown => "unknown",
        }
    }

    /// Maps a GDACS `eventtype` code (EQ, TC, FL, ...) to a category.
    pub fn from_gdacs_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "EQ" => Category::Earthquake,
            "TC" => Category::Cyclone,
            "FL" => Category::Flood,
            "VO" => Category::Volcano,
            "TS" => Category::Tsunami,
            "WF" => Category::Wildfire,
            "DR" => Category::Drought,
            _ => Category::Unknown,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| ParseEnumError::new("category", s))
    }
}

/// # Severity Level
///
/// Totally ordered impact classification: `Unknown < Green < Orange < Red`.
/// The derive order is the ordering, so both exact-match and
/// minimum-threshold filters compare variants directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    /// The feed did not report a level.
    #[default]
    Unknown = 0,
    /// Low expected impact.
    Green = 1,
    /// Moderate expected impact.
    Orange = 2,
    /// High expected impact.
    Red = 3,
}

impl SeverityLevel {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityLevel::Unknown => "unknown",
            SeverityLevel::Green => "green",
            SeverityLevel::Orange => "orange",
            SeverityLevel::Red => "red",
        }
    }

    /// Numeric rank, stored by the Postgres backend so `>=` works in SQL.
    pub fn rank(&self) -> i16 {
        *self as i16
    }

    /// Inverse of [`SeverityLevel::rank`]; out-of-range ranks become `Unknown`.
    pub fn from_rank(rank: i16) -> Self {
        match rank {
            1 => SeverityLevel::Green,
            2 => SeverityLevel::Orange,
            3 => SeverityLevel::Red,
            _ => SeverityLevel::Unknown,
        }
    }

    /// Lenient mapping used by the adapters. USGS PAGER "yellow" counts as green.
    pub fn from_feed_text(text: &str) -> Self {
        match text.trim().to_ascii_lowercase().as_str() {
            "green" | "yellow" => SeverityLevel::Green,
            "orange" => SeverityLevel::Orange,
            "red" => SeverityLevel::Red,
            _ => SeverityLevel::Unknown,
        }
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeverityLevel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(SeverityLevel::Unknown),
            "green" => Ok(SeverityLevel::Green),
            "orange" => Ok(SeverityLevel::Orange),
            "red" => Ok(SeverityLevel::Red),
            _ => Err(ParseEnumError::new("severity level", s)),
        }
    }
}

/// Origin feed of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// USGS earthquake GeoJSON summary feed.
    Usgs,
    /// GDACS global alert RSS feed.
    Gdacs,
    /// Records injected by an operator (debug endpoint, tests).
    #[default]
    Manual,
}

impl SourceKind {
    /// Prefix used to build composite ids.
    pub fn prefix(&self) -> &'static str {
        match self {
            SourceKind::Usgs => "usgs",
            SourceKind::Gdacs => "gdacs",
            SourceKind::Manual => "manual",
        }
    }

    /// Builds the globally unique id for a feed-native identifier.
    pub fn composite_id(&self, native_id: &str) -> String {
        format!("{}_{}", self.prefix(), native_id)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for SourceKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "usgs" => Ok(SourceKind::Usgs),
            "gdacs" => Ok(SourceKind::Gdacs),
            "manual" => Ok(SourceKind::Manual),
            _ => Err(ParseEnumError::new("source", s)),
        }
    }
}

/// # Disaster Event
///
/// A single normalized disaster notification.
///
/// `delivered` starts `false` and is flipped exactly once by the
/// acknowledgement ledger; nothing in the pipeline ever resets it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisasterEvent {
    /// Source-prefixed primary key, e.g. `usgs_us7000abcd`.
    pub id: String,
    /// Feed the record came from.
    pub source: SourceKind,
    /// Normalized disaster kind.
    pub category: Category,
    /// Headline as published by the feed.
    pub title: String,
    /// Free text description.
    pub description: String,
    /// Richter magnitude for earthquakes, feed-defined severity otherwise.
    pub magnitude: f64,
    /// Ordered impact level.
    pub severity_level: SeverityLevel,
    /// WGS84 latitude.
    pub latitude: f64,
    /// WGS84 longitude.
    pub longitude: f64,
    /// When the physical event happened, as reported upstream.
    pub event_time: DateTime<Utc>,
    /// Affected country, empty when unknown.
    pub country: String,
    /// Human readable affected population.
    pub affected_population_text: String,
    /// Normalized affected population, when the feed gives one.
    pub affected_population_count: Option<i64>,
    /// Link to the upstream report.
    pub report_url: String,
    /// When the pipeline admitted the record.
    pub ingested_at: DateTime<Utc>,
    /// Whether a downstream sink has acknowledged the record.
    pub delivered: bool,
}

impl DisasterEvent {
    /// Starts a record with the identity fields set and everything else defaulted.
    pub fn new(source: SourceKind, native_id: &str, category: Category) -> Self {
        Self {
            id: source.composite_id(native_id),
            source,
            category,
            ingested_at: Utc::now(),
            ..Default::default()
        }
    }
}
