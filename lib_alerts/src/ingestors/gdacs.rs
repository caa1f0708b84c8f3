//! # GDACS Alert Feed
//!
//! Reads the GDACS RSS document with the `quick-xml` event reader. Elements
//! are matched by local name so the `gdacs:`/`georss:` prefixes do not matter,
//! and only direct children of `<item>` are read (nested resource blocks carry
//! their own `title`/`link` elements that must not leak into the record).

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tracing::warn;
use url::Url;

use super::IngestError;
use crate::models::{Category, DisasterEvent, SeverityLevel, SourceKind};
use crate::retrieve::ApiClient;

/// GDACS adapter: one URL, shared client.
pub struct GdacsAdapter {
    client: ApiClient,
    url: Url,
}

impl GdacsAdapter {
    /// Creates an adapter polling `url`.
    pub fn new(client: ApiClient, url: Url) -> Self {
        Self { client, url }
    }

    /// Fetches and normalizes the feed.
    pub async fn fetch(&self) -> Result<Vec<DisasterEvent>, IngestError> {
        let response = self.client.get_text(&self.url).await?;
        parse_gdacs_feed(&response.body, Utc::now())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Description,
    Link,
    PubDate,
    Point,
    EventType,
    AlertLevel,
    EventId,
    Severity,
    Country,
    Population,
}

impl Field {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Field::Title),
            b"description" => Some(Field::Description),
            b"link" => Some(Field::Link),
            b"pubDate" => Some(Field::PubDate),
            b"point" => Some(Field::Point),
            b"eventtype" => Some(Field::EventType),
            b"alertlevel" => Some(Field::AlertLevel),
            b"eventid" => Some(Field::EventId),
            b"severity" => Some(Field::Severity),
            b"country" => Some(Field::Country),
            b"population" => Some(Field::Population),
            _ => None,
        }
    }
}

/// Text collected from one `<item>` before normalization.
#[derive(Debug, Default)]
struct RawItem {
    title: String,
    description: String,
    link: String,
    pub_date: String,
    point: String,
    event_type: String,
    alert_level: String,
    event_id: String,
    severity_text: String,
    severity_value: Option<f64>,
    country: String,
    population_text: String,
    population_value: Option<i64>,
}

impl RawItem {
    fn push_text(&mut self, field: Field, text: &str) {
        let target = match field {
            Field::Title => &mut self.title,
            Field::Description => &mut self.description,
            Field::Link => &mut self.link,
            Field::PubDate => &mut self.pub_date,
            Field::Point => &mut self.point,
            Field::EventType => &mut self.event_type,
            Field::AlertLevel => &mut self.alert_level,
            Field::EventId => &mut self.event_id,
            Field::Severity => &mut self.severity_text,
            Field::Country => &mut self.country,
            Field::Population => &mut self.population_text,
        };
        target.push_str(text);
    }

    /// `severity` and `population` carry their numeric form in a `value` attribute.
    fn capture_attributes(&mut self, element: &BytesStart<'_>) {
        let Some(field) = Field::from_local_name(element.local_name().as_ref()) else {
            return;
        };
        if !matches!(field, Field::Severity | Field::Population) {
            return;
        }
        let value = element
            .try_get_attribute("value")
            .ok()
            .flatten()
            .and_then(|attr| attr.unescape_value().ok())
            .and_then(|v| v.trim().parse::<f64>().ok());

        match field {
            Field::Severity => self.severity_value = value,
            Field::Population => self.population_value = value.map(|v| v.round() as i64),
            _ => {}
        }
    }

    fn into_event(self, ingested_at: DateTime<Utc>) -> Option<DisasterEvent> {
        let event_id = self.event_id.trim();
        if event_id.is_empty() {
            warn!(feed = "gdacs", title = %self.title, "skipping item without eventid");
            return None;
        }

        let event_time = match DateTime::parse_from_rfc2822(self.pub_date.trim()) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                warn!(feed = "gdacs", id = event_id, pub_date = %self.pub_date, error = %e, "skipping item with unparseable pubDate");
                return None;
            }
        };

        let (latitude, longitude) = parse_point(&self.point);
        let magnitude = first_number(&self.severity_text)
            .or(self.severity_value)
            .unwrap_or(0.0);

        Some(DisasterEvent {
            id: SourceKind::Gdacs.composite_id(event_id),
            source: SourceKind::Gdacs,
            category: Category::from_gdacs_code(&self.event_type),
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            magnitude,
            severity_level: SeverityLevel::from_feed_text(&self.alert_level),
            latitude,
            longitude,
            event_time,
            country: self.country.trim().to_string(),
            affected_population_text: self.population_text.trim().to_string(),
            affected_population_count: self.population_value,
            report_url: self.link.trim().to_string(),
            ingested_at,
            delivered: false,
        })
    }
}

/// `"lat lon"`; anything unparseable becomes 0.
fn parse_point(point: &str) -> (f64, f64) {
    let mut parts = point.split_whitespace();
    let lat = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0.0);
    let lon = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0.0);
    (lat, lon)
}

/// First number in texts like `"Magnitude 5.6M, Depth:56.4km"`.
fn first_number(text: &str) -> Option<f64> {
    text.trim()
        .trim_start_matches("Magnitude ")
        .split_whitespace()
        .find_map(|part| part.trim_end_matches(['M', ',']).parse::<f64>().ok())
}

fn decode_error(reason: impl std::fmt::Display) -> IngestError {
    IngestError::Decode { feed: SourceKind::Gdacs, reason: reason.to_string() }
}

/// Normalizes a GDACS RSS document. `ingested_at` stamps every record.
///
/// Items without an `eventid` or with an unparseable `pubDate` are skipped
/// with a warning. A document that is not XML, or has no `<channel>`, is a
/// decode error.
pub fn parse_gdacs_feed(body: &str, ingested_at: DateTime<Utc>) -> Result<Vec<DisasterEvent>, IngestError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut events = Vec::new();
    let mut saw_channel = false;
    let mut current: Option<RawItem> = None;
    // Open elements below the current <item>.
    let mut depth = 0usize;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                if current.is_none() {
                    match element.local_name().as_ref() {
                        b"channel" => saw_channel = true,
                        b"item" => {
                            current = Some(RawItem::default());
                            depth = 0;
                            field = None;
                        }
                        _ => {}
                    }
                } else if let Some(item) = current.as_mut() {
                    depth += 1;
                    if depth == 1 {
                        field = Field::from_local_name(element.local_name().as_ref());
                        item.capture_attributes(&element);
                    }
                }
            }
            Ok(Event::Empty(element)) => {
                if let Some(item) = current.as_mut() {
                    if depth == 0 {
                        item.capture_attributes(&element);
                    }
                }
            }
            Ok(Event::Text(text)) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    if depth == 1 {
                        let text = text.unescape().map_err(decode_error)?;
                        item.push_text(f, &text);
                    }
                }
            }
            Ok(Event::CData(data)) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    if depth == 1 {
                        item.push_text(f, &String::from_utf8_lossy(&data.into_inner()));
                    }
                }
            }
            Ok(Event::End(_)) => {
                if current.is_some() {
                    if depth == 0 {
                        if let Some(event) = current.take().and_then(|item| item.into_event(ingested_at)) {
                            events.push(event);
                        }
                    } else {
                        depth -= 1;
                        if depth == 0 {
                            field = None;
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(decode_error(e)),
        }
    }

    if !saw_channel {
        return Err(decode_error("document has no <channel> element"));
    }
    Ok(events)
}
