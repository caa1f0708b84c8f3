use chrono::{NaiveDate, NaiveTime};
use lib_alerts::models::{Category, EventFilter, SeverityLevel};
use serde::Deserialize;

/// Raw `?type=&min_magnitude=...` parameters shared by `/api/disasters` and
/// `/ws`. Every field is kept as text so that a malformed value drops that
/// predicate instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct DisasterQuery {
    #[serde(rename = "type")]
    pub category: Option<String>,
    pub min_magnitude: Option<String>,
    pub alert_level: Option<String>,
    pub min_alert_level: Option<String>,
    /// `YYYY-MM-DD`, midnight UTC.
    pub since: Option<String>,
    pub limit: Option<String>,
    pub delivered: Option<String>,
}

impl DisasterQuery {
    pub fn into_filter(self) -> EventFilter {
        EventFilter {
            category: self
                .category
                .and_then(|t| t.parse::<Category>().ok())
                .filter(|c| *c != Category::Unknown),
            min_magnitude: self.min_magnitude.and_then(|m| m.trim().parse::<f64>().ok()).filter(|m| m.is_finite()),
            severity: self.alert_level.and_then(known_level),
            min_severity: self.min_alert_level.and_then(known_level),
            since: self.since.and_then(|s| {
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok().map(|d| d.and_time(NaiveTime::MIN).and_utc())
            }),
            delivered: self.delivered.and_then(|d| d.trim().parse::<bool>().ok()),
            limit: self.limit.and_then(|l| l.trim().parse::<usize>().ok()),
        }
    }
}

fn known_level(raw: String) -> Option<SeverityLevel> {
    raw.parse::<SeverityLevel>().ok().filter(|l| *l != SeverityLevel::Unknown)
}
