//! # Event Filter
//!
//! One struct of optional, independently combinable predicates shared by the
//! query boundary, the storage backends and live streaming sessions.
//! Every predicate that is set must hold (logical AND); an empty filter
//! matches everything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::disaster::{Category, DisasterEvent, SeverityLevel};

/// Result cap applied when a query does not ask for one.
pub const DEFAULT_LIMIT: usize = 20;
/// Hard ceiling on a single query result.
pub const MAX_LIMIT: usize = 500;

/// Optional predicates over [`DisasterEvent`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Category equality.
    pub category: Option<Category>,
    /// `magnitude >= min_magnitude`.
    pub min_magnitude: Option<f64>,
    /// Severity equality.
    pub severity: Option<SeverityLevel>,
    /// `severity_level >= min_severity`.
    pub min_severity: Option<SeverityLevel>,
    /// `event_time >= since`.
    pub since: Option<DateTime<Utc>>,
    /// Acknowledgement state.
    pub delivered: Option<bool>,
    /// Result cap for queries; live sessions ignore it.
    pub limit: Option<usize>,
}

impl EventFilter {
    /// Filter that only checks the category.
    pub fn by_category(category: Category) -> Self {
        Self { category: Some(category), ..Default::default() }
    }

    /// Evaluates every set predicate against `event`.
    pub fn matches(&self, event: &DisasterEvent) -> bool {
        if let Some(category) = self.category {
            if event.category != category {
                return false;
            }
        }
        if let Some(min) = self.min_magnitude {
            if event.magnitude < min {
                return false;
            }
        }
        if let Some(level) = self.severity {
            if event.severity_level != level {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if event.severity_level < min {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.event_time < since {
                return false;
            }
        }
        if let Some(delivered) = self.delivered {
            if event.delivered != delivered {
                return false;
            }
        }
        true
    }

    /// The cap a query actually uses: 20 when unset or zero, at most 500.
    pub fn effective_limit(&self) -> usize {
        match self.limit {
            None | Some(0) => DEFAULT_LIMIT,
            Some(n) => n.min(MAX_LIMIT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::disaster::SourceKind;
    use chrono::TimeZone;

    fn quake(magnitude: f64, level: SeverityLevel) -> DisasterEvent {
        DisasterEvent {
            magnitude,
            severity_level: level,
            event_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            ..DisasterEvent::new(SourceKind::Usgs, "q1", Category::Earthquake)
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(EventFilter::default().matches(&quake(1.0, SeverityLevel::Unknown)));
    }

    #[test]
    fn category_predicate() {
        let event = quake(5.0, SeverityLevel::Green);
        assert!(EventFilter::by_category(Category::Earthquake).matches(&event));
        assert!(!EventFilter::by_category(Category::Flood).matches(&event));
    }

    #[test]
    fn magnitude_threshold_is_inclusive() {
        let filter = EventFilter { min_magnitude: Some(5.0), ..Default::default() };
        assert!(filter.matches(&quake(5.0, SeverityLevel::Green)));
        assert!(!filter.matches(&quake(4.9, SeverityLevel::Green)));
    }

    #[test]
    fn exact_and_minimum_severity() {
        let exact = EventFilter { severity: Some(SeverityLevel::Orange), ..Default::default() };
        assert!(exact.matches(&quake(1.0, SeverityLevel::Orange)));
        assert!(!exact.matches(&quake(1.0, SeverityLevel::Red)));

        let minimum = EventFilter { min_severity: Some(SeverityLevel::Orange), ..Default::default() };
        assert!(minimum.matches(&quake(1.0, SeverityLevel::Red)));
        assert!(!minimum.matches(&quake(1.0, SeverityLevel::Green)));
    }

    #[test]
    fn predicates_are_anded() {
        let filter = EventFilter {
            category: Some(Category::Earthquake),
            min_magnitude: Some(6.0),
            min_severity: Some(SeverityLevel::Orange),
            ..Default::default()
        };
        assert!(filter.matches(&quake(6.5, SeverityLevel::Red)));
        assert!(!filter.matches(&quake(6.5, SeverityLevel::Green)));
        assert!(!filter.matches(&quake(5.5, SeverityLevel::Red)));
    }

    #[test]
    fn since_and_delivered() {
        let event = quake(5.0, SeverityLevel::Green);
        let later = EventFilter {
            since: Some(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        assert!(!later.matches(&event));

        let pending = EventFilter { delivered: Some(false), ..Default::default() };
        assert!(pending.matches(&event));
        let acked = DisasterEvent { delivered: true, ..event };
        assert!(!pending.matches(&acked));
    }

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(EventFilter::default().effective_limit(), DEFAULT_LIMIT);
        assert_eq!(EventFilter { limit: Some(0), ..Default::default() }.effective_limit(), DEFAULT_LIMIT);
        assert_eq!(EventFilter { limit: Some(50), ..Default::default() }.effective_limit(), 50);
        assert_eq!(EventFilter { limit: Some(10_000), ..Default::default() }.effective_limit(), MAX_LIMIT);
    }
}
