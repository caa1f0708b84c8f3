//! Broadcast-worthiness policies.
//!
//! Decides whether a freshly persisted record is pushed to live subscribers.
//! Every record is persisted either way; the policy only gates the fan-out.

use crate::models::{Category, DisasterEvent, SeverityLevel};

/// Rule applied after a successful insert.
pub trait BroadcastPolicy: Send + Sync {
    /// Whether `event` goes to live subscribers.
    fn should_broadcast(&self, event: &DisasterEvent) -> bool;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Earthquakes qualify on magnitude, everything else on severity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPolicy {
    /// Inclusive magnitude bound for earthquakes.
    pub earthquake_min_magnitude: f64,
    /// Inclusive severity bound for every other category.
    pub min_severity: SeverityLevel,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self { earthquake_min_magnitude: 5.0, min_severity: SeverityLevel::Orange }
    }
}

impl BroadcastPolicy for ThresholdPolicy {
    fn should_broadcast(&self, event: &DisasterEvent) -> bool {
        match event.category {
            Category::Earthquake => event.magnitude >= self.earthquake_min_magnitude,
            _ => event.severity_level >= self.min_severity,
        }
    }

    fn name(&self) -> &'static str {
        "threshold"
    }
}

/// Pushes every persisted record.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastAll;

impl BroadcastPolicy for BroadcastAll {
    fn should_broadcast(&self, _event: &DisasterEvent) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "all"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    fn event(category: Category, magnitude: f64, level: SeverityLevel) -> DisasterEvent {
        DisasterEvent { magnitude, severity_level: level, ..DisasterEvent::new(SourceKind::Gdacs, "1", category) }
    }

    #[test]
    fn earthquakes_use_magnitude_only() {
        let policy = ThresholdPolicy::default();
        assert!(policy.should_broadcast(&event(Category::Earthquake, 5.0, SeverityLevel::Green)));
        assert!(!policy.should_broadcast(&event(Category::Earthquake, 4.9, SeverityLevel::Red)));
    }

    #[test]
    fn other_categories_use_severity() {
        let policy = ThresholdPolicy::default();
        assert!(policy.should_broadcast(&event(Category::Flood, 0.0, SeverityLevel::Orange)));
        assert!(policy.should_broadcast(&event(Category::Cyclone, 0.0, SeverityLevel::Red)));
        assert!(!policy.should_broadcast(&event(Category::Flood, 9.0, SeverityLevel::Green)));
    }

    #[test]
    fn thresholds_are_overridable() {
        let strict = ThresholdPolicy { earthquake_min_magnitude: 7.0, min_severity: SeverityLevel::Red };
        assert!(!strict.should_broadcast(&event(Category::Earthquake, 6.5, SeverityLevel::Unknown)));
        assert!(!strict.should_broadcast(&event(Category::Flood, 0.0, SeverityLevel::Orange)));
        assert!(BroadcastAll.should_broadcast(&event(Category::Unknown, 0.0, SeverityLevel::Unknown)));
    }
}
