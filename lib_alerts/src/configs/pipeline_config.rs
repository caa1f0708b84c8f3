//! # Pipeline Configuration
//!
//! Serializable settings for the ingestion pipeline (camelCase JSON), their
//! defaults, and the startup validation whose failure is the only fatal error
//! in the pipeline.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::models::{SeverityLevel, SourceKind};

/// Upstream rate-limit floor for any enabled source.
pub const MIN_POLL_INTERVAL_SECS: u64 = 60;

/// Default USGS feed: every earthquake in the past hour.
pub const USGS_DEFAULT_URL: &str = "https://earthquake.usgs.gov/earthquakes/feed/v1.0/summary/all_hour.geojson";
/// Default GDACS feed.
pub const GDACS_DEFAULT_URL: &str = "https://www.gdacs.org/xml/rss.xml";

/// Rejected configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{kind} poll interval must be at least {min}s, got {secs}s", min = MIN_POLL_INTERVAL_SECS)]
    PollIntervalTooShort { kind: SourceKind, secs: u64 },

    #[error("{kind} url {url:?} is invalid: {reason}")]
    InvalidUrl { kind: SourceKind, url: String, reason: String },

    #[error("{kind} has no network feed and cannot be polled")]
    NotPollable { kind: SourceKind },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// One polled feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub kind: SourceKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub url: String,
    pub poll_interval_secs: u64,
}

fn enabled_by_default() -> bool {
    true
}

impl SourceConfig {
    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Parsed endpoint.
    pub fn parsed_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl {
            kind: self.kind,
            url: self.url.clone(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerConfig {
    pub count: usize,
    pub queue_depth: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { count: 2, queue_depth: 20 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay_ms: 1_000 }
    }
}

/// Which broadcast policy to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Magnitude bound for earthquakes, severity bound for the rest.
    #[default]
    Threshold,
    /// Publish every persisted record.
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyConfig {
    pub mode: PolicyMode,
    pub earthquake_min_magnitude: f64,
    pub min_severity: SeverityLevel,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self { mode: PolicyMode::Threshold, earthquake_min_magnitude: 5.0, min_severity: SeverityLevel::Orange }
    }
}

/// # Pipeline Config
///
/// Everything the pipeline needs to start. Missing JSON keys take the
/// defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub sources: Vec<SourceConfig>,
    pub workers: WorkerConfig,
    pub inbox_capacity: usize,
    pub retry: RetryConfig,
    pub policy: PolicyConfig,
    pub http_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                SourceConfig {
                    kind: SourceKind::Usgs,
                    enabled: true,
                    url: USGS_DEFAULT_URL.to_string(),
                    poll_interval_secs: 5 * 60,
                },
                SourceConfig {
                    kind: SourceKind::Gdacs,
                    enabled: true,
                    url: GDACS_DEFAULT_URL.to_string(),
                    poll_interval_secs: 10 * 60,
                },
            ],
            workers: WorkerConfig::default(),
            inbox_capacity: 100,
            retry: RetryConfig::default(),
            policy: PolicyConfig::default(),
            http_timeout_secs: 15,
            shutdown_timeout_secs: 10,
        }
    }
}

impl PipelineConfig {
    /// The entry for `kind`, if configured.
    pub fn source(&self, kind: SourceKind) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.kind == kind)
    }

    /// Mutable entry for `kind`, if configured.
    pub fn source_mut(&mut self, kind: SourceKind) -> Option<&mut SourceConfig> {
        self.sources.iter_mut().find(|s| s.kind == kind)
    }

    /// Enabled sources only.
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Checks every rule; returns the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.count == 0 {
            return Err(ConfigError::Zero("workers.count"));
        }
        if self.workers.queue_depth == 0 {
            return Err(ConfigError::Zero("workers.queueDepth"));
        }
        if self.inbox_capacity == 0 {
            return Err(ConfigError::Zero("inboxCapacity"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Zero("retry.maxAttempts"));
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Zero("httpTimeoutSecs"));
        }

        for source in self.enabled_sources() {
            if source.kind == SourceKind::Manual {
                return Err(ConfigError::NotPollable { kind: source.kind });
            }
            if source.poll_interval_secs < MIN_POLL_INTERVAL_SECS {
                return Err(ConfigError::PollIntervalTooShort { kind: source.kind, secs: source.poll_interval_secs });
            }
            source.parsed_url()?;
        }
        Ok(())
    }
}

impl fmt::Display for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PipelineConfig")?;
        for s in &self.sources {
            writeln!(f, "    {}: enabled={} every {}s <{}>", s.kind, s.enabled, s.poll_interval_secs, s.url)?;
        }
        writeln!(f, "    Workers: {} (queue {})", self.workers.count, self.workers.queue_depth)?;
        writeln!(f, "    Inbox capacity: {}", self.inbox_capacity)?;
        writeln!(f, "    Retry: {} attempts, base {}ms", self.retry.max_attempts, self.retry.base_delay_ms)?;
        write!(
            f,
            "    Policy: {:?} (earthquake >= {}, others >= {})",
            self.policy.mode, self.policy.earthquake_min_magnitude, self.policy.min_severity
        )
    }
}
