use anyhow::{bail, Context, Result};
use clap::Parser;
use lib_alerts::configs::PipelineConfig;
use lib_alerts::configs::PolicyMode;
use lib_alerts::models::{SeverityLevel, SourceKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "server_alerts.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Disaster feed ingestion and live alert server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "ALERTS_PORT", help = "Port to listen on for HTTP and WebSocket clients.")]
    pub port: Option<u16>,

    #[clap(long, env = "ALERTS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "ALERTS_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "ALERTS_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "DATABASE_URL", help = "PostgreSQL connection URL. In-memory storage when unset.")]
    pub database_url: Option<String>,

    #[clap(long, env = "ALERTS_DB_MAX_CONNECTIONS", help = "PostgreSQL pool size.")]
    pub db_max_connections: Option<usize>,

    #[clap(long, env = "ALERTS_RATE_LIMIT_PER_SEC", help = "REST API requests per second across all clients (0 disables).")]
    pub rate_limit_per_sec: Option<u32>,

    #[clap(long, env = "ALERTS_USGS_ENABLED", help = "Poll the USGS earthquake feed (true/false).")]
    pub usgs_enabled: Option<bool>,

    #[clap(long, env = "ALERTS_USGS_URL", help = "USGS GeoJSON summary feed URL.")]
    pub usgs_url: Option<String>,

    #[clap(long, env = "ALERTS_USGS_POLL_INTERVAL_SECS", help = "Seconds between USGS polls (minimum 60).")]
    pub usgs_poll_interval_secs: Option<u64>,

    #[clap(long, env = "ALERTS_GDACS_ENABLED", help = "Poll the GDACS RSS feed (true/false).")]
    pub gdacs_enabled: Option<bool>,

    #[clap(long, env = "ALERTS_GDACS_URL", help = "GDACS RSS feed URL.")]
    pub gdacs_url: Option<String>,

    #[clap(long, env = "ALERTS_GDACS_POLL_INTERVAL_SECS", help = "Seconds between GDACS polls (minimum 60).")]
    pub gdacs_poll_interval_secs: Option<u64>,

    #[clap(long, env = "ALERTS_WORKERS", help = "Number of processing workers.")]
    pub workers: Option<usize>,

    #[clap(long, env = "ALERTS_QUEUE_DEPTH", help = "Capacity of the work queue.")]
    pub queue_depth: Option<usize>,

    #[clap(long, env = "ALERTS_INBOX_CAPACITY", help = "Per-subscriber inbox capacity.")]
    pub inbox_capacity: Option<usize>,

    #[clap(long, env = "ALERTS_RETRY_MAX_ATTEMPTS", help = "Fetch attempts per poll cycle.")]
    pub retry_max_attempts: Option<u32>,

    #[clap(long, env = "ALERTS_RETRY_BASE_DELAY_MS", help = "First backoff delay in milliseconds.")]
    pub retry_base_delay_ms: Option<u64>,

    #[clap(long, env = "ALERTS_POLICY", help = "Broadcast policy (threshold, all).")]
    pub policy: Option<String>,

    #[clap(long, env = "ALERTS_EARTHQUAKE_MIN_MAGNITUDE", help = "Minimum magnitude for broadcasting earthquakes.")]
    pub earthquake_min_magnitude: Option<f64>,

    #[clap(long, env = "ALERTS_MIN_SEVERITY", help = "Minimum alert level for broadcasting other events (green, orange, red).")]
    pub min_severity: Option<String>,

    #[clap(long, env = "ALERTS_HTTP_TIMEOUT_SECS", help = "Per-request timeout for feed fetches.")]
    pub http_timeout_secs: Option<u64>,

    #[clap(long, env = "ALERTS_SHUTDOWN_TIMEOUT_SECS", help = "Bound on graceful shutdown.")]
    pub shutdown_timeout_secs: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            database_url: other.database_url.or(self.database_url),
            db_max_connections: other.db_max_connections.or(self.db_max_connections),
            rate_limit_per_sec: other.rate_limit_per_sec.or(self.rate_limit_per_sec),
            usgs_enabled: other.usgs_enabled.or(self.usgs_enabled),
            usgs_url: other.usgs_url.or(self.usgs_url),
            usgs_poll_interval_secs: other.usgs_poll_interval_secs.or(self.usgs_poll_interval_secs),
            gdacs_enabled: other.gdacs_enabled.or(self.gdacs_enabled),
            gdacs_url: other.gdacs_url.or(self.gdacs_url),
            gdacs_poll_interval_secs: other.gdacs_poll_interval_secs.or(self.gdacs_poll_interval_secs),
            workers: other.workers.or(self.workers),
            queue_depth: other.queue_depth.or(self.queue_depth),
            inbox_capacity: other.inbox_capacity.or(self.inbox_capacity),
            retry_max_attempts: other.retry_max_attempts.or(self.retry_max_attempts),
            retry_base_delay_ms: other.retry_base_delay_ms.or(self.retry_base_delay_ms),
            policy: other.policy.or(self.policy),
            earthquake_min_magnitude: other.earthquake_min_magnitude.or(self.earthquake_min_magnitude),
            min_severity: other.min_severity.or(self.min_severity),
            http_timeout_secs: other.http_timeout_secs.or(self.http_timeout_secs),
            shutdown_timeout_secs: other.shutdown_timeout_secs.or(self.shutdown_timeout_secs),
        }
    }

    /// Server-level defaults. Pipeline knobs left unset fall through to
    /// `PipelineConfig::default()`.
    fn defaults() -> Config {
        Config {
            port: Some(8080),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            db_max_connections: Some(8),
            rate_limit_per_sec: Some(5),
            ..Default::default()
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(8080)
    }

    pub fn log_dir(&self) -> &Path {
        self.log_dir.as_deref().unwrap_or(Path::new("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn rate_limit_per_sec(&self) -> u32 {
        self.rate_limit_per_sec.unwrap_or(5)
    }

    /// Builds and validates the pipeline settings described by this config.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut pipeline = PipelineConfig::default();

        for (kind, enabled, url, interval) in [
            (SourceKind::Usgs, self.usgs_enabled, &self.usgs_url, self.usgs_poll_interval_secs),
            (SourceKind::Gdacs, self.gdacs_enabled, &self.gdacs_url, self.gdacs_poll_interval_secs),
        ] {
            if let Some(source) = pipeline.source_mut(kind) {
                if let Some(enabled) = enabled {
                    source.enabled = enabled;
                }
                if let Some(url) = url {
                    source.url = url.clone();
                }
                if let Some(secs) = interval {
                    source.poll_interval_secs = secs;
                }
            }
        }

        if let Some(count) = self.workers {
            pipeline.workers.count = count;
        }
        if let Some(depth) = self.queue_depth {
            pipeline.workers.queue_depth = depth;
        }
        if let Some(capacity) = self.inbox_capacity {
            pipeline.inbox_capacity = capacity;
        }
        if let Some(attempts) = self.retry_max_attempts {
            pipeline.retry.max_attempts = attempts;
        }
        if let Some(ms) = self.retry_base_delay_ms {
            pipeline.retry.base_delay_ms = ms;
        }
        if let Some(policy) = &self.policy {
            pipeline.policy.mode = match policy.trim().to_ascii_lowercase().as_str() {
                "threshold" => PolicyMode::Threshold,
                "all" => PolicyMode::All,
                other => bail!("unknown broadcast policy {other:?}, expected threshold or all"),
            };
        }
        if let Some(magnitude) = self.earthquake_min_magnitude {
            pipeline.policy.earthquake_min_magnitude = magnitude;
        }
        if let Some(level) = &self.min_severity {
            pipeline.policy.min_severity =
                level.parse::<SeverityLevel>().with_context(|| format!("invalid minSeverity {level:?}"))?;
        }
        if let Some(secs) = self.http_timeout_secs {
            pipeline.http_timeout_secs = secs;
        }
        if let Some(secs) = self.shutdown_timeout_secs {
            pipeline.shutdown_timeout_secs = secs;
        }

        pipeline.validate()?;
        Ok(pipeline)
    }
}

/// defaults < JSON config file < environment / CLI.
pub fn load_config() -> Result<Config> {
    resolve(Config::parse())
}

fn resolve(cli: Config) -> Result<Config> {
    let config_file_path = cli.config_path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();

    // A missing file is fine, a malformed one is fatal.
    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)
            .with_context(|| format!("failed to read config file {}", config_file_path.display()))?;
        let file_config: Config = serde_json::from_str(&config_str)
            .with_context(|| format!("failed to parse config file {}", config_file_path.display()))?;
        current_config = current_config.merge(file_config);
    }

    Ok(current_config.merge(cli))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "port": 9100, "workers": 4, "gdacsEnabled": false, "rateLimitPerSec": 20 }}"#).unwrap();

        let cli = Config { config_path: Some(file.path().to_path_buf()), workers: Some(6), ..Default::default() };
        let config = resolve(cli).unwrap();

        assert_eq!(config.port(), 9100);
        assert_eq!(config.workers, Some(6));
        assert_eq!(config.log_level(), "info");
        assert_eq!(config.rate_limit_per_sec(), 20);

        let pipeline = config.pipeline_config().unwrap();
        assert_eq!(pipeline.workers.count, 6);
        assert!(!pipeline.source(SourceKind::Gdacs).unwrap().enabled);
        assert!(pipeline.source(SourceKind::Usgs).unwrap().enabled);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cli = Config { config_path: Some(PathBuf::from("/nonexistent/server_alerts.conf")), ..Default::default() };
        let config = resolve(cli).unwrap();
        assert_eq!(config.port(), 8080);
        assert_eq!(config.rate_limit_per_sec(), 5);
        assert_eq!(config.pipeline_config().unwrap(), PipelineConfig::default());
    }

    #[test]
    fn malformed_file_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let cli = Config { config_path: Some(file.path().to_path_buf()), ..Default::default() };
        assert!(resolve(cli).is_err());
    }

    #[test]
    fn invalid_pipeline_values_are_rejected() {
        let config = Config { usgs_poll_interval_secs: Some(10), ..Default::default() };
        assert!(config.pipeline_config().is_err());

        let config = Config { policy: Some("sometimes".into()), ..Default::default() };
        assert!(config.pipeline_config().is_err());

        let config = Config { policy: Some("ALL".into()), min_severity: Some("red".into()), ..Default::default() };
        let pipeline = config.pipeline_config().unwrap();
        assert_eq!(pipeline.policy.mode, PolicyMode::All);
        assert_eq!(pipeline.policy.min_severity, SeverityLevel::Red);
    }
}
