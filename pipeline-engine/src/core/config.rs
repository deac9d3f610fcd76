use std::path::PathBuf;
use std::time::Duration;

use crate::position::DEFAULT_GAP;

/// Engine configuration
///
/// # Environment variables
///
/// Every field can be overridden from the environment:
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | PIPELINE_DATA_DIR | ./data | redb file and logs location |
/// | PIPELINE_POSITION_GAP | 10000 | spacing between freshly numbered positions |
/// | PIPELINE_RECONCILE_DELAY_MS | 600 | debounce before the reconciliation fetch |
/// | PIPELINE_MAX_CONFLICT_RETRIES | 2 | silent retries on a stale write |
/// | PIPELINE_AUDIT_BUFFER | 1024 | audit channel capacity |
/// | PIPELINE_NOTIFY_BUFFER | 256 | notification channel capacity |
/// | PIPELINE_LOG_LEVEL | info | logger level |
/// | PIPELINE_LOG_JSON | false | JSON console logs |
/// | ENVIRONMENT | development | runtime environment |
///
/// # Example
///
/// ```ignore
/// PIPELINE_DATA_DIR=/srv/pipeline PIPELINE_RECONCILE_DELAY_MS=1000 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Data directory (database file, logs)
    pub data_dir: String,
    /// Allocator gap
    pub position_gap: i64,
    /// Debounce before re-fetching a committed deal (milliseconds)
    pub reconcile_delay_ms: u64,
    /// Conflict retries before giving up
    pub max_conflict_retries: u32,
    /// Audit mpsc capacity
    pub audit_buffer: usize,
    /// Notification broadcast capacity
    pub notify_buffer: usize,
    pub log_level: String,
    pub log_json: bool,
    /// development | staging | production
    pub environment: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("PIPELINE_DATA_DIR").unwrap_or_else(|_| "./data".into()),
            position_gap: env_or("PIPELINE_POSITION_GAP", DEFAULT_GAP).max(2),
            reconcile_delay_ms: env_or("PIPELINE_RECONCILE_DELAY_MS", 600),
            max_conflict_retries: env_or("PIPELINE_MAX_CONFLICT_RETRIES", 2),
            audit_buffer: env_or("PIPELINE_AUDIT_BUFFER", 1024usize).max(1),
            notify_buffer: env_or("PIPELINE_NOTIFY_BUFFER", 256usize).max(1),
            log_level: std::env::var("PIPELINE_LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_json: env_or("PIPELINE_LOG_JSON", false),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
        }
    }

    /// Override the parts tests care about
    pub fn with_overrides(data_dir: impl Into<String>, reconcile_delay_ms: u64) -> Self {
        let mut config = Self::from_env();
        config.data_dir = data_dir.into();
        config.reconcile_delay_ms = reconcile_delay_ms;
        config
    }

    pub fn reconcile_delay(&self) -> Duration {
        Duration::from_millis(self.reconcile_delay_ms)
    }

    /// Path of the redb database file
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("pipeline.redb")
    }

    /// Directory for rotated log files
    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("logs")
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
