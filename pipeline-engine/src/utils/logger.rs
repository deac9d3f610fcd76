//! Logging Infrastructure
//!
//! Structured logging setup for development and production:
//! - Console output (pretty or JSON)
//! - Daily rotating application logs, cleaned up after the retention period
//! - Daily rotating audit logs (`target: "audit"`), never cleaned up

use std::fs;
use std::path::{Path, PathBuf};

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{EnvFilter, Layer, filter::filter_fn, fmt, prelude::*};

/// Application logs older than this are removed by the periodic cleanup
pub const DEFAULT_RETENTION_DAYS: i64 = 14;

const APP_PREFIX: &str = "app";
const AUDIT_PREFIX: &str = "audit";
const LOG_SUFFIX: &str = "log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// RUST_LOG wins over the configured level
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn fmt_layer<W>(json_format: bool, ansi: bool, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(ansi)
        .with_writer(writer);
    if json_format {
        layer
            .json()
            .with_current_span(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        layer.boxed()
    }
}

fn rolling(dir: &Path, prefix: &str) -> anyhow::Result<RollingFileAppender> {
    Ok(RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix(LOG_SUFFIX)
        .build(dir)?)
}

/// Initialize the logging system with daily rotating logs
///
/// # Arguments
/// * `level` - Log level (e.g., "info", "debug", "warn")
/// * `json_format` - JSON output (production) or pretty output (development)
/// * `log_dir` - Optional directory for file logging; `app/` and `audit/`
///   subdirectories are created inside it
///
/// # Examples
/// ```no_run
/// # fn main() -> anyhow::Result<()> {
/// // Development setup (console only)
/// pipeline_engine::init_logger_with_file("debug", false, None)?;
/// # Ok(())
/// # }
/// ```
pub fn init_logger_with_file(
    level: &str,
    json_format: bool,
    log_dir: Option<&str>,
) -> anyhow::Result<()> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    let console = fmt_layer(json_format, !json_format, std::io::stdout)
        .with_filter(env_filter(level))
        .boxed();
    layers.push(console);

    if let Some(dir) = log_dir {
        let log_dir = Path::new(dir);
        let app_log_dir = log_dir.join(APP_PREFIX);
        let audit_log_dir = log_dir.join(AUDIT_PREFIX);
        fs::create_dir_all(&app_log_dir)?;
        fs::create_dir_all(&audit_log_dir)?;

        // Everything except audit records
        let app_log = rolling(&app_log_dir, APP_PREFIX)?;
        let app_layer = fmt_layer(json_format, false, std::sync::Mutex::new(app_log))
            .with_filter(env_filter(level))
            .with_filter(filter_fn(|meta| meta.target() != "audit"))
            .boxed();
        layers.push(app_layer);

        // Audit records only
        let audit_log = rolling(&audit_log_dir, AUDIT_PREFIX)?;
        let audit_layer = fmt_layer(json_format, false, std::sync::Mutex::new(audit_log))
            .with_filter(filter_fn(|meta| meta.target() == "audit"))
            .boxed();
        layers.push(audit_layer);

        if tokio::runtime::Handle::try_current().is_ok() {
            tokio::spawn(periodic_cleanup(log_dir.to_path_buf()));
        }
    }

    tracing_subscriber::registry().with(layers).try_init()?;
    Ok(())
}

/// Initialize the logging system (console only)
pub fn init_logger(level: &str, json_format: bool) -> anyhow::Result<()> {
    init_logger_with_file(level, json_format, None)
}

/// Remove rotated application logs older than `retention_days`
///
/// Only `app/app.YYYY-MM-DD.log` files are considered; audit logs are kept.
/// Returns the number of deleted files.
pub fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> anyhow::Result<usize> {
    let cutoff = chrono::Local::now().date_naive() - chrono::Duration::days(retention_days);

    let app_log_dir = log_dir.join(APP_PREFIX);
    if !app_log_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(app_log_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(date_part) = name
            .strip_prefix("app.")
            .and_then(|d| d.strip_suffix(".log"))
        else {
            continue;
        };
        if let Ok(date) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            && date < cutoff
        {
            fs::remove_file(&path)?;
            tracing::info!(file = %name, "Deleted old log file");
            removed += 1;
        }
    }

    Ok(removed)
}

/// Runs every hour
async fn periodic_cleanup(log_dir: PathBuf) {
    use tokio::time::{Duration, sleep};

    loop {
        sleep(Duration::from_secs(3600)).await;

        if let Err(e) = cleanup_old_logs(&log_dir, DEFAULT_RETENTION_DAYS) {
            tracing::error!(error = %e, "Failed to cleanup old logs");
        }
    }
}
