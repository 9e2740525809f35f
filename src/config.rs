//! Configuration loading and validation.
//!
//! Mirrors the fields the scheduling engine's collaborators are documented
//! to consume (`with_seconds`, `work_dir`, `goroutines_size`,
//! `max_task_num`, `timezone`), plus the deployment-level settings the
//! bundled binary needs to wire up persistence (`database_path`,
//! `redis_url`).

use crate::error::{ConfigError, Result};
use std::path::PathBuf;
use std::str::FromStr as _;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Whether cron expressions require a leading seconds field.
    pub with_seconds: bool,

    /// Base directory under which per-owner job working directories are
    /// created. Required if any registered job uses `workDir`.
    pub work_dir: PathBuf,

    /// Worker pool size: maximum concurrently-executing jobs.
    pub goroutines_size: usize,

    /// Soft upper bound on concurrently registered tasks. Not enforced by
    /// the scheduler itself; listed for completeness and surfaced to
    /// callers that want to pre-check before calling `add_task`.
    pub max_task_num: Option<usize>,

    /// IANA timezone name used for cron evaluation.
    pub timezone: chrono_tz::Tz,

    /// Path to the SQLite database file backing the task/task-log repos.
    pub database_path: PathBuf,

    /// `redis://` URL for the distributed variant's coordination store.
    /// `None` means the binary runs the local (in-process) variant.
    pub redis_url: Option<String>,
}

impl SchedulerSettings {
    /// Load configuration from environment variables (`SCHEDULER__*`
    /// prefixed) layered over defaults, then validate.
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .set_default("with_seconds", false)?
            .set_default("work_dir", default_work_dir().to_string_lossy().to_string())?
            .set_default("goroutines_size", 10_i64)?
            .set_default("timezone", "UTC")?
            .set_default("database_path", default_database_path().to_string_lossy().to_string())?
            .add_source(
                config::Environment::with_prefix("SCHEDULER")
                    .try_parsing(true)
                    .separator("__"),
            );

        let raw = builder
            .build()
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;

        Self::from_raw(raw)
    }

    /// Load from a specific TOML config file, falling back to the same
    /// defaults and env overlay as [`SchedulerSettings::load`].
    pub fn load_from_path(path: &std::path::Path) -> Result<Self> {
        let builder = config::Config::builder()
            .set_default("with_seconds", false)?
            .set_default("work_dir", default_work_dir().to_string_lossy().to_string())?
            .set_default("goroutines_size", 10_i64)?
            .set_default("timezone", "UTC")?
            .set_default("database_path", default_database_path().to_string_lossy().to_string())?
            .add_source(config::File::from(path.to_path_buf()))
            .add_source(
                config::Environment::with_prefix("SCHEDULER")
                    .try_parsing(true)
                    .separator("__"),
            );

        let raw = builder.build().map_err(|error| ConfigError::Load {
            path: path.display().to_string(),
            source: std::sync::Arc::new(std::io::Error::other(error.to_string())),
        })?;

        Self::from_raw(raw)
    }

    fn from_raw(raw: config::Config) -> Result<Self> {
        let with_seconds = raw
            .get_bool("with_seconds")
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;

        let work_dir: String = raw
            .get_string("work_dir")
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;

        let goroutines_size = raw
            .get_int("goroutines_size")
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;
        if goroutines_size < 1 {
            return Err(ConfigError::Invalid(format!(
                "goroutines_size must be >= 1, got {goroutines_size}"
            ))
            .into());
        }

        let max_task_num = match raw.get_int("max_task_num") {
            Ok(value) if value > 0 => Some(value as usize),
            _ => None,
        };

        let timezone_name: String = raw
            .get_string("timezone")
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;
        let timezone = chrono_tz::Tz::from_str(&timezone_name)
            .map_err(|_| ConfigError::Invalid(format!("unknown IANA timezone: {timezone_name}")))?;

        let database_path: String = raw
            .get_string("database_path")
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;

        let redis_url = raw.get_string("redis_url").ok();

        Ok(Self {
            with_seconds,
            work_dir: PathBuf::from(work_dir),
            goroutines_size: goroutines_size as usize,
            max_task_num,
            timezone,
            database_path: PathBuf::from(database_path),
            redis_url,
        })
    }
}

fn default_work_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("taskwheel").join("work"))
        .unwrap_or_else(|| PathBuf::from("./taskwheel-work"))
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("taskwheel").join("taskwheel.db"))
        .unwrap_or_else(|| PathBuf::from("./taskwheel.db"))
}

impl From<config::ConfigError> for crate::error::Error {
    fn from(error: config::ConfigError) -> Self {
        ConfigError::Invalid(error.to_string()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn rejects_zero_goroutines_size() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("SCHEDULER__GOROUTINES_SIZE", "0");
        }
        let result = SchedulerSettings::load();
        unsafe {
            std::env::remove_var("SCHEDULER__GOROUTINES_SIZE");
        }
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unknown_timezone() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("SCHEDULER__TIMEZONE", "Not/AZone");
        }
        let result = SchedulerSettings::load();
        unsafe {
            std::env::remove_var("SCHEDULER__TIMEZONE");
        }
        assert!(result.is_err());
    }
}
