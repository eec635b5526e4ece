//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use abacus_core::scheduling::{
    DEFAULT_JOB_TIMEOUT, DEFAULT_LOCK_LIMIT, DEFAULT_LOCK_TTL, DEFAULT_POLL_INTERVAL,
    DEFAULT_WORKER_SLOTS,
};

/// Error raised for missing or malformed configuration values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// A named warehouse connection used as an analysis data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseConfig {
    pub name: String,
    pub url: String,
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub poll_interval: Duration,
    pub worker_slots: usize,
    pub batch_size: i64,
    pub default_lock_limit: u32,
    pub lock_ttl: Duration,
    pub job_timeout: Duration,
    pub query_timeout: Duration,
    pub webhook_timeout: Duration,
    pub warehouses: Vec<WarehouseConfig>,
    /// When set, definitions are read from this YAML file instead of the
    /// database.
    pub metrics_config_path: Option<PathBuf>,
    pub finished_job_retention: Duration,
    /// Lock holder identity of this process.
    pub instance_id: String,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default       |
    /// |--------------------------------|---------------|
    /// | `DATABASE_URL`                 | required      |
    /// | `SCHEDULER_POLL_INTERVAL_MS`   | `5000`        |
    /// | `SCHEDULER_WORKER_SLOTS`       | `10`          |
    /// | `SCHEDULER_BATCH_SIZE`         | `50`          |
    /// | `DEFAULT_LOCK_LIMIT`           | `5`           |
    /// | `LOCK_TTL_SECS`                | `1800`        |
    /// | `JOB_TIMEOUT_SECS`             | `900`         |
    /// | `QUERY_TIMEOUT_SECS`           | `600`         |
    /// | `WEBHOOK_TIMEOUT_SECS`         | `10`          |
    /// | `WAREHOUSE_URLS`               | empty         |
    /// | `METRICS_CONFIG_PATH`          | unset         |
    /// | `FINISHED_JOB_RETENTION_HOURS` | `24`          |
    /// | `SCHEDULER_INSTANCE_ID`        | random UUID   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`WorkerConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let config = Self {
            database_url,
            poll_interval: Duration::from_millis(parse_or(
                "SCHEDULER_POLL_INTERVAL_MS",
                get("SCHEDULER_POLL_INTERVAL_MS"),
                DEFAULT_POLL_INTERVAL.as_millis() as u64,
            )?),
            worker_slots: parse_or(
                "SCHEDULER_WORKER_SLOTS",
                get("SCHEDULER_WORKER_SLOTS"),
                DEFAULT_WORKER_SLOTS,
            )?,
            batch_size: parse_or("SCHEDULER_BATCH_SIZE", get("SCHEDULER_BATCH_SIZE"), 50)?,
            default_lock_limit: parse_or(
                "DEFAULT_LOCK_LIMIT",
                get("DEFAULT_LOCK_LIMIT"),
                DEFAULT_LOCK_LIMIT,
            )?,
            lock_ttl: Duration::from_secs(parse_or(
                "LOCK_TTL_SECS",
                get("LOCK_TTL_SECS"),
                DEFAULT_LOCK_TTL.as_secs(),
            )?),
            job_timeout: Duration::from_secs(parse_or(
                "JOB_TIMEOUT_SECS",
                get("JOB_TIMEOUT_SECS"),
                DEFAULT_JOB_TIMEOUT.as_secs(),
            )?),
            query_timeout: Duration::from_secs(parse_or(
                "QUERY_TIMEOUT_SECS",
                get("QUERY_TIMEOUT_SECS"),
                600,
            )?),
            webhook_timeout: Duration::from_secs(parse_or(
                "WEBHOOK_TIMEOUT_SECS",
                get("WEBHOOK_TIMEOUT_SECS"),
                10,
            )?),
            warehouses: parse_warehouses(get("WAREHOUSE_URLS").as_deref())?,
            metrics_config_path: get("METRICS_CONFIG_PATH").map(PathBuf::from),
            finished_job_retention: Duration::from_secs(
                parse_or::<u64>(
                    "FINISHED_JOB_RETENTION_HOURS",
                    get("FINISHED_JOB_RETENTION_HOURS"),
                    24,
                )? * 3600,
            ),
            instance_id: get("SCHEDULER_INSTANCE_ID")
                .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4().simple())),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that break scheduler invariants.
    ///
    /// The lock lease must outlive the handler timeout, otherwise a slow but
    /// healthy run can lose its lock and a second instance of the same job
    /// identity can start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_ttl <= self.job_timeout {
            return Err(ConfigError::Invalid {
                key: "LOCK_TTL_SECS",
                value: self.lock_ttl.as_secs().to_string(),
                reason: format!(
                    "must be greater than JOB_TIMEOUT_SECS ({})",
                    self.job_timeout.as_secs()
                ),
            });
        }
        if self.query_timeout > self.job_timeout {
            return Err(ConfigError::Invalid {
                key: "QUERY_TIMEOUT_SECS",
                value: self.query_timeout.as_secs().to_string(),
                reason: "must not exceed JOB_TIMEOUT_SECS".into(),
            });
        }
        for (key, value) in [
            ("SCHEDULER_WORKER_SLOTS", self.worker_slots as u64),
            ("SCHEDULER_BATCH_SIZE", self.batch_size.max(0) as u64),
            ("DEFAULT_LOCK_LIMIT", u64::from(self.default_lock_limit)),
            ("SCHEDULER_POLL_INTERVAL_MS", self.poll_interval.as_millis() as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: "0".into(),
                    reason: "must be positive".into(),
                });
            }
        }
        Ok(())
    }
}

fn parse_or<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Parse `name=url,name=url`.
fn parse_warehouses(value: Option<&str>) -> Result<Vec<WarehouseConfig>, ConfigError> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
                Ok(WarehouseConfig {
                    name: name.trim().to_string(),
                    url: url.trim().to_string(),
                })
            }
            _ => Err(ConfigError::Invalid {
                key: "WAREHOUSE_URLS",
                value: entry.to_string(),
                reason: "expected name=url".into(),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/abacus")]).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.worker_slots, 10);
        assert_eq!(config.default_lock_limit, 5);
        assert_eq!(config.lock_ttl, Duration::from_secs(1800));
        assert_eq!(config.job_timeout, Duration::from_secs(900));
        assert_eq!(config.finished_job_retention, Duration::from_secs(24 * 3600));
        assert!(config.warehouses.is_empty());
        assert!(config.instance_id.starts_with("worker-"));
    }

    #[test]
    fn database_url_is_required() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn warehouses_are_parsed() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/abacus"),
            ("WAREHOUSE_URLS", "main=postgres://wh/main, events = postgres://wh/events"),
        ])
        .unwrap();
        assert_eq!(config.warehouses.len(), 2);
        assert_eq!(config.warehouses[1].name, "events");
        assert_eq!(config.warehouses[1].url, "postgres://wh/events");
    }

    #[test]
    fn malformed_number_is_reported() {
        let err = load(&[
            ("DATABASE_URL", "postgres://localhost/abacus"),
            ("SCHEDULER_WORKER_SLOTS", "ten"),
        ])
        .unwrap_err();
        assert_matches!(err, ConfigError::Invalid { key: "SCHEDULER_WORKER_SLOTS", .. });
    }

    #[test]
    fn lock_ttl_must_exceed_job_timeout() {
        let err = load(&[
            ("DATABASE_URL", "postgres://localhost/abacus"),
            ("LOCK_TTL_SECS", "600"),
            ("JOB_TIMEOUT_SECS", "600"),
        ])
        .unwrap_err();
        assert_matches!(err, ConfigError::Invalid { key: "LOCK_TTL_SECS", .. });
    }

    #[test]
    fn zero_worker_slots_rejected() {
        let err = load(&[
            ("DATABASE_URL", "postgres://localhost/abacus"),
            ("SCHEDULER_WORKER_SLOTS", "0"),
        ])
        .unwrap_err();
        assert_matches!(err, ConfigError::Invalid { key: "SCHEDULER_WORKER_SLOTS", .. });
    }
}
