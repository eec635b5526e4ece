use abacus_core::scheduling::DEFAULT_LOCK_LIMIT;
use abacus_worker::ConfigError;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    pub database_url: String,
    /// Recurrence used when an experiment refresh is scheduled without an
    /// explicit rule.
    pub experiment_refresh_schedule: String,
    /// Same, for metrics.
    pub metric_refresh_schedule: String,
    /// Lock limit stamped on submitted jobs; should match the workers'.
    pub default_lock_limit: u32,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default        |
    /// |-------------------------------|----------------|
    /// | `HOST`                        | `0.0.0.0`      |
    /// | `PORT`                        | `3000`         |
    /// | `REQUEST_TIMEOUT_SECS`        | `30`           |
    /// | `DATABASE_URL`                | required       |
    /// | `EXPERIMENT_REFRESH_SCHEDULE` | `0 */6 * * *`  |
    /// | `METRIC_REFRESH_SCHEDULE`     | `0 0 * * *`    |
    /// | `DEFAULT_LOCK_LIMIT`          | `5`            |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or("PORT", get("PORT"), 3000)?,
            request_timeout_secs: parse_or(
                "REQUEST_TIMEOUT_SECS",
                get("REQUEST_TIMEOUT_SECS"),
                30,
            )?,
            database_url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            experiment_refresh_schedule: get("EXPERIMENT_REFRESH_SCHEDULE")
                .unwrap_or_else(|| "0 */6 * * *".into()),
            metric_refresh_schedule: get("METRIC_REFRESH_SCHEDULE")
                .unwrap_or_else(|| "0 0 * * *".into()),
            default_lock_limit: parse_or(
                "DEFAULT_LOCK_LIMIT",
                get("DEFAULT_LOCK_LIMIT"),
                DEFAULT_LOCK_LIMIT,
            )?,
        })
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
