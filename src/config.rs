//! Configuration — loaded from environment variables / `.env` file.
//!
//! CLI flag parsing is out of scope (§1 Non-goals); environment variables are
//! the only input surface, with defaults for everything except the backend
//! host, which is the one documented hard startup failure (§7).

use crate::error::ConfigError;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Backend (redis-compatible store) connection.
    pub backend_host: String,
    pub backend_port: u16,
    pub backend_auth: Option<String>,
    pub backend_db: i64,
    /// Max pooled connections to the backend.
    pub backend_pool_max_size: usize,
    /// How long a pool checkout may wait before giving up (§4.2).
    pub backend_idle_timeout_ms: u64,

    /// Directory of `*.json` rule documents (§4.3).
    pub rule_dir: String,

    /// Retention window for telemetry events, in whole seconds (§3, §4.5).
    pub expired_seconds: u64,
    /// Sweep runs every `expired_seconds / sweep_interval_divisor` (§5: N ≥ 2).
    pub sweep_interval_divisor: u64,

    /// Alarm dispatcher target URL (§4.7).
    pub alarm_url: Option<String>,
    /// Hard timeout for the alarm POST, in milliseconds (§4.7: 500ms).
    pub alarm_timeout_ms: u64,

    /// Capacity of the bounded telemetry-write / alarm-dispatch queues (§5, §9).
    pub write_queue_capacity: usize,
    pub alarm_queue_capacity: usize,
    /// Number of workers draining each queue.
    pub write_workers: usize,
    pub alarm_workers: usize,

    /// Port for the localhost-only admin endpoint (§6). The bind address
    /// itself is not configurable — see §9.1.
    pub admin_port: u16,

    /// Whether the device-number rate limiter is wired in at all (§4.6). The
    /// circuit breaker always runs; the rate limiter is the one evaluator
    /// the spec calls out as optional ("if configured").
    pub rate_limiter_enabled: bool,

    /// Log level passed to `tracing_subscriber`'s `EnvFilter` fallback.
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Everything has a development-friendly default except `backend_host`,
    /// which must be set explicitly — a missing backend is the one error
    /// category this crate treats as a hard startup failure (§7).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let backend_host = env::var("FUSEGATE_BACKEND_HOST")
            .map_err(|_| ConfigError::MissingVar("FUSEGATE_BACKEND_HOST"))?;

        Ok(Config {
            backend_host,
            backend_port: parse_env_or("FUSEGATE_BACKEND_PORT", 6379)?,
            backend_auth: env::var("FUSEGATE_BACKEND_AUTH").ok(),
            backend_db: parse_env_or("FUSEGATE_BACKEND_DB", 0)?,
            backend_pool_max_size: parse_env_or("FUSEGATE_BACKEND_POOL_MAX_SIZE", 16)?,
            backend_idle_timeout_ms: parse_env_or("FUSEGATE_BACKEND_IDLE_TIMEOUT_MS", 50)?,

            rule_dir: env::var("FUSEGATE_RULE_DIR").unwrap_or_else(|_| "./rules".into()),

            expired_seconds: parse_env_or("FUSEGATE_EXPIRED_SECONDS", 3600)?,
            sweep_interval_divisor: parse_env_or("FUSEGATE_SWEEP_INTERVAL_DIVISOR", 4)?,

            alarm_url: env::var("FUSEGATE_ALARM_URL").ok(),
            alarm_timeout_ms: parse_env_or("FUSEGATE_ALARM_TIMEOUT_MS", 500)?,

            write_queue_capacity: parse_env_or("FUSEGATE_WRITE_QUEUE_CAPACITY", 4096)?,
            alarm_queue_capacity: parse_env_or("FUSEGATE_ALARM_QUEUE_CAPACITY", 1024)?,
            write_workers: parse_env_or("FUSEGATE_WRITE_WORKERS", 4)?,
            alarm_workers: parse_env_or("FUSEGATE_ALARM_WORKERS", 2)?,

            admin_port: parse_env_or("FUSEGATE_ADMIN_PORT", 9090)?,
            rate_limiter_enabled: parse_env_or("FUSEGATE_RATE_LIMITER_ENABLED", true)?,

            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        })
    }

    /// Assemble the `redis://` connection URL from the discrete fields.
    pub fn backend_url(&self) -> String {
        match &self.backend_auth {
            Some(auth) => format!(
                "redis://:{auth}@{host}:{port}/{db}",
                auth = auth,
                host = self.backend_host,
                port = self.backend_port,
                db = self.backend_db,
            ),
            None => format!(
                "redis://{host}:{port}/{db}",
                host = self.backend_host,
                port = self.backend_port,
                db = self.backend_db,
            ),
        }
    }
}

fn parse_env_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            name,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both tests touch process-global env vars; run them as one so cargo's
    // parallel test runner can't interleave the mutations.
    #[test]
    fn env_var_driven_config() {
        std::env::remove_var("FUSEGATE_BACKEND_HOST");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::MissingVar(_))
        ));

        std::env::set_var("FUSEGATE_BACKEND_HOST", "cache.internal");
        std::env::set_var("FUSEGATE_BACKEND_AUTH", "secret");
        let cfg = Config::from_env().expect("config should load");
        assert!(cfg.backend_url().contains(":secret@"));
        assert_eq!(cfg.backend_pool_max_size, 16);

        std::env::remove_var("FUSEGATE_BACKEND_AUTH");
        std::env::remove_var("FUSEGATE_BACKEND_HOST");
    }
}
