use crate::infrastructure::circuit_breaker::CircuitBreakerConfig;
use crate::infrastructure::logging::LoggingConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// Connection and key-space settings for the cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    pub app_name: String,
    pub namespace: String,
    /// `host:port` of the single Redis endpoint.
    pub addr: String,
    pub password: Option<String>,
    pub db: i64,
    pub connection_timeout: Duration,
    pub response_timeout: Duration,
    /// Upper bound of the random jitter added to plain `set` expiries so that
    /// keys written together do not all expire together.
    pub ttl_jitter: Duration,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            app_name: "app".to_string(),
            namespace: "default".to_string(),
            addr: "127.0.0.1:6379".to_string(),
            password: None,
            db: 0,
            connection_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(2),
            ttl_jitter: Duration::ZERO,
            circuit_breaker: None,
        }
    }
}

impl CacheOptions {
    pub fn redis_url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{}@{}/{}", password, self.addr, self.db)
            }
            _ => format!("redis://{}/{}", self.addr, self.db),
        }
    }
}

/// Lease lock settings, fixed for the lifetime of a lock manager.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub lease_duration: Duration,
    /// Lets the current holder extend its own lease.
    pub reuse: bool,
    /// Refresh with a single compare-and-expire call instead of
    /// expire followed by a confirmation read.
    pub atomic_refresh: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(30),
            reuse: true,
            atomic_refresh: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheOptions,
    pub lock: LockConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads `.env` if present, then reads `CACHE_*`, `LOCK_*` and `LOG_*`
    /// variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let cache = &mut config.cache;
        if let Some(v) = lookup("CACHE_APP_NAME") {
            cache.app_name = v;
        }
        if let Some(v) = lookup("CACHE_NAMESPACE") {
            cache.namespace = v;
        }
        if let Some(v) = lookup("CACHE_ADDR") {
            cache.addr = v;
        }
        if let Some(v) = lookup("CACHE_PASSWORD") {
            cache.password = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "CACHE_DB")? {
            cache.db = v;
        }
        if let Some(v) = parse_millis(&lookup, "CACHE_CONNECTION_TIMEOUT_MS")? {
            cache.connection_timeout = v;
        }
        if let Some(v) = parse_millis(&lookup, "CACHE_RESPONSE_TIMEOUT_MS")? {
            cache.response_timeout = v;
        }
        if let Some(v) = parse_millis(&lookup, "CACHE_TTL_JITTER_MS")? {
            cache.ttl_jitter = v;
        }
        if let Some(threshold) = parse_var(&lookup, "CACHE_CB_FAILURE_THRESHOLD")? {
            let mut breaker = CircuitBreakerConfig {
                failure_threshold: threshold,
                ..Default::default()
            };
            if let Some(v) = parse_millis(&lookup, "CACHE_CB_RESET_TIMEOUT_MS")? {
                breaker.reset_timeout = v;
            }
            cache.circuit_breaker = Some(breaker);
        }

        let lock = &mut config.lock;
        if let Some(v) = parse_millis(&lookup, "LOCK_LEASE_MS")? {
            lock.lease_duration = v;
        }
        if let Some(v) = parse_var(&lookup, "LOCK_REUSE")? {
            lock.reuse = v;
        }
        if let Some(v) = parse_var(&lookup, "LOCK_ATOMIC_REFRESH")? {
            lock.atomic_refresh = v;
        }

        let logging = &mut config.logging;
        if let Some(v) = lookup("LOG_DIR") {
            logging.log_dir = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            logging.log_level = v;
        }
        if let Some(v) = parse_var(&lookup, "LOG_TO_FILE")? {
            logging.enable_file = v;
        }

        if config.lock.lease_duration.is_zero() {
            anyhow::bail!("LOCK_LEASE_MS must be greater than zero");
        }

        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {}: {:?}", name, raw))
        })
        .transpose()
}

fn parse_millis<F>(lookup: &F, name: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_var::<F, u64>(lookup, name)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_variables() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.cache.addr, "127.0.0.1:6379");
        assert_eq!(config.lock.lease_duration, Duration::from_secs(30));
        assert!(config.lock.reuse);
        assert!(!config.lock.atomic_refresh);
        assert!(config.cache.circuit_breaker.is_none());
    }

    #[test]
    fn test_variables_override_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("CACHE_APP_NAME", "billing"),
            ("CACHE_NAMESPACE", "jobs"),
            ("CACHE_DB", "3"),
            ("CACHE_PASSWORD", "s3cret"),
            ("LOCK_LEASE_MS", "5000"),
            ("LOCK_REUSE", "false"),
            ("CACHE_CB_FAILURE_THRESHOLD", "3"),
            ("CACHE_CB_RESET_TIMEOUT_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.cache.app_name, "billing");
        assert_eq!(config.cache.namespace, "jobs");
        assert_eq!(config.cache.redis_url(), "redis://:s3cret@127.0.0.1:6379/3");
        assert_eq!(config.lock.lease_duration, Duration::from_secs(5));
        assert!(!config.lock.reuse);
        let breaker = config.cache.circuit_breaker.unwrap();
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.reset_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[("LOCK_LEASE_MS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("LOCK_LEASE_MS"));
        assert!(AppConfig::from_lookup(lookup_from(&[("LOCK_LEASE_MS", "0")])).is_err());
    }

    #[test]
    fn test_redis_url_without_password() {
        let options = CacheOptions::default();
        assert_eq!(options.redis_url(), "redis://127.0.0.1:6379/0");
    }
}
