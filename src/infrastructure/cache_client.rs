use crate::domain::{CacheError, CacheValue, Outcome};
use crate::infrastructure::circuit_breaker::CircuitBreakerBackend;
use crate::infrastructure::config::CacheOptions;
use crate::infrastructure::redis_abstraction::{CacheBackend, RedisCacheBackend, MISSING};
use rand::Rng;
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

/// Prefix shared by every key one application writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    pub app_name: String,
    pub namespace: String,
}

impl KeySpace {
    pub fn new(app_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            namespace: namespace.into(),
        }
    }

    /// `<app>-<namespace>-<raw>`
    pub fn key(&self, raw: impl Display) -> String {
        format!("{}-{}-{}", self.app_name, self.namespace, raw)
    }
}

/// Namespacing front of a `CacheBackend`. Every call takes raw keys and
/// returns an `Outcome`.
#[derive(Clone)]
pub struct CacheClient {
    backend: Arc<dyn CacheBackend>,
    key_space: KeySpace,
    ttl_jitter: Duration,
}

impl CacheClient {
    pub fn new(backend: Arc<dyn CacheBackend>, key_space: KeySpace) -> Self {
        Self {
            backend,
            key_space,
            ttl_jitter: Duration::ZERO,
        }
    }

    pub fn with_ttl_jitter(mut self, ttl_jitter: Duration) -> Self {
        self.ttl_jitter = ttl_jitter;
        self
    }

    /// Connects to Redis as described by `options`, behind a circuit breaker
    /// when one is configured.
    pub async fn connect(options: &CacheOptions) -> Result<Self, CacheError> {
        let redis: Arc<dyn CacheBackend> = Arc::new(RedisCacheBackend::connect(options).await?);
        let backend = match &options.circuit_breaker {
            Some(config) => Arc::new(CircuitBreakerBackend::new(redis, config.clone())),
            None => redis,
        };
        let key_space = KeySpace::new(options.app_name.clone(), options.namespace.clone());
        Ok(Self::new(backend, key_space).with_ttl_jitter(options.ttl_jitter))
    }

    pub fn key_space(&self) -> &KeySpace {
        &self.key_space
    }

    pub fn key(&self, raw: impl Display) -> String {
        self.key_space.key(raw)
    }

    pub fn keys<I, K>(&self, raw: I) -> Vec<String>
    where
        I: IntoIterator<Item = K>,
        K: Display,
    {
        raw.into_iter().map(|k| self.key(k)).collect()
    }

    fn jittered(&self, ttl: Duration) -> Duration {
        if ttl.is_zero() || self.ttl_jitter.is_zero() {
            return ttl;
        }
        let max = self.ttl_jitter.as_millis() as u64;
        ttl + Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    pub async fn ping(&self) -> bool {
        self.backend.ping().await.is_ok()
    }

    /// Value of `key`; `Nil` when absent.
    pub async fn get(&self, key: &str) -> Outcome {
        self.backend.get(&self.key(key)).await.into()
    }

    /// Boolean outcome: true if the key was absent and is now set.
    pub async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Outcome {
        self.backend
            .set_nx(&self.key(key), value, ttl)
            .await
            .map(CacheValue::Bool)
            .into()
    }

    /// Boolean outcome: true if the key existed and its TTL was reset.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Outcome {
        self.backend
            .expire(&self.key(key), ttl)
            .await
            .map(CacheValue::Bool)
            .into()
    }

    /// Boolean outcome: true if the key held `value` and its TTL was reset.
    pub async fn expire_if_equals(&self, key: &str, value: &str, ttl: Duration) -> Outcome {
        self.backend
            .expire_if_equals(&self.key(key), value, ttl)
            .await
            .map(CacheValue::Bool)
            .into()
    }

    /// Stores a value, adding the configured TTL jitter. A zero `ttl` never expires.
    pub async fn set(&self, key: &str, value: impl Into<CacheValue>, ttl: Duration) -> Outcome {
        let ttl = self.jittered(ttl);
        let value = value.into().to_wire_string();
        self.backend
            .set(&self.key(key), &value, ttl)
            .await
            .map(|()| CacheValue::Str("OK".to_string()))
            .into()
    }

    /// Stores any serializable value as JSON.
    pub async fn set_value<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Outcome {
        match serde_json::to_string(value) {
            Ok(json) => self.set(key, json, ttl).await,
            Err(e) => Outcome::err(CacheError::TypeMismatch(format!(
                "cannot encode value: {}",
                e
            ))),
        }
    }

    /// Integer outcome: number of keys removed.
    pub async fn del(&self, keys: &[&str]) -> Outcome {
        let keys = self.keys(keys);
        self.backend.del(&keys).await.map(CacheValue::Int).into()
    }

    /// Integer outcome: number of keys present.
    pub async fn exists(&self, keys: &[&str]) -> Outcome {
        let keys = self.keys(keys);
        self.backend.exists(&keys).await.map(CacheValue::Int).into()
    }

    /// Integer outcome: the value after the increment.
    pub async fn incr_by(&self, key: &str, delta: i64) -> Outcome {
        self.backend
            .incr_by(&self.key(key), delta)
            .await
            .map(CacheValue::Int)
            .into()
    }

    pub async fn decr_by(&self, key: &str, delta: i64) -> Outcome {
        match delta.checked_neg() {
            Some(negated) => self.incr_by(key, negated).await,
            None => Outcome::err(CacheError::Backend("decrement would overflow".to_string())),
        }
    }

    /// Stores `value` without expiry and returns the value it replaced; `Nil`
    /// when the key was absent.
    pub async fn get_set(&self, key: &str, value: impl Into<CacheValue>) -> Outcome {
        let value = value.into().to_wire_string();
        self.backend.get_set(&self.key(key), &value).await.into()
    }

    /// Array outcome with one entry per key, in order; absent keys read as an
    /// empty string.
    pub async fn mget(&self, keys: &[&str]) -> Outcome {
        let keys = self.keys(keys);
        self.backend
            .mget(&keys)
            .await
            .map(|values| {
                CacheValue::Array(
                    values
                        .into_iter()
                        .map(|value| value.unwrap_or_else(|| MISSING.to_string()))
                        .collect(),
                )
            })
            .into()
    }

    pub async fn hget(&self, key: &str, field: &str) -> Outcome {
        self.backend.hget(&self.key(key), field).await.into()
    }

    /// Boolean outcome: true if the field did not exist before.
    pub async fn hset(&self, key: &str, field: &str, value: impl Into<CacheValue>) -> Outcome {
        let value = value.into().to_wire_string();
        self.backend
            .hset(&self.key(key), field, &value)
            .await
            .map(CacheValue::Bool)
            .into()
    }

    /// Map outcome of every field; empty for an absent key.
    pub async fn hgetall(&self, key: &str) -> Outcome {
        self.backend
            .hgetall(&self.key(key))
            .await
            .map(CacheValue::Map)
            .into()
    }

    pub async fn hkeys(&self, key: &str) -> Outcome {
        self.backend
            .hkeys(&self.key(key))
            .await
            .map(CacheValue::Array)
            .into()
    }
}
