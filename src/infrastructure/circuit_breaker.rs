use crate::domain::{CacheError, CacheValue};
use crate::infrastructure::redis_abstraction::CacheBackend;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive backend failures that open the circuit.
    pub failure_threshold: u64,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    Open(Instant),
    HalfOpen,
}

pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: AtomicU64,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU64::new(0),
            config,
        }
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    async fn allow_request(&self) -> bool {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::Closed => true,
            CircuitState::Open(open_time) => {
                if open_time.elapsed() >= self.config.reset_timeout {
                    *state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            // Trial calls pass until one of them closes or reopens the circuit.
            CircuitState::HalfOpen => true,
        }
    }

    async fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        let mut state = self.state.write().await;
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
        }
    }

    async fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;
        let reopen = *state == CircuitState::HalfOpen;
        if reopen || (failures >= self.config.failure_threshold && *state == CircuitState::Closed)
        {
            warn!(
                "Cache circuit breaker opened after {} consecutive failures",
                failures
            );
            *state = CircuitState::Open(Instant::now());
        }
    }
}

/// Decorates a backend so that a run of failures makes further calls fail
/// fast instead of waiting on an unreachable cache.
pub struct CircuitBreakerBackend {
    inner: Arc<dyn CacheBackend>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerBackend {
    pub fn new(inner: Arc<dyn CacheBackend>, config: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            circuit_breaker: Arc::new(CircuitBreaker::new(config)),
        }
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    async fn guarded<T, F>(&self, call: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>> + Send,
    {
        if !self.circuit_breaker.allow_request().await {
            return Err(CacheError::Backend("Circuit breaker is open".to_string()));
        }

        let result = call.await;
        match &result {
            // A missing key or a badly typed value still proves the cache is reachable.
            Ok(_) | Err(CacheError::Nil) | Err(CacheError::TypeMismatch(_)) => {
                self.circuit_breaker.record_success().await
            }
            Err(CacheError::Backend(_)) => self.circuit_breaker.record_failure().await,
        }
        result
    }
}

#[async_trait]
impl CacheBackend for CircuitBreakerBackend {
    async fn get(&self, key: &str) -> Result<CacheValue, CacheError> {
        self.guarded(self.inner.get(key)).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.guarded(self.inner.set_nx(key, value, ttl)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.guarded(self.inner.expire(key, ttl)).await
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        self.guarded(self.inner.expire_if_equals(key, value, ttl))
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.guarded(self.inner.set(key, value, ttl)).await
    }

    async fn del(&self, keys: &[String]) -> Result<i64, CacheError> {
        self.guarded(self.inner.del(keys)).await
    }

    async fn exists(&self, keys: &[String]) -> Result<i64, CacheError> {
        self.guarded(self.inner.exists(keys)).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        self.guarded(self.inner.incr_by(key, delta)).await
    }

    async fn get_set(&self, key: &str, value: &str) -> Result<CacheValue, CacheError> {
        self.guarded(self.inner.get_set(key, value)).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        self.guarded(self.inner.mget(keys)).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<CacheValue, CacheError> {
        self.guarded(self.inner.hget(key, field)).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, CacheError> {
        self.guarded(self.inner.hset(key, field, value)).await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        self.guarded(self.inner.hgetall(key)).await
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>, CacheError> {
        self.guarded(self.inner.hkeys(key)).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.guarded(self.inner.ping()).await
    }
}
