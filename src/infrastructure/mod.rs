pub mod cache_client;
pub mod circuit_breaker;
pub mod config;
pub mod lease_lock;
pub mod logging;
pub mod memory_backend;
pub mod redis_abstraction;

pub use cache_client::{CacheClient, KeySpace};
pub use circuit_breaker::{CircuitBreakerBackend, CircuitBreakerConfig};
pub use config::{AppConfig, CacheOptions, LockConfig};
pub use lease_lock::{LeaseLock, LockMetrics, LockOutcome};
pub use memory_backend::InMemoryCacheBackend;
pub use redis_abstraction::{CacheBackend, RedisCacheBackend};
