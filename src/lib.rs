pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use domain::{CacheError, CacheValue, Outcome};
pub use infrastructure::{
    AppConfig, CacheBackend, CacheClient, CacheOptions, InMemoryCacheBackend, KeySpace, LeaseLock,
    LockConfig, LockOutcome, RedisCacheBackend,
};
