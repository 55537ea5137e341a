use redis::RedisError;

/// Errors surfaced by the cache layer.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum CacheError {
    /// The key does not exist.
    #[error("Key not found")]
    Nil,
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

impl CacheError {
    pub fn is_nil(&self) -> bool {
        matches!(self, CacheError::Nil)
    }

    pub fn type_mismatch(expected: &str, found: impl std::fmt::Display) -> Self {
        CacheError::TypeMismatch(format!("expected {}, found {}", expected, found))
    }
}

impl From<RedisError> for CacheError {
    fn from(err: RedisError) -> Self {
        if err.kind() == redis::ErrorKind::TypeError || err.code() == Some("WRONGTYPE") {
            CacheError::TypeMismatch(err.to_string())
        } else {
            CacheError::Backend(err.to_string())
        }
    }
}
