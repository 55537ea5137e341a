use crate::domain::error::CacheError;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;

/// A value as it came back from the cache, before any coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Map(HashMap<String, String>),
    Array(Vec<String>),
}

impl CacheValue {
    fn kind(&self) -> &'static str {
        match self {
            CacheValue::Int(_) => "integer",
            CacheValue::Float(_) => "float",
            CacheValue::Bool(_) => "bool",
            CacheValue::Str(_) => "string",
            CacheValue::Map(_) => "map",
            CacheValue::Array(_) => "array",
        }
    }

    /// Wire form used when the value is written back to the cache.
    pub fn to_wire_string(&self) -> String {
        match self {
            CacheValue::Int(v) => v.to_string(),
            CacheValue::Float(v) => v.to_string(),
            CacheValue::Bool(v) => v.to_string(),
            CacheValue::Str(v) => v.clone(),
            CacheValue::Map(v) => serde_json::to_string(v).unwrap_or_default(),
            CacheValue::Array(v) => serde_json::to_string(v).unwrap_or_default(),
        }
    }
}

impl fmt::Display for CacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheValue::Str(s) => write!(f, "string {:?}", s),
            other => write!(f, "{} {}", other.kind(), other.to_wire_string()),
        }
    }
}

impl From<i64> for CacheValue {
    fn from(v: i64) -> Self {
        CacheValue::Int(v)
    }
}

impl From<f64> for CacheValue {
    fn from(v: f64) -> Self {
        CacheValue::Float(v)
    }
}

impl From<bool> for CacheValue {
    fn from(v: bool) -> Self {
        CacheValue::Bool(v)
    }
}

impl From<String> for CacheValue {
    fn from(v: String) -> Self {
        CacheValue::Str(v)
    }
}

impl From<&str> for CacheValue {
    fn from(v: &str) -> Self {
        CacheValue::Str(v.to_string())
    }
}

/// Uniform result of a cache call: either the primordial value or the error
/// the backend reported. Typed accessors coerce the value on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    inner: Result<CacheValue, CacheError>,
}

impl Outcome {
    pub fn ok(value: impl Into<CacheValue>) -> Self {
        Self {
            inner: Ok(value.into()),
        }
    }

    pub fn err(error: CacheError) -> Self {
        Self { inner: Err(error) }
    }

    pub fn is_ok(&self) -> bool {
        self.inner.is_ok()
    }

    /// True when the key was absent.
    pub fn is_nil(&self) -> bool {
        matches!(self.inner, Err(CacheError::Nil))
    }

    pub fn error(&self) -> Option<&CacheError> {
        self.inner.as_ref().err()
    }

    pub fn value(&self) -> Option<&CacheValue> {
        self.inner.as_ref().ok()
    }

    pub fn into_result(self) -> Result<CacheValue, CacheError> {
        self.inner
    }

    fn primordial(&self) -> Result<&CacheValue, CacheError> {
        self.inner.as_ref().map_err(Clone::clone)
    }

    pub fn as_i64(&self) -> Result<i64, CacheError> {
        match self.primordial()? {
            CacheValue::Int(v) => Ok(*v),
            CacheValue::Str(s) => s
                .parse::<i64>()
                .map_err(|_| CacheError::type_mismatch("integer", format!("string {:?}", s))),
            other => Err(CacheError::type_mismatch("integer", other)),
        }
    }

    pub fn as_f64(&self) -> Result<f64, CacheError> {
        match self.primordial()? {
            CacheValue::Float(v) => Ok(*v),
            CacheValue::Str(s) => s
                .parse::<f64>()
                .map_err(|_| CacheError::type_mismatch("float", format!("string {:?}", s))),
            other => Err(CacheError::type_mismatch("float", other)),
        }
    }

    pub fn as_bool(&self) -> Result<bool, CacheError> {
        match self.primordial()? {
            CacheValue::Bool(v) => Ok(*v),
            CacheValue::Str(s) => parse_bool(s)
                .ok_or_else(|| CacheError::type_mismatch("bool", format!("string {:?}", s))),
            other => Err(CacheError::type_mismatch("bool", other)),
        }
    }

    pub fn as_string(&self) -> Result<String, CacheError> {
        match self.primordial()? {
            CacheValue::Str(s) => Ok(s.clone()),
            other => Err(CacheError::type_mismatch("string", other)),
        }
    }

    /// Decodes a JSON string value into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CacheError> {
        match self.primordial()? {
            CacheValue::Str(s) => serde_json::from_str(s)
                .map_err(|e| CacheError::TypeMismatch(format!("cannot decode value: {}", e))),
            other => Err(CacheError::type_mismatch("JSON string", other)),
        }
    }

    pub fn as_map(&self) -> Result<HashMap<String, String>, CacheError> {
        match self.primordial()? {
            CacheValue::Map(m) => Ok(m.clone()),
            CacheValue::Str(_) => self.decode(),
            other => Err(CacheError::type_mismatch("map", other)),
        }
    }

    pub fn as_array(&self) -> Result<Vec<String>, CacheError> {
        match self.primordial()? {
            CacheValue::Array(a) => Ok(a.clone()),
            CacheValue::Str(_) => self.decode(),
            other => Err(CacheError::type_mismatch("array", other)),
        }
    }
}

impl From<Result<CacheValue, CacheError>> for Outcome {
    fn from(inner: Result<CacheValue, CacheError>) -> Self {
        Self { inner }
    }
}

// Accepts the same spellings as the cache's own boolean parsing.
fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
