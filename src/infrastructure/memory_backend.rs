use crate::domain::{CacheError, CacheValue};
use crate::infrastructure::redis_abstraction::CacheBackend;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct StoredValue {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(value: CacheValue, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            expires_at: (!ttl.is_zero()).then(|| now + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }

    fn hash(&self) -> Result<&HashMap<String, String>, CacheError> {
        match &self.value {
            CacheValue::Map(fields) => Ok(fields),
            other => Err(CacheError::type_mismatch("hash", other)),
        }
    }
}

/// Expiries that must always end, as `PX`/`PEXPIRE` do: never shorter than 1 ms.
fn bounded(ttl: Duration) -> Duration {
    ttl.max(Duration::from_millis(1))
}

/// Process-local `CacheBackend`. Each key is guarded by its map shard, so
/// `set_nx` is atomic against concurrent callers in the same process.
/// Expiry follows the tokio clock, which lets tests pause and advance time.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: DashMap<String, StoredValue>,
    unavailable: AtomicBool,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: while set, every call fails with a backend error.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Remaining time to live of a key, `None` if it is absent or has no expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CacheError::Backend("in-memory backend is unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn purge_if_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<CacheValue, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return match &entry.value {
                    CacheValue::Map(_) => Err(CacheError::type_mismatch("string", &entry.value)),
                    value => Ok(value.clone()),
                };
            }
        }
        self.purge_if_expired(key, now);
        Err(CacheError::Nil)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        let fresh = StoredValue::new(CacheValue::Str(value.to_string()), bounded(ttl), now);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    occupied.insert(fresh);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + bounded(ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) && entry.value.to_wire_string() == value => {
                entry.expires_at = Some(now + bounded(ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.check_available()?;
        let now = Instant::now();
        self.entries.insert(
            key.to_string(),
            StoredValue::new(CacheValue::Str(value.to_string()), ttl, now),
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<i64, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, entry)| entry.is_live(now))
            .count();
        Ok(removed as i64)
    }

    async fn exists(&self, keys: &[String]) -> Result<i64, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        let present = keys
            .iter()
            .filter(|key| {
                self.entries
                    .get(key.as_str())
                    .map_or(false, |entry| entry.is_live(now))
            })
            .count();
        Ok(present as i64)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_live(now) => {
                let entry = occupied.get_mut();
                let current = match &entry.value {
                    CacheValue::Int(v) => *v,
                    CacheValue::Str(s) => s.parse::<i64>().map_err(|_| {
                        CacheError::type_mismatch("integer", format!("string {:?}", s))
                    })?,
                    other => return Err(CacheError::type_mismatch("integer", other)),
                };
                let next = current
                    .checked_add(delta)
                    .ok_or_else(|| CacheError::Backend("increment would overflow".to_string()))?;
                entry.value = CacheValue::Int(next);
                Ok(next)
            }
            Entry::Occupied(mut expired) => {
                expired.insert(StoredValue::new(CacheValue::Int(delta), Duration::ZERO, now));
                Ok(delta)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(CacheValue::Int(delta), Duration::ZERO, now));
                Ok(delta)
            }
        }
    }

    async fn get_set(&self, key: &str, value: &str) -> Result<CacheValue, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        let fresh = StoredValue::new(CacheValue::Str(value.to_string()), Duration::ZERO, now);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_live(now) => {
                if let CacheValue::Map(_) = occupied.get().value {
                    return Err(CacheError::type_mismatch("string", &occupied.get().value));
                }
                Ok(occupied.insert(fresh).value)
            }
            Entry::Occupied(mut expired) => {
                expired.insert(fresh);
                Err(CacheError::Nil)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Err(CacheError::Nil)
            }
        }
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        let values = keys
            .iter()
            .map(|key| {
                self.entries
                    .get(key.as_str())
                    .filter(|entry| entry.is_live(now))
                    .and_then(|entry| match &entry.value {
                        CacheValue::Map(_) => None,
                        value => Some(value.to_wire_string()),
                    })
            })
            .collect();
        Ok(values)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<CacheValue, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        match self.entries.get(key).filter(|entry| entry.is_live(now)) {
            Some(entry) => entry
                .hash()?
                .get(field)
                .map(|value| CacheValue::Str(value.clone()))
                .ok_or(CacheError::Nil),
            None => Err(CacheError::Nil),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        let fresh = || {
            let fields = HashMap::from([(field.to_string(), value.to_string())]);
            StoredValue::new(CacheValue::Map(fields), Duration::ZERO, now)
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_live(now) => {
                match &mut occupied.get_mut().value {
                    CacheValue::Map(fields) => Ok(fields
                        .insert(field.to_string(), value.to_string())
                        .is_none()),
                    other => Err(CacheError::type_mismatch("hash", &*other)),
                }
            }
            Entry::Occupied(mut expired) => {
                expired.insert(fresh());
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh());
                Ok(true)
            }
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        match self.entries.get(key).filter(|entry| entry.is_live(now)) {
            Some(entry) => entry.hash().cloned(),
            None => Ok(HashMap::new()),
        }
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        match self.entries.get(key).filter(|entry| entry.is_live(now)) {
            Some(entry) => Ok(entry.hash()?.keys().cloned().collect()),
            None => Ok(Vec::new()),
        }
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_only_claims_absent_keys() {
        let backend = InMemoryCacheBackend::new();
        assert_eq!(backend.set_nx("k", "a", Duration::from_secs(5)).await, Ok(true));
        assert_eq!(backend.set_nx("k", "b", Duration::from_secs(5)).await, Ok(false));
        assert_eq!(backend.get("k").await, Ok(CacheValue::Str("a".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_expire_with_the_clock() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set_nx("k", "a", Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(backend.get("k").await.is_ok());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(backend.get("k").await, Err(CacheError::Nil));
        assert_eq!(backend.expire("k", Duration::from_secs(5)).await, Ok(false));
        assert_eq!(backend.set_nx("k", "b", Duration::from_secs(5)).await, Ok(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_resets_ttl() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set_nx("k", "a", Duration::from_secs(5))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(backend.expire("k", Duration::from_secs(5)).await, Ok(true));
        assert_eq!(backend.ttl("k"), Some(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_lease_still_expires() {
        let backend = InMemoryCacheBackend::new();
        assert_eq!(backend.set_nx("k", "a", Duration::ZERO).await, Ok(true));
        assert_eq!(backend.ttl("k"), Some(Duration::from_millis(1)));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(backend.get("k").await, Err(CacheError::Nil));
        assert_eq!(backend.set_nx("k", "b", Duration::ZERO).await, Ok(true));

        assert_eq!(backend.expire("k", Duration::ZERO).await, Ok(true));
        assert_eq!(backend.ttl("k"), Some(Duration::from_millis(1)));
        assert_eq!(
            backend.expire_if_equals("k", "b", Duration::ZERO).await,
            Ok(true)
        );
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(backend.get("k").await, Err(CacheError::Nil));

        backend.set("plain", "v", Duration::ZERO).await.unwrap();
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(backend.ttl("plain"), None);
        assert!(backend.get("plain").await.is_ok());
    }

    #[tokio::test]
    async fn test_expire_if_equals_checks_value() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set_nx("k", "a", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            backend
                .expire_if_equals("k", "b", Duration::from_secs(9))
                .await,
            Ok(false)
        );
        assert_eq!(
            backend
                .expire_if_equals("k", "a", Duration::from_secs(9))
                .await,
            Ok(true)
        );
        assert_eq!(
            backend
                .expire_if_equals("missing", "a", Duration::from_secs(9))
                .await,
            Ok(false)
        );
    }

    #[tokio::test]
    async fn test_counters_del_and_exists() {
        let backend = InMemoryCacheBackend::new();
        assert_eq!(backend.incr_by("n", 2).await, Ok(2));
        assert_eq!(backend.incr_by("n", -5).await, Ok(-3));

        backend.set("s", "12", Duration::ZERO).await.unwrap();
        assert_eq!(backend.incr_by("s", 1).await, Ok(13));

        backend.set("word", "abc", Duration::ZERO).await.unwrap();
        assert!(matches!(
            backend.incr_by("word", 1).await,
            Err(CacheError::TypeMismatch(_))
        ));

        let keys = vec!["n".to_string(), "s".to_string(), "missing".to_string()];
        assert_eq!(backend.exists(&keys).await, Ok(2));
        assert_eq!(backend.del(&keys).await, Ok(2));
        assert_eq!(backend.exists(&keys).await, Ok(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_set_returns_previous_and_clears_ttl() {
        let backend = InMemoryCacheBackend::new();
        assert_eq!(backend.get_set("k", "a").await, Err(CacheError::Nil));
        backend.set("k", "b", Duration::from_secs(5)).await.unwrap();

        assert_eq!(backend.get_set("k", "c").await, Ok(CacheValue::Str("b".into())));
        assert_eq!(backend.ttl("k"), None);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(backend.get("k").await, Ok(CacheValue::Str("c".into())));
    }

    #[tokio::test]
    async fn test_mget_keeps_a_slot_for_every_key() {
        let backend = InMemoryCacheBackend::new();
        backend.set("a", "1", Duration::ZERO).await.unwrap();
        backend.incr_by("c", 3).await.unwrap();
        backend.hset("h", "f", "v").await.unwrap();

        let keys: Vec<String> = ["a", "b", "c", "h"].iter().map(|k| k.to_string()).collect();
        assert_eq!(
            backend.mget(&keys).await,
            Ok(vec![Some("1".into()), None, Some("3".into()), None])
        );
        assert_eq!(backend.mget(&[]).await, Ok(vec![]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hash_fields() {
        let backend = InMemoryCacheBackend::new();
        assert_eq!(backend.hset("h", "region", "eu").await, Ok(true));
        assert_eq!(backend.hset("h", "region", "us").await, Ok(false));
        assert_eq!(backend.hset("h", "tier", "gold").await, Ok(true));

        assert_eq!(backend.hget("h", "region").await, Ok(CacheValue::Str("us".into())));
        assert_eq!(backend.hget("h", "zone").await, Err(CacheError::Nil));
        assert_eq!(backend.hget("missing", "region").await, Err(CacheError::Nil));

        let all = backend.hgetall("h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["tier"], "gold");
        let mut fields = backend.hkeys("h").await.unwrap();
        fields.sort();
        assert_eq!(fields, vec!["region".to_string(), "tier".to_string()]);

        assert_eq!(backend.hgetall("missing").await, Ok(HashMap::new()));
        assert_eq!(backend.hkeys("missing").await, Ok(vec![]));
    }

    #[tokio::test]
    async fn test_hash_and_string_commands_do_not_mix() {
        let backend = InMemoryCacheBackend::new();
        backend.set("s", "plain", Duration::ZERO).await.unwrap();
        backend.hset("h", "f", "v").await.unwrap();

        assert!(matches!(backend.hset("s", "f", "v").await, Err(CacheError::TypeMismatch(_))));
        assert!(matches!(backend.hget("s", "f").await, Err(CacheError::TypeMismatch(_))));
        assert!(matches!(backend.hgetall("s").await, Err(CacheError::TypeMismatch(_))));
        assert!(matches!(backend.get("h").await, Err(CacheError::TypeMismatch(_))));
        assert!(matches!(backend.get_set("h", "x").await, Err(CacheError::TypeMismatch(_))));
    }

    #[tokio::test]
    async fn test_unavailable_backend_fails_every_call() {
        let backend = InMemoryCacheBackend::new();
        backend.set_available(false);
        assert!(matches!(backend.get("k").await, Err(CacheError::Backend(_))));
        assert!(matches!(
            backend.set_nx("k", "a", Duration::from_secs(1)).await,
            Err(CacheError::Backend(_))
        ));
        assert!(backend.ping().await.is_err());

        backend.set_available(true);
        assert_eq!(backend.get("k").await, Err(CacheError::Nil));
    }
}
