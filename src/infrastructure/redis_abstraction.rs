use crate::domain::{CacheError, CacheValue};
use crate::infrastructure::config::CacheOptions;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client as NativeRedisClient, FromRedisValue, Script, Value as RedisValue};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// The cache primitives the rest of the crate is written against.
/// This trait allows swapping Redis for an in-process store or a test double.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Reads a key. Corresponds to `GET key`; an absent key is `CacheError::Nil`.
    async fn get(&self, key: &str) -> Result<CacheValue, CacheError>;

    /// Sets a key only if it is absent, with an expiration.
    /// Corresponds to `SET key value NX PX millis`. Returns true if the key was set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Resets the expiration of an existing key. Corresponds to `PEXPIRE key millis`.
    /// Returns false if the key did not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Resets the expiration only if the key currently holds `value`, as one atomic step.
    async fn expire_if_equals(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError>;

    /// Unconditional set. A zero `ttl` means no expiration.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Deletes keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<i64, CacheError>;

    /// Counts how many of the keys exist.
    async fn exists(&self, keys: &[String]) -> Result<i64, CacheError>;

    /// Atomically adds `delta` to an integer value, creating it at zero if absent.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, CacheError>;

    /// Replaces the value and returns the previous one (`GETSET`). The key loses
    /// any expiration; an absent key reports `CacheError::Nil` after being set.
    async fn get_set(&self, key: &str, value: &str) -> Result<CacheValue, CacheError>;

    /// Reads several keys at once, one slot per key, `None` where a key is absent.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError>;

    async fn hget(&self, key: &str, field: &str) -> Result<CacheValue, CacheError>;

    /// Sets one hash field, returning true if the field is new.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, CacheError>;

    /// All fields of a hash; empty when the key is absent.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, CacheError>;

    async fn hkeys(&self, key: &str) -> Result<Vec<String>, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

const REFRESH_IF_HELD: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// `CacheBackend` over a single Redis endpoint, using an auto-reconnecting
/// multiplexed connection.
#[derive(Clone)]
pub struct RedisCacheBackend {
    conn: ConnectionManager,
    response_timeout: Duration,
    refresh_script: Script,
}

impl RedisCacheBackend {
    pub async fn connect(options: &CacheOptions) -> Result<Self, CacheError> {
        let client = NativeRedisClient::open(options.redis_url())?;
        let conn = tokio::time::timeout(options.connection_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                CacheError::Backend(format!("timed out connecting to {}", options.addr))
            })??;

        info!("Connected to Redis at {} (db {})", options.addr, options.db);

        Ok(Self {
            conn,
            response_timeout: options.response_timeout,
            refresh_script: Script::new(REFRESH_IF_HELD),
        })
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, CacheError> {
        let mut conn = self.conn.clone();
        match tokio::time::timeout(self.response_timeout, cmd.query_async::<_, T>(&mut conn)).await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(CacheError::Backend(format!(
                "no response within {:?}",
                self.response_timeout
            ))),
        }
    }
}

fn millis(ttl: Duration) -> u64 {
    ttl.as_millis().clamp(1, u64::MAX as u128) as u64
}

/// Placeholder kept in a multi-value reply where a key or field is absent.
pub const MISSING: &str = "";

/// Maps a raw Redis reply to a primordial value.
pub(crate) fn cache_value_from_redis(value: RedisValue) -> Result<CacheValue, CacheError> {
    match value {
        RedisValue::Nil => Err(CacheError::Nil),
        RedisValue::Int(i) => Ok(CacheValue::Int(i)),
        RedisValue::Data(bytes) => String::from_utf8(bytes)
            .map(CacheValue::Str)
            .map_err(|_| CacheError::Backend("value is not valid UTF-8".to_string())),
        RedisValue::Status(status) => Ok(CacheValue::Str(status)),
        RedisValue::Okay => Ok(CacheValue::Str("OK".to_string())),
        RedisValue::Bulk(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match cache_value_from_redis(item) {
                    Ok(CacheValue::Str(s)) => out.push(s),
                    Ok(CacheValue::Int(i)) => out.push(i.to_string()),
                    Err(CacheError::Nil) => out.push(MISSING.to_string()),
                    Ok(other) => return Err(CacheError::type_mismatch("string", other)),
                    Err(e) => return Err(e),
                }
            }
            Ok(CacheValue::Array(out))
        }
        #[allow(unreachable_patterns)]
        other => Err(CacheError::Backend(format!(
            "unsupported reply: {:?}",
            other
        ))),
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Result<CacheValue, CacheError> {
        let value: RedisValue = self.query(redis::cmd("GET").arg(key)).await?;
        cache_value_from_redis(value)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let reply: RedisValue = self
            .query(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(millis(ttl)),
            )
            .await?;
        match reply {
            RedisValue::Okay => Ok(true),
            RedisValue::Status(status) => Ok(status.eq_ignore_ascii_case("OK")),
            RedisValue::Nil => Ok(false),
            other => Err(CacheError::Backend(format!(
                "unexpected SET NX reply: {:?}",
                other
            ))),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let updated: i64 = self
            .query(redis::cmd("PEXPIRE").arg(key).arg(millis(ttl)))
            .await?;
        Ok(updated == 1)
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.refresh_script.key(key);
        invocation.arg(value).arg(millis(ttl));
        let updated: i64 = tokio::time::timeout(
            self.response_timeout,
            invocation.invoke_async(&mut conn),
        )
        .await
        .map_err(|_| {
            CacheError::Backend(format!("no response within {:?}", self.response_timeout))
        })??;
        debug!("Scripted refresh of {} returned {}", key, updated);
        Ok(updated == 1)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if !ttl.is_zero() {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: RedisValue = self.query(&cmd).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<i64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("DEL").arg(keys)).await
    }

    async fn exists(&self, keys: &[String]) -> Result<i64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("EXISTS").arg(keys)).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        self.query(redis::cmd("INCRBY").arg(key).arg(delta)).await
    }

    async fn get_set(&self, key: &str, value: &str) -> Result<CacheValue, CacheError> {
        let previous: RedisValue = self
            .query(redis::cmd("GETSET").arg(key).arg(value))
            .await?;
        cache_value_from_redis(previous)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.query(redis::cmd("MGET").arg(keys)).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<CacheValue, CacheError> {
        let value: RedisValue = self.query(redis::cmd("HGET").arg(key).arg(field)).await?;
        cache_value_from_redis(value)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, CacheError> {
        let added: i64 = self
            .query(redis::cmd("HSET").arg(key).arg(field).arg(value))
            .await?;
        Ok(added == 1)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        self.query(redis::cmd("HGETALL").arg(key)).await
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let reply: RedisValue = self.query(redis::cmd("HKEYS").arg(key)).await?;
        match cache_value_from_redis(reply)? {
            CacheValue::Array(fields) => Ok(fields),
            other => Err(CacheError::type_mismatch("array", other)),
        }
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let reply: String = self.query(&redis::cmd("PING")).await?;
        if reply.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(CacheError::Backend(format!("unexpected PING reply: {}", reply)))
        }
    }
}
