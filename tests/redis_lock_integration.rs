//! Runs the lock protocol against a real Redis reached through the usual
//! `CACHE_*` variables (`CACHE_ADDR`, `CACHE_DB`, ...). Ignored by default:
//! `cargo test --test redis_lock_integration -- --ignored`

use ::cache_lock::{AppConfig, CacheClient, LeaseLock, LockConfig, LockOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

async fn setup_test_client() -> Result<Arc<CacheClient>, Box<dyn std::error::Error>> {
    let mut config = AppConfig::from_env()?;
    // Fresh namespace per run so leftovers from other runs never interfere.
    config.cache.namespace = format!("it-{}", Uuid::new_v4());
    let client = CacheClient::connect(&config.cache).await?;
    Ok(Arc::new(client))
}

#[tokio::test]
#[ignore]
async fn test_redis_lease_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
    let client = setup_test_client().await?;
    assert!(client.ping().await);

    let lock = LeaseLock::new(
        client.clone(),
        LockConfig {
            lease_duration: Duration::from_millis(800),
            reuse: true,
            atomic_refresh: false,
        },
    );

    assert_eq!(lock.acquire("job1", "workerA").await, LockOutcome::Acquired);
    assert_eq!(lock.acquire("job1", "workerB").await, LockOutcome::HeldByOther);
    assert_eq!(lock.acquire("job1", "workerA").await, LockOutcome::Refreshed);

    sleep(Duration::from_millis(1200)).await;
    assert_eq!(lock.acquire("job1", "workerB").await, LockOutcome::Acquired);

    client.del(&["job1"]).await;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_redis_scripted_refresh() -> Result<(), Box<dyn std::error::Error>> {
    let client = setup_test_client().await?;
    let lock = LeaseLock::new(
        client.clone(),
        LockConfig {
            lease_duration: Duration::from_secs(2),
            reuse: true,
            atomic_refresh: true,
        },
    );

    assert!(lock.lock("job2", "x").await);
    assert_eq!(lock.acquire("job2", "x").await, LockOutcome::Refreshed);
    assert!(!lock.lock("job2", "y").await);

    client.del(&["job2"]).await;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_redis_outcome_coercion() -> Result<(), Box<dyn std::error::Error>> {
    let client = setup_test_client().await?;

    client.set("n", 41i64, Duration::from_secs(5)).await;
    assert_eq!(client.incr_by("n", 1).await.as_i64()?, 42);
    assert_eq!(client.get("n").await.as_i64()?, 42);
    assert!(client.get("absent").await.is_nil());

    client.del(&["n"]).await;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_redis_hash_and_multi_key_commands() -> Result<(), Box<dyn std::error::Error>> {
    let client = setup_test_client().await?;

    assert!(client.hset("profile", "region", "eu").await.as_bool()?);
    assert!(!client.hset("profile", "region", "us").await.as_bool()?);
    assert_eq!(client.hget("profile", "region").await.as_string()?, "us");
    assert_eq!(client.hkeys("profile").await.as_array()?, vec!["region".to_string()]);
    assert_eq!(client.hgetall("profile").await.as_map()?["region"], "us");

    client.set("a", "1", Duration::from_secs(5)).await;
    assert_eq!(
        client.mget(&["a", "missing"]).await.as_array()?,
        vec!["1".to_string(), String::new()]
    );
    assert_eq!(client.get_set("a", "2").await.as_i64()?, 1);

    client.del(&["profile", "a"]).await;
    Ok(())
}
