use anyhow::Context;
use cache_lock::infrastructure::logging::init_logging;
use cache_lock::{AppConfig, CacheClient, LeaseLock, LockOutcome};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let _logging = init_logging(Some(config.logging.clone()))?;

    let mut args = std::env::args().skip(1);
    let name = args
        .next()
        .context("usage: cache-lock <lock name> [holder token]")?;
    let holder = args.next().unwrap_or_else(|| Uuid::new_v4().to_string());

    let client = CacheClient::connect(&config.cache)
        .await
        .with_context(|| format!("cannot connect to cache at {}", config.cache.addr))?;
    let lock = LeaseLock::new(Arc::new(client), config.lock.clone());

    info!(
        "Acquiring {} as {} (lease {:?}, reuse {})",
        name, holder, config.lock.lease_duration, config.lock.reuse
    );
    let outcome = lock.acquire(&name, &holder).await;

    println!("{:?} {} {}", outcome, name, holder);
    ensure_acquired(outcome, &name)
}

/// A failed attempt becomes an error returned from `main`, so the logging
/// guard is dropped and the file log flushed before the process exits.
fn ensure_acquired(outcome: LockOutcome, name: &str) -> anyhow::Result<()> {
    if outcome.is_acquired() {
        Ok(())
    } else {
        anyhow::bail!("lock {} not acquired: {:?}", name, outcome)
    }
}
