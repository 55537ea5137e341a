use crate::domain::{CacheError, Outcome};
use crate::infrastructure::cache_client::CacheClient;
use crate::infrastructure::config::LockConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The lock was free and now belongs to the caller.
    Acquired,
    /// The caller already held the lock and its lease was extended.
    Refreshed,
    /// Someone else holds the lock, or won it during this attempt.
    HeldByOther,
    /// The caller holds the lock but reuse is disabled.
    ReuseDisabled,
    /// The cache could not be read or written.
    BackendUnavailable,
}

impl LockOutcome {
    pub fn is_acquired(self) -> bool {
        matches!(self, LockOutcome::Acquired | LockOutcome::Refreshed)
    }
}

/// Counters for lock attempts
#[derive(Debug, Default)]
pub struct LockMetrics {
    pub attempts: AtomicU64,
    pub acquired: AtomicU64,
    pub refreshed: AtomicU64,
    pub contended: AtomicU64,
    pub reuse_rejected: AtomicU64,
    pub backend_errors: AtomicU64,
}

impl LockMetrics {
    fn record(&self, outcome: LockOutcome) {
        let counter = match outcome {
            LockOutcome::Acquired => &self.acquired,
            LockOutcome::Refreshed => &self.refreshed,
            LockOutcome::HeldByOther => &self.contended,
            LockOutcome::ReuseDisabled => &self.reuse_rejected,
            LockOutcome::BackendUnavailable => &self.backend_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Distributed mutual exclusion on top of a shared cache.
///
/// A lock is a cache key whose value is the holder token. It is created with
/// a set-if-absent carrying the lease as expiry and disappears when the lease
/// runs out; there is no explicit unlock. The manager keeps no per-lock state,
/// so one instance can serve any number of concurrent callers, and instances
/// in different processes coordinate purely through the cache.
pub struct LeaseLock {
    client: Arc<CacheClient>,
    config: LockConfig,
    metrics: Arc<LockMetrics>,
}

impl LeaseLock {
    pub fn new(client: Arc<CacheClient>, config: LockConfig) -> Self {
        Self {
            client,
            config,
            metrics: Arc::new(LockMetrics::default()),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Try once to take or extend the lock `name` for `holder`.
    /// Never waits and never retries; any failure reads as `false`.
    pub async fn lock(&self, name: &str, holder: &str) -> bool {
        self.acquire(name, holder).await.is_acquired()
    }

    /// Same protocol as [`LeaseLock::lock`], reporting why an attempt failed.
    pub async fn acquire(&self, name: &str, holder: &str) -> LockOutcome {
        self.metrics.attempts.fetch_add(1, Ordering::Relaxed);
        let outcome = self.attempt(name, holder).await;
        self.metrics.record(outcome);
        debug!("Lock {} for holder {}: {:?}", name, holder, outcome);
        outcome
    }

    async fn attempt(&self, name: &str, holder: &str) -> LockOutcome {
        let current = self.client.get(name).await;
        match current.error() {
            Some(CacheError::Nil) => return self.claim(name, holder).await,
            Some(err) => {
                warn!("Failed to read lock {}: {}", name, err);
                return LockOutcome::BackendUnavailable;
            }
            None => {}
        }

        if !held_by(&current, holder) {
            return LockOutcome::HeldByOther;
        }
        if !self.config.reuse {
            return LockOutcome::ReuseDisabled;
        }

        if self.config.atomic_refresh {
            self.refresh_atomically(name, holder).await
        } else {
            self.refresh(name, holder).await
        }
    }

    /// Set-if-absent; the cache decides the race between concurrent claimants.
    async fn claim(&self, name: &str, holder: &str) -> LockOutcome {
        let set = self
            .client
            .set_nx(name, holder, self.config.lease_duration)
            .await;
        match set.as_bool() {
            Ok(true) => LockOutcome::Acquired,
            Ok(false) => LockOutcome::HeldByOther,
            Err(err) => {
                warn!("Failed to claim lock {}: {}", name, err);
                LockOutcome::BackendUnavailable
            }
        }
    }

    /// Extend the lease, then read the key back: another claimant may have
    /// taken it if the lease lapsed between the first read and the refresh.
    async fn refresh(&self, name: &str, holder: &str) -> LockOutcome {
        let expire = self
            .client
            .expire(name, self.config.lease_duration)
            .await;
        match expire.as_bool() {
            Ok(true) => {
                let after = self.client.get(name).await;
                if held_by(&after, holder) {
                    LockOutcome::Refreshed
                } else if after.error().map_or(false, |e| !e.is_nil()) {
                    LockOutcome::BackendUnavailable
                } else {
                    LockOutcome::HeldByOther
                }
            }
            Ok(false) => {
                debug!("Lease on {} lapsed before refresh, claiming again", name);
                self.claim(name, holder).await
            }
            Err(err) => self.claim_after_refresh_error(name, holder, &err).await,
        }
    }

    /// The caller held the key a moment ago, so a refused claim here means the
    /// cache could not confirm the refresh, not that someone else won.
    async fn claim_after_refresh_error(
        &self,
        name: &str,
        holder: &str,
        err: &CacheError,
    ) -> LockOutcome {
        debug!("Refresh of {} failed ({}), claiming again", name, err);
        match self.claim(name, holder).await {
            LockOutcome::HeldByOther => {
                warn!("Failed to refresh lock {}: {}", name, err);
                LockOutcome::BackendUnavailable
            }
            outcome => outcome,
        }
    }

    async fn refresh_atomically(&self, name: &str, holder: &str) -> LockOutcome {
        let refreshed = self
            .client
            .expire_if_equals(name, holder, self.config.lease_duration)
            .await;
        match refreshed.as_bool() {
            Ok(true) => LockOutcome::Refreshed,
            Ok(false) => self.claim(name, holder).await,
            Err(err) => self.claim_after_refresh_error(name, holder, &err).await,
        }
    }

    pub fn get_metrics(&self) -> &LockMetrics {
        &self.metrics
    }

    /// Get metrics as JSON for monitoring
    pub fn get_metrics_json(&self) -> serde_json::Value {
        let attempts = self.metrics.attempts.load(Ordering::Relaxed);
        let granted = self.metrics.acquired.load(Ordering::Relaxed)
            + self.metrics.refreshed.load(Ordering::Relaxed);
        let success_rate = if attempts > 0 {
            (granted as f64 / attempts as f64) * 100.0
        } else {
            0.0
        };

        serde_json::json!({
            "attempts": attempts,
            "acquired": self.metrics.acquired.load(Ordering::Relaxed),
            "refreshed": self.metrics.refreshed.load(Ordering::Relaxed),
            "contended": self.metrics.contended.load(Ordering::Relaxed),
            "reuse_rejected": self.metrics.reuse_rejected.load(Ordering::Relaxed),
            "backend_errors": self.metrics.backend_errors.load(Ordering::Relaxed),
            "lease_ms": self.config.lease_duration.as_millis() as u64,
            "reuse": self.config.reuse,
            "success_rate": success_rate
        })
    }
}

fn held_by(outcome: &Outcome, holder: &str) -> bool {
    matches!(outcome.as_string(), Ok(ref stored) if stored == holder)
}
