//! Windowed atomic counters
//!
//! Counter keys are time-bucketed strings (`tenant:metric:minute:YYYYMMDDhhmm`)
//! so bucket transitions need no sliding-window bookkeeping. Each key's TTL
//! equals its window length and is reapplied on every write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use portable_atomic::{AtomicF64, AtomicI64, Ordering};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Metric tracked per tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Requests,
    Tokens,
    Cost,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Metric::Requests => "requests",
            Metric::Tokens => "tokens",
            Metric::Cost => "cost",
        };
        write!(f, "{s}")
    }
}

/// Time window granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    /// Window length, which doubles as the counter TTL.
    pub fn length(&self) -> Duration {
        match self {
            Window::Minute => Duration::from_secs(60),
            Window::Hour => Duration::from_secs(3600),
            Window::Day => Duration::from_secs(86400),
        }
    }

    /// Time-bucketed suffix for the current moment.
    pub fn bucket(&self, now: DateTime<Utc>) -> String {
        match self {
            Window::Minute => format!("minute:{}", now.format("%Y%m%d%H%M")),
            Window::Hour => format!("hour:{}", now.format("%Y%m%d%H")),
            Window::Day => format!("day:{}", now.format("%Y%m%d")),
        }
    }
}

/// Build the full counter key for `(tenant, metric, window)` at `now`.
pub fn counter_key(tenant_id: &str, metric: Metric, window: Window, now: DateTime<Utc>) -> String {
    format!("{tenant_id}:{metric}:{}", window.bucket(now))
}

/// Atomic counter store. Process-external in production deployments;
/// the in-memory implementation below serves single-node setups and tests.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add `by` to the counter, (re)applying `ttl`, and return
    /// the post-increment value.
    async fn increment(&self, key: &str, by: f64, ttl: Duration) -> Result<f64>;

    /// Current value, or 0 when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<f64>;
}

struct CounterEntry {
    value: AtomicF64,
    /// Expiry as epoch milliseconds
    expires_at_ms: AtomicI64,
}

/// Lock-free in-memory counter store (DashMap + atomic floats)
#[derive(Clone, Default)]
pub struct MemoryCounterStore {
    entries: Arc<DashMap<String, Arc<CounterEntry>>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Drop expired entries. Called opportunistically by the scheduler.
    pub fn purge_expired(&self) -> usize {
        let now = Self::now_ms();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.expires_at_ms.load(Ordering::Relaxed) > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, by: f64, ttl: Duration) -> Result<f64> {
        let now = Self::now_ms();
        let expires = now + ttl.as_millis() as i64;

        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(CounterEntry {
                    value: AtomicF64::new(0.0),
                    expires_at_ms: AtomicI64::new(expires),
                })
            })
            .clone();

        // A key that outlived its window restarts from zero
        if entry.expires_at_ms.load(Ordering::Relaxed) <= now {
            entry.value.store(0.0, Ordering::Relaxed);
        }
        entry.expires_at_ms.store(expires, Ordering::Relaxed);

        Ok(entry.value.fetch_add(by, Ordering::Relaxed) + by)
    }

    async fn get(&self, key: &str) -> Result<f64> {
        let now = Self::now_ms();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.expires_at_ms.load(Ordering::Relaxed) > now)
            .map(|entry| entry.value.load(Ordering::Relaxed))
            .unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn increment_returns_running_total() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::from_secs(60);
        assert_eq!(store.increment("t1:requests:minute:x", 1.0, ttl).await.unwrap(), 1.0);
        assert_eq!(store.increment("t1:requests:minute:x", 1.0, ttl).await.unwrap(), 2.0);
        assert_eq!(store.get("t1:requests:minute:x").await.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn absent_key_reads_zero() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.get("missing").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn expired_key_reads_zero_and_purges() {
        let store = MemoryCounterStore::new();
        store
            .increment("short", 5.0, Duration::from_millis(0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.get("short").await.unwrap(), 0.0);
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn bucket_keys_are_stable_within_window() {
        let now = Utc::now();
        let a = counter_key("t1", Metric::Requests, Window::Hour, now);
        let b = counter_key("t1", Metric::Requests, Window::Hour, now);
        assert_eq!(a, b);
        assert!(a.starts_with("t1:requests:hour:"));
    }
}
