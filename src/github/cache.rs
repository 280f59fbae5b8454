//! Read-through caches for short lived tokens.
//!
//! A cached value is served while it is more than a minute away from expiring and,
//! for rate limited caches, at most [MAX_RATE] times. Lookups are lock free; misses
//! serialize on a per-cache mutex and re-check before fetching.
use crate::metrics::Metrics;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

pub const MAX_RATE: u32 = 60;
pub const EXPIRY_MARGIN_SECS: i64 = 60;

struct Entry<T> {
    value: T,
    expires_at: DateTime<Utc>,
    uses: AtomicU32,
}

impl<T: Clone> Entry<T> {
    fn acquire(&self, now: DateTime<Utc>, max_rate: Option<u32>) -> Option<T> {
        if self.expires_at <= now + Duration::seconds(EXPIRY_MARGIN_SECS) {
            return None;
        }
        if let Some(max_rate) = max_rate {
            if self.uses.fetch_add(1, Ordering::SeqCst) >= max_rate {
                return None;
            }
        }
        Some(self.value.clone())
    }
}

pub struct TokenCache<T> {
    kind: &'static str,
    max_rate: Option<u32>,
    entries: DashMap<String, Arc<Entry<T>>>,
    refresh: Mutex<()>,
    metrics: Arc<Metrics>,
}

impl<T: Clone> TokenCache<T> {
    pub fn new(kind: &'static str, metrics: Arc<Metrics>) -> Self {
        Self::with_max_rate(kind, Some(MAX_RATE), metrics)
    }

    /// Entries live until they expire, however many times they are read.
    pub fn unlimited(kind: &'static str, metrics: Arc<Metrics>) -> Self {
        Self::with_max_rate(kind, None, metrics)
    }

    fn with_max_rate(kind: &'static str, max_rate: Option<u32>, metrics: Arc<Metrics>) -> Self {
        Self {
            kind,
            max_rate,
            entries: DashMap::new(),
            refresh: Mutex::new(()),
            metrics,
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let entry = self.entries.get(key).map(|entry| entry.value().clone())?;
        entry.acquire(Utc::now(), self.max_rate)
    }

    /// Returns the cached value or stores the one produced by `fetch` with its expiry.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(T, DateTime<Utc>), E>>,
    {
        if let Some(value) = self.get(key) {
            self.metrics.cache_hit(self.kind);
            return Ok(value);
        }

        let _guard = self.refresh.lock().await;
        if let Some(value) = self.get(key) {
            self.metrics.cache_hit(self.kind);
            return Ok(value);
        }

        self.metrics.cache_miss(self.kind);
        trace!(kind = self.kind, %key, "fetching");
        let (value, expires_at) = fetch().await?;
        self.entries.insert(
            key.to_string(),
            Arc::new(Entry {
                value: value.clone(),
                expires_at,
                uses: AtomicU32::new(1),
            }),
        );
        Ok(value)
    }
}
