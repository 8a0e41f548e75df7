//! Rate limiting algorithms.
//!
//! # Responsibilities
//! - Admit or deny a request for a key under a per-second limit
//! - Compose rate-limit keys from client identity and path
//!
//! # Algorithms
//! - `TokenBucket`: one in-process GCRA limiter per key, rate = burst = limit.
//!   A bucket untouched for a full refill period is dropped by [`RateLimiter::sweep`]
//! - `FixedWindow`: store counter per `key + epoch / window`, expires with the window
//! - `SlidingWindow`: single store counter whose TTL is pushed forward on every
//!   admitted request. This approximates a sliding window; it is not a
//!   timestamp log and behaves like a fixed window that restarts after a quiet period.

use async_trait::async_trait;
use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorLimiter};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::store::{CounterStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit must be greater than 0")]
    ZeroLimit,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Admission controller over a per-key counter.
#[async_trait]
pub trait RateLimiter: Send + Sync + std::fmt::Debug {
    /// Returns true if a request for `key` fits under `limit` requests per second
    /// (or per window for the window-based limiters).
    async fn allow(&self, key: &str, limit: u32) -> Result<bool, RateLimitError>;

    async fn reset(&self, key: &str) -> Result<(), RateLimitError>;

    /// Hint for the `Retry-After` header on denial.
    fn retry_after(&self) -> Duration;

    /// Drop per-key state that can no longer change a decision. Returns the
    /// number of keys removed.
    fn sweep(&self) -> usize {
        0
    }
}

/// Closed set of algorithms selectable in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    #[default]
    TokenBucket,
    SlidingWindow,
    FixedWindow,
}

impl RateLimitAlgorithm {
    /// Factory for the configured limiter.
    pub fn build(self, store: Arc<dyn CounterStore>, window: Duration) -> Arc<dyn RateLimiter> {
        match self {
            RateLimitAlgorithm::TokenBucket => Arc::new(TokenBucketLimiter::new()),
            RateLimitAlgorithm::SlidingWindow => Arc::new(SlidingWindowLimiter::new(store, window)),
            RateLimitAlgorithm::FixedWindow => Arc::new(FixedWindowLimiter::new(store, window)),
        }
    }
}

/// Build the limiter key: authenticated users are limited independently of their IP.
pub fn rate_limit_key(client_ip: &str, user_id: Option<&str>, path: &str) -> String {
    match user_id {
        Some(id) if !id.is_empty() => format!("user:{id}:{path}"),
        _ => format!("ip:{client_ip}:{path}"),
    }
}

fn non_zero(limit: u32) -> Result<NonZeroU32, RateLimitError> {
    NonZeroU32::new(limit).ok_or(RateLimitError::ZeroLimit)
}

/// Time for an empty bucket to refill: rate and burst are both `limit` per second.
const REFILL: Duration = Duration::from_secs(1);

struct Bucket {
    limiter: DefaultDirectRateLimiter,
    last_seen_ms: AtomicU64,
}

/// Token bucket per key. Buckets are created lazily through the map's entry API
/// so two racing first requests share one bucket.
pub struct TokenBucketLimiter {
    buckets: DashMap<String, Arc<Bucket>>,
    epoch: Instant,
}

impl Default for TokenBucketLimiter {
    fn default() -> Self {
        Self {
            buckets: DashMap::new(),
            epoch: Instant::now(),
        }
    }
}

impl std::fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("keys", &self.buckets.len())
            .finish()
    }
}

impl TokenBucketLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn allow(&self, key: &str, limit: u32) -> Result<bool, RateLimitError> {
        let limit = non_zero(limit)?;
        let now = self.now_ms();
        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Bucket {
                    limiter: GovernorLimiter::direct(Quota::per_second(limit).allow_burst(limit)),
                    last_seen_ms: AtomicU64::new(now),
                })
            })
            .clone();
        bucket.last_seen_ms.fetch_max(now, Ordering::Relaxed);
        Ok(bucket.limiter.check().is_ok())
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        self.buckets.remove(key);
        Ok(())
    }

    fn retry_after(&self) -> Duration {
        REFILL
    }

    /// A bucket idle for [`REFILL`] is full again, so a fresh one answers the same.
    fn sweep(&self) -> usize {
        let now = self.now_ms();
        let idle_ms = REFILL.as_millis() as u64;
        let before = self.buckets.len();
        self.buckets
            .retain(|_, b| now.saturating_sub(b.last_seen_ms.load(Ordering::Relaxed)) < idle_ms);
        self.buckets.shrink_to_fit();
        before.saturating_sub(self.buckets.len())
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Counter per fixed window, keyed `rate_limit:<key>:<epoch / window>`.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    store: Arc<dyn CounterStore>,
    window: Duration,
}

impl FixedWindowLimiter {
    pub fn new(store: Arc<dyn CounterStore>, window: Duration) -> Self {
        Self {
            store,
            window: window.max(Duration::from_secs(1)),
        }
    }

    fn window_key(&self, key: &str) -> String {
        format!("rate_limit:{key}:{}", epoch_secs() / self.window.as_secs())
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn allow(&self, key: &str, limit: u32) -> Result<bool, RateLimitError> {
        let limit = non_zero(limit)?;
        let window_key = self.window_key(key);
        let count = self.store.incr(&window_key).await?;
        if count == 1 {
            if let Err(e) = self.store.expire(&window_key, self.window).await {
                tracing::warn!(key = %window_key, error = %e, "Failed to set window expiry");
            }
        }
        Ok(count <= i64::from(limit.get()))
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        self.store.del(&self.window_key(key)).await?;
        Ok(())
    }

    fn retry_after(&self) -> Duration {
        self.window
    }
}

/// Approximate sliding window on a single counter, keyed `rate_limit:<key>:count`.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    store: Arc<dyn CounterStore>,
    window: Duration,
}

impl SlidingWindowLimiter {
    pub fn new(store: Arc<dyn CounterStore>, window: Duration) -> Self {
        Self {
            store,
            window: window.max(Duration::from_secs(1)),
        }
    }

    fn counter_key(key: &str) -> String {
        format!("rate_limit:{key}:count")
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn allow(&self, key: &str, limit: u32) -> Result<bool, RateLimitError> {
        let limit = non_zero(limit)?;
        let counter_key = Self::counter_key(key);

        let current = match self.store.get(&counter_key).await? {
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0),
            None => 0,
        };
        if current >= i64::from(limit.get()) {
            return Ok(false);
        }

        self.store.incr(&counter_key).await?;
        self.store.expire(&counter_key, self.window).await?;
        Ok(true)
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        self.store.del(&Self::counter_key(key)).await?;
        Ok(())
    }

    fn retry_after(&self) -> Duration {
        self.window
    }
}
