//! In-memory sliding-window store for testing and single-process deployments.
//!
//! Entries are kept per key as a queue of monotonic instants. A single write
//! lock covers evict, count and insert, which makes `admit` atomic within the
//! process. Not suitable for multi-server deployments.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::domain::foundation::Timestamp;
use crate::domain::rate_limit::{RateLimitKey, UpstreamCeiling};
use crate::ports::{SlidingWindowStore, StoreError, WindowAdmission, WindowUsage};

/// Idle keys are swept once the map grows past this size.
const SWEEP_THRESHOLD: usize = 1024;

/// In-memory sliding-window store.
///
/// Uses `tokio::time::Instant` so tests can drive the clock with
/// `tokio::time::pause` / `advance`.
#[derive(Debug, Clone)]
pub struct InMemorySlidingWindow {
    /// Per-key window state.
    windows: Arc<RwLock<HashMap<String, WindowState>>>,
    /// Extra lifetime past the window before an idle key is dropped.
    key_ttl_margin: Duration,
    /// Wall-clock anchor for converting instants to timestamps.
    anchor: (Instant, Timestamp),
}

#[derive(Debug, Default)]
struct WindowState {
    entries: VecDeque<Instant>,
    ceiling: Option<CeilingState>,
    expires_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
struct CeilingState {
    remaining: u32,
    expires_at: Instant,
}

impl WindowState {
    fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.entries.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.entries.pop_front();
            } else {
                break;
            }
        }
        if matches!(self.ceiling, Some(c) if c.expires_at <= now) {
            self.ceiling = None;
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        let window_expired = self.expires_at.map_or(true, |at| at <= now);
        window_expired && self.ceiling.map_or(true, |c| c.expires_at <= now)
    }
}

impl InMemorySlidingWindow {
    /// Creates an empty store with the given idle-key margin.
    pub fn new(key_ttl_margin: Duration) -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            key_ttl_margin,
            anchor: (Instant::now(), Timestamp::now()),
        }
    }

    /// Number of keys currently held (including idle ones not yet swept).
    pub async fn key_count(&self) -> usize {
        self.windows.read().await.len()
    }

    fn timestamp_at(&self, instant: Instant) -> Timestamp {
        let (base_instant, base_wall) = self.anchor;
        base_wall.plus(instant.saturating_duration_since(base_instant))
    }
}

impl Default for InMemorySlidingWindow {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl SlidingWindowStore for InMemorySlidingWindow {
    async fn admit(
        &self,
        key: &RateLimitKey,
        max_requests: u32,
        window: Duration,
    ) -> Result<WindowAdmission, StoreError> {
        let now = Instant::now();
        let mut windows = self.windows.write().await;

        if windows.len() > SWEEP_THRESHOLD {
            windows.retain(|_, state| !state.is_idle(now));
        }

        let state = windows.entry(key.to_redis_key()).or_default();
        state.evict(now, window);

        let count = state.entries.len() as u32;
        let window_full = count >= max_requests;
        let ceiling_exhausted = matches!(state.ceiling, Some(c) if c.remaining == 0);

        if !window_full && !ceiling_exhausted {
            state.entries.push_back(now);
            state.expires_at = Some(now + window + self.key_ttl_margin);
            let ceiling_remaining = state.ceiling.as_mut().map(|c| {
                c.remaining -= 1;
                c.remaining
            });
            return Ok(WindowAdmission {
                allowed: true,
                count: count + 1,
                retry_after: Duration::ZERO,
                ceiling_remaining,
                now: self.timestamp_at(now),
            });
        }

        let mut retry_after = Duration::ZERO;
        if window_full {
            if let Some(oldest) = state.entries.front() {
                retry_after = (*oldest + window).saturating_duration_since(now);
            }
        }
        if let Some(ceiling) = state.ceiling.filter(|c| c.remaining == 0) {
            retry_after = retry_after.max(ceiling.expires_at.saturating_duration_since(now));
        }

        Ok(WindowAdmission {
            allowed: false,
            count,
            retry_after,
            ceiling_remaining: state.ceiling.map(|c| c.remaining),
            now: self.timestamp_at(now),
        })
    }

    async fn usage(&self, key: &RateLimitKey, window: Duration) -> Result<WindowUsage, StoreError> {
        let now = Instant::now();
        let windows = self.windows.read().await;
        let wall_now = self.timestamp_at(now);

        let Some(state) = windows.get(&key.to_redis_key()) else {
            return Ok(WindowUsage {
                count: 0,
                oldest: None,
                ceiling: None,
                now: wall_now,
            });
        };

        let live: Vec<Instant> = state
            .entries
            .iter()
            .copied()
            .filter(|at| now.saturating_duration_since(*at) < window)
            .collect();
        let ceiling = state
            .ceiling
            .filter(|c| c.expires_at > now)
            .map(|c| UpstreamCeiling {
                remaining: c.remaining,
                reset_at: self.timestamp_at(c.expires_at),
            });

        Ok(WindowUsage {
            count: live.len() as u32,
            oldest: live.first().map(|at| self.timestamp_at(*at)),
            ceiling,
            now: wall_now,
        })
    }

    async fn tighten(&self, key: &RateLimitKey, ceiling: UpstreamCeiling) -> Result<bool, StoreError> {
        // Provider resets are wall-clock times, so measure them on the wall clock.
        let now = Instant::now();
        let ttl = ceiling.ttl(Timestamp::now());
        if ttl.is_zero() {
            return Ok(false);
        }

        let mut windows = self.windows.write().await;
        let state = windows.entry(key.to_redis_key()).or_default();

        if let Some(current) = state.ceiling.filter(|c| c.expires_at > now) {
            if current.remaining <= ceiling.remaining {
                return Ok(false);
            }
        }

        state.ceiling = Some(CeilingState {
            remaining: ceiling.remaining,
            expires_at: now + ttl,
        });
        Ok(true)
    }

    async fn reset(&self, key: &RateLimitKey) -> Result<(), StoreError> {
        let mut windows = self.windows.write().await;
        windows.remove(&key.to_redis_key());
        Ok(())
    }
}
