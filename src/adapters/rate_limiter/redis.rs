//! Redis-backed sliding-window store for production deployments.
//!
//! Each window is a sorted set of admission entries scored by the Redis
//! server's own millisecond clock. Evict, count, ceiling check and the
//! conditional insert run inside one Lua script, so the check-then-act is a
//! single atomic step no matter how many processes share the store. Using
//! `TIME` inside the script keeps every process on one clock.
//!
//! Upstream ceilings live beside the window at `{window key}:upstream` as a
//! plain counter with a millisecond expiry. Admission decrements it; it is
//! only ever replaced by a lower value.
//!
//! Commands go through a [`ConnectionManager`], which reconnects after the
//! server restarts, and each round trip is bounded by `command_timeout`.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;

use crate::domain::foundation::Timestamp;
use crate::domain::rate_limit::{RateLimitKey, UpstreamCeiling};
use crate::ports::{SlidingWindowStore, StoreError, WindowAdmission, WindowUsage};

/// KEYS: window, ceiling. ARGV: max, window ms, expiry margin ms, entry nonce.
///
/// Returns `{allowed, count, retry_after_ms, ceiling_remaining or -1, now_ms}`.
static ADMIT_SCRIPT: Lazy<redis::Script> = Lazy::new(|| {
    redis::Script::new(
        r#"
        local t = redis.call('TIME')
        local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
        local max = tonumber(ARGV[1])
        local window = tonumber(ARGV[2])

        redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
        local count = redis.call('ZCARD', KEYS[1])

        local ceiling = redis.call('GET', KEYS[2])
        local ceiling_ttl = 0
        if ceiling then
            ceiling = tonumber(ceiling)
            ceiling_ttl = redis.call('PTTL', KEYS[2])
        end

        local full = count >= max
        local capped = ceiling ~= nil and ceiling <= 0

        if not full and not capped then
            redis.call('ZADD', KEYS[1], now, now .. ':' .. ARGV[4])
            redis.call('PEXPIRE', KEYS[1], window + tonumber(ARGV[3]))
            local left = -1
            if ceiling then
                left = redis.call('DECR', KEYS[2])
            end
            return {1, count + 1, 0, left, now}
        end

        local retry = 0
        if full then
            local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
            if oldest[2] then
                retry = tonumber(oldest[2]) + window - now
            end
        end
        if capped and ceiling_ttl > retry then
            retry = ceiling_ttl
        end

        local left = -1
        if ceiling then
            left = ceiling
        end
        return {0, count, retry, left, now}
        "#,
    )
});

/// KEYS: window, ceiling. ARGV: window ms.
///
/// Returns `{count, oldest_ms or -1, ceiling or -1, ceiling_ttl_ms, now_ms}`.
static USAGE_SCRIPT: Lazy<redis::Script> = Lazy::new(|| {
    redis::Script::new(
        r#"
        local t = redis.call('TIME')
        local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
        local floor = '(' .. (now - tonumber(ARGV[1]))

        local count = redis.call('ZCOUNT', KEYS[1], floor, '+inf')
        local oldest = -1
        local first = redis.call('ZRANGEBYSCORE', KEYS[1], floor, '+inf', 'WITHSCORES', 'LIMIT', 0, 1)
        if first[2] then
            oldest = tonumber(first[2])
        end

        local ceiling = -1
        local ttl = 0
        local raw = redis.call('GET', KEYS[2])
        if raw then
            ceiling = tonumber(raw)
            ttl = redis.call('PTTL', KEYS[2])
        end
        return {count, oldest, ceiling, ttl, now}
        "#,
    )
});

/// KEYS: ceiling. ARGV: remaining, ttl ms.
///
/// Returns 1 when the ceiling was installed, 0 when an equal or tighter one
/// is already active.
static TIGHTEN_SCRIPT: Lazy<redis::Script> = Lazy::new(|| {
    redis::Script::new(
        r#"
        local current = redis.call('GET', KEYS[1])
        if current and tonumber(current) <= tonumber(ARGV[1]) then
            return 0
        end
        redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
        return 1
        "#,
    )
});

/// Redis-backed sliding-window store for multi-server deployments.
#[derive(Clone)]
pub struct RedisSlidingWindow {
    conn: ConnectionManager,
    key_ttl_margin: Duration,
    command_timeout: Duration,
}

impl RedisSlidingWindow {
    /// Create a new Redis sliding-window store.
    pub fn new(conn: ConnectionManager, key_ttl_margin: Duration, command_timeout: Duration) -> Self {
        Self {
            conn,
            key_ttl_margin,
            command_timeout,
        }
    }

    async fn run<T>(
        &self,
        command: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, StoreError> {
        bounded(self.command_timeout, command).await
    }
}

async fn bounded<T>(
    limit: Duration,
    command: impl Future<Output = redis::RedisResult<T>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(limit, command).await {
        Ok(reply) => reply.map_err(unavailable),
        Err(_) => Err(StoreError::Unavailable(format!(
            "redis did not reply within {}ms",
            limit.as_millis()
        ))),
    }
}

fn unavailable(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[async_trait]
impl SlidingWindowStore for RedisSlidingWindow {
    async fn admit(
        &self,
        key: &RateLimitKey,
        max_requests: u32,
        window: Duration,
    ) -> Result<WindowAdmission, StoreError> {
        let mut conn = self.conn.clone();

        let mut invocation = ADMIT_SCRIPT.key(key.to_redis_key());
        invocation
            .key(key.ceiling_key())
            .arg(max_requests)
            .arg(millis(window))
            .arg(millis(self.key_ttl_margin))
            .arg(uuid::Uuid::new_v4().simple().to_string());
        let reply: Vec<i64> = self.run(invocation.invoke_async(&mut conn)).await?;

        let [allowed, count, retry_ms, left, now_ms] = reply[..] else {
            return Err(StoreError::InvalidResponse(format!(
                "admit returned {} fields",
                reply.len()
            )));
        };

        Ok(WindowAdmission {
            allowed: allowed == 1,
            count: count.max(0) as u32,
            retry_after: Duration::from_millis(retry_ms.max(0) as u64),
            ceiling_remaining: (left >= 0).then_some(left as u32),
            now: Timestamp::from_unix_millis(now_ms.max(0) as u64),
        })
    }

    async fn usage(&self, key: &RateLimitKey, window: Duration) -> Result<WindowUsage, StoreError> {
        let mut conn = self.conn.clone();

        let mut invocation = USAGE_SCRIPT.key(key.to_redis_key());
        invocation.key(key.ceiling_key()).arg(millis(window));
        let reply: Vec<i64> = self.run(invocation.invoke_async(&mut conn)).await?;

        let [count, oldest_ms, ceiling, ttl_ms, now_ms] = reply[..] else {
            return Err(StoreError::InvalidResponse(format!(
                "usage returned {} fields",
                reply.len()
            )));
        };

        let now = Timestamp::from_unix_millis(now_ms.max(0) as u64);
        Ok(WindowUsage {
            count: count.max(0) as u32,
            oldest: (oldest_ms >= 0).then(|| Timestamp::from_unix_millis(oldest_ms as u64)),
            ceiling: (ceiling >= 0 && ttl_ms > 0).then(|| UpstreamCeiling {
                remaining: ceiling as u32,
                reset_at: now.plus(Duration::from_millis(ttl_ms as u64)),
            }),
            now,
        })
    }

    async fn tighten(&self, key: &RateLimitKey, ceiling: UpstreamCeiling) -> Result<bool, StoreError> {
        let ttl = millis(ceiling.ttl(Timestamp::now()));
        if ttl == 0 {
            return Ok(false);
        }

        let mut conn = self.conn.clone();
        let mut invocation = TIGHTEN_SCRIPT.key(key.ceiling_key());
        invocation.arg(ceiling.remaining).arg(ttl);
        let changed: i64 = self.run(invocation.invoke_async(&mut conn)).await?;

        Ok(changed == 1)
    }

    async fn reset(&self, key: &RateLimitKey) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();

        self.run(conn.del::<_, ()>(vec![key.to_redis_key(), key.ceiling_key()]))
            .await?;

        Ok(())
    }
}

impl std::fmt::Debug for RedisSlidingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSlidingWindow")
            .field("key_ttl_margin", &self.key_ttl_margin)
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    // Scripts are exercised against a live server in tests/redis_sliding_window.rs
    // (ignored by default; run with `cargo test -- --ignored`).
    use super::*;

    #[test]
    fn scripts_have_stable_hashes() {
        assert_eq!(ADMIT_SCRIPT.get_hash().len(), 40);
        assert_ne!(ADMIT_SCRIPT.get_hash(), USAGE_SCRIPT.get_hash());
        assert_ne!(USAGE_SCRIPT.get_hash(), TIGHTEN_SCRIPT.get_hash());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out_as_unavailable() {
        let started = tokio::time::Instant::now();
        let result = bounded(
            Duration::from_millis(250),
            std::future::pending::<redis::RedisResult<i64>>(),
        )
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(started.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn command_errors_map_to_unavailable() {
        let refused = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        let result = bounded(Duration::from_secs(1), async { Err::<i64, _>(refused) }).await;
        assert!(matches!(result, Err(StoreError::Unavailable(msg)) if msg.contains("refused")));
    }

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_secs(2)), 2000);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
