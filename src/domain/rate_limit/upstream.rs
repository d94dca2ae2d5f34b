//! Provider-reported rate limit metadata.
//!
//! Providers describe their own accounting in response headers. The formats
//! recognised here:
//!
//! - Social API: `x-rate-limit-limit`, `x-rate-limit-remaining`,
//!   `x-rate-limit-reset` (Unix seconds)
//! - Model API: `anthropic-ratelimit-requests-limit`,
//!   `anthropic-ratelimit-requests-remaining`,
//!   `anthropic-ratelimit-requests-reset` (RFC 3339)
//! - Generic: `x-ratelimit-limit`, `x-ratelimit-remaining`,
//!   `x-ratelimit-reset` (Unix seconds, or seconds from now when small)
//! - `retry-after` (delay seconds or HTTP date)

use chrono::{DateTime, Utc};
use http::HeaderMap;
use std::time::Duration;

use crate::domain::foundation::Timestamp;

/// Values below this are treated as relative seconds rather than Unix time.
const RELATIVE_RESET_CUTOFF: u64 = 1_000_000_000;

/// Longest `retry-after` honoured; larger values are clamped.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(86_400);

/// Rate limit state as the provider reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRateLimit {
    /// Provider's limit for the current window.
    pub limit: Option<u32>,
    /// Requests the provider will still accept.
    pub remaining: Option<u32>,
    /// When the provider's window resets.
    pub reset_at: Option<Timestamp>,
    /// Explicit wait requested by the provider.
    pub retry_after: Option<Duration>,
}

impl ProviderRateLimit {
    /// Parses known rate limit headers. Returns `None` when none are present.
    pub fn from_headers(headers: &HeaderMap, now: Timestamp) -> Option<Self> {
        let families: [(&str, &str, &str); 3] = [
            (
                "x-rate-limit-limit",
                "x-rate-limit-remaining",
                "x-rate-limit-reset",
            ),
            (
                "anthropic-ratelimit-requests-limit",
                "anthropic-ratelimit-requests-remaining",
                "anthropic-ratelimit-requests-reset",
            ),
            (
                "x-ratelimit-limit",
                "x-ratelimit-remaining",
                "x-ratelimit-reset",
            ),
        ];

        let mut parsed = ProviderRateLimit::default();
        for (limit, remaining, reset) in families {
            if headers.contains_key(remaining) || headers.contains_key(limit) {
                parsed.limit = header_str(headers, limit).and_then(|v| v.parse().ok());
                parsed.remaining = header_str(headers, remaining).and_then(|v| v.parse().ok());
                parsed.reset_at = header_str(headers, reset).and_then(|v| parse_reset(v, now));
                break;
            }
        }
        parsed.retry_after =
            header_str(headers, "retry-after").and_then(|v| parse_retry_after(v, now));

        if parsed == ProviderRateLimit::default() {
            None
        } else {
            Some(parsed)
        }
    }

    /// A ceiling to install locally, if the provider reported enough to build one.
    ///
    /// Without a reset time the ceiling would never lift, so none is produced.
    pub fn ceiling(&self, now: Timestamp) -> Option<UpstreamCeiling> {
        let remaining = self.remaining?;
        let reset_at = self
            .reset_at
            .or_else(|| self.retry_after.map(|wait| now.plus(wait)))?;
        if !reset_at.is_after(&now) {
            return None;
        }
        Some(UpstreamCeiling {
            remaining,
            reset_at,
        })
    }
}

/// Provider-imposed cap on a local window, valid until `reset_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamCeiling {
    /// Admissions still allowed before `reset_at`.
    pub remaining: u32,
    /// When the ceiling lifts.
    pub reset_at: Timestamp,
}

impl UpstreamCeiling {
    /// Returns a copy whose reset is no later than `latest`.
    pub fn capped_at(self, latest: Timestamp) -> Self {
        Self {
            remaining: self.remaining,
            reset_at: self.reset_at.min(latest),
        }
    }

    /// Time until the ceiling lifts.
    pub fn ttl(&self, now: Timestamp) -> Duration {
        self.reset_at.saturating_until(&now)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_reset(value: &str, now: Timestamp) -> Option<Timestamp> {
    if let Ok(secs) = value.parse::<u64>() {
        return Some(if secs < RELATIVE_RESET_CUTOFF {
            now.plus_secs(secs)
        } else {
            Timestamp::from_unix_secs(secs)
        });
    }
    if let Ok(secs) = value.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 && secs < RELATIVE_RESET_CUTOFF as f64 {
            return Some(now.plus(Duration::from_secs_f64(secs)));
        }
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| Timestamp::from_datetime(dt.with_timezone(&Utc)))
}

fn parse_retry_after(value: &str, now: Timestamp) -> Option<Duration> {
    let wait = match value.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => DateTime::parse_from_rfc2822(value)
            .ok()
            .map(|dt| Timestamp::from_datetime(dt.with_timezone(&Utc)).saturating_until(&now))?,
    };
    Some(wait.min(MAX_RETRY_AFTER))
}
