//! Timestamp value object for immutable points in time.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Immutable point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Checks if this timestamp is before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Checks if this timestamp is after another.
    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// Returns the duration from another timestamp to this one.
    ///
    /// Returns negative duration if other is after self.
    pub fn duration_since(&self, other: &Timestamp) -> Duration {
        self.0.signed_duration_since(other.0)
    }

    /// Time remaining from `now` until this timestamp, zero if already past.
    pub fn saturating_until(&self, now: &Timestamp) -> std::time::Duration {
        self.duration_since(now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }

    /// Creates a timestamp from Unix seconds.
    ///
    /// Out-of-range values clamp to the Unix epoch.
    pub fn from_unix_secs(secs: u64) -> Self {
        i64::try_from(secs)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(Self)
            .unwrap_or(Self(DateTime::default()))
    }

    /// Creates a timestamp from Unix milliseconds.
    pub fn from_unix_millis(millis: u64) -> Self {
        i64::try_from(millis)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .map(Self)
            .unwrap_or(Self(DateTime::default()))
    }

    /// Returns the timestamp as Unix seconds.
    pub fn as_unix_secs(&self) -> u64 {
        self.0.timestamp().max(0) as u64
    }

    /// Returns the timestamp as Unix milliseconds.
    pub fn as_unix_millis(&self) -> u64 {
        self.0.timestamp_millis().max(0) as u64
    }

    /// Creates a new timestamp by adding the specified number of seconds.
    ///
    /// Saturates at the latest representable time.
    pub fn plus_secs(&self, secs: u64) -> Self {
        self.plus(std::time::Duration::from_secs(secs))
    }

    /// Creates a new timestamp by adding a std duration.
    ///
    /// Saturates at the latest representable time.
    pub fn plus(&self, duration: std::time::Duration) -> Self {
        Duration::from_std(duration)
            .ok()
            .and_then(|delta| self.0.checked_add_signed(delta))
            .map(Self)
            .unwrap_or(Self(DateTime::<Utc>::MAX_UTC))
    }

    /// Returns 00:00:00 UTC on the first day of this timestamp's month.
    pub fn start_of_month(&self) -> Self {
        let date = NaiveDate::from_ymd_opt(self.0.year(), self.0.month(), 1)
            .unwrap_or(self.0.date_naive());
        Self(date.and_time(chrono::NaiveTime::MIN).and_utc())
    }

    /// Returns 00:00:00 UTC on the first day of the following month.
    pub fn start_of_next_month(&self) -> Self {
        let (year, month) = if self.0.month() == 12 {
            (self.0.year() + 1, 1)
        } else {
            (self.0.year(), self.0.month() + 1)
        };
        let date = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(self.0.date_naive());
        Self(date.and_time(chrono::NaiveTime::MIN).and_utc())
    }

    /// Formats as RFC 3339 with second precision.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use std::thread::sleep;

    fn at(rfc3339: &str) -> Timestamp {
        Timestamp::from_datetime(
            DateTime::parse_from_rfc3339(rfc3339)
                .unwrap()
                .with_timezone(&Utc),
        )
    }

    #[test]
    fn timestamp_now_creates_current_time() {
        let before = Utc::now();
        let ts = Timestamp::now();
        let after = Utc::now();

        assert!(ts.as_datetime() >= &before);
        assert!(ts.as_datetime() <= &after);
    }

    #[test]
    fn timestamp_ordering_works() {
        let ts1 = Timestamp::now();
        sleep(std::time::Duration::from_millis(10));
        let ts2 = Timestamp::now();

        assert!(ts1 < ts2);
        assert!(ts1.is_before(&ts2));
        assert!(ts2.is_after(&ts1));
    }

    #[test]
    fn timestamp_serializes_to_json() {
        let ts = at("2024-01-15T10:30:00Z");
        let json = serde_json::to_string(&ts).unwrap();
        assert!(json.contains("2024-01-15"));
    }

    #[test]
    fn timestamp_from_unix_secs_works() {
        // 2024-01-15T00:00:00Z
        let ts = Timestamp::from_unix_secs(1705276800);
        assert_eq!(ts.as_datetime().year(), 2024);
        assert_eq!(ts.as_datetime().month(), 1);
        assert_eq!(ts.as_datetime().day(), 15);
        assert_eq!(ts.as_unix_secs(), 1705276800);
    }

    #[test]
    fn timestamp_from_unix_millis_keeps_precision() {
        let ts = Timestamp::from_unix_millis(1_705_276_800_250);
        assert_eq!(ts.as_unix_millis(), 1_705_276_800_250);
        assert_eq!(ts.as_unix_secs(), 1_705_276_800);
    }

    #[test]
    fn timestamp_plus_secs_adds_correctly() {
        let ts1 = Timestamp::from_unix_secs(1000);
        let ts2 = ts1.plus_secs(60);
        assert_eq!(ts2.as_unix_secs(), 1060);
    }

    #[test]
    fn plus_saturates_instead_of_overflowing() {
        let now = Timestamp::from_unix_secs(1_700_000_000);
        let far = now.plus(std::time::Duration::from_secs(100_000_000_000_000));
        assert_eq!(far.as_datetime(), &DateTime::<Utc>::MAX_UTC);
        assert_eq!(now.plus_secs(u64::MAX), far);
        assert!(far.is_after(&now));
    }

    #[test]
    fn out_of_range_unix_values_clamp_to_epoch() {
        assert_eq!(Timestamp::from_unix_secs(u64::MAX).as_unix_secs(), 0);
        assert_eq!(Timestamp::from_unix_millis(u64::MAX).as_unix_millis(), 0);
    }

    #[test]
    fn saturating_until_is_zero_for_past() {
        let now = Timestamp::from_unix_secs(2000);
        let past = Timestamp::from_unix_secs(1000);
        assert_eq!(past.saturating_until(&now), std::time::Duration::ZERO);
        assert_eq!(
            now.plus_secs(30).saturating_until(&now),
            std::time::Duration::from_secs(30)
        );
    }

    #[test]
    fn start_of_month_truncates() {
        let ts = at("2024-03-17T13:45:10Z");
        let start = ts.start_of_month();
        assert_eq!(start, at("2024-03-01T00:00:00Z"));
        assert_eq!(start.as_datetime().hour(), 0);
    }

    #[test]
    fn start_of_next_month_wraps_year() {
        assert_eq!(
            at("2024-12-31T23:59:59Z").start_of_next_month(),
            at("2025-01-01T00:00:00Z")
        );
        assert_eq!(
            at("2024-02-10T08:00:00Z").start_of_next_month(),
            at("2024-03-01T00:00:00Z")
        );
    }

    #[test]
    fn rfc3339_uses_zulu_seconds() {
        assert_eq!(at("2024-05-01T00:00:00Z").to_rfc3339(), "2024-05-01T00:00:00Z");
    }
}
