//! Billing periods.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Timestamp, ValidationError};

/// Half-open interval `[start, end)` a quota record covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl BillingPeriod {
    /// Creates a period, rejecting empty or inverted intervals.
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, ValidationError> {
        if !start.is_before(&end) {
            return Err(ValidationError::invalid_format(
                "period",
                "start must be before end",
            ));
        }
        Ok(Self { start, end })
    }

    /// The calendar month containing `at`.
    pub fn calendar_month(at: Timestamp) -> Self {
        Self {
            start: at.start_of_month(),
            end: at.start_of_next_month(),
        }
    }

    /// The calendar month that follows this period's end.
    ///
    /// Used on rollover; the new period starts where this one ended.
    pub fn next(&self) -> Self {
        Self {
            start: self.end,
            end: self.end.start_of_next_month(),
        }
    }

    /// Whether `at` falls inside the period.
    pub fn contains(&self, at: Timestamp) -> bool {
        !at.is_before(&self.start) && at.is_before(&self.end)
    }

    /// Whether the period is over at `now`.
    pub fn has_ended(&self, now: Timestamp) -> bool {
        !now.is_before(&self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn at(rfc3339: &str) -> Timestamp {
        Timestamp::from_datetime(
            DateTime::parse_from_rfc3339(rfc3339)
                .unwrap()
                .with_timezone(&Utc),
        )
    }

    #[test]
    fn calendar_month_bounds() {
        let period = BillingPeriod::calendar_month(at("2024-02-15T12:00:00Z"));
        assert_eq!(period.start, at("2024-02-01T00:00:00Z"));
        assert_eq!(period.end, at("2024-03-01T00:00:00Z"));
    }

    #[test]
    fn contains_is_half_open() {
        let period = BillingPeriod::calendar_month(at("2024-02-15T12:00:00Z"));
        assert!(period.contains(at("2024-02-01T00:00:00Z")));
        assert!(period.contains(at("2024-02-29T23:59:59Z")));
        assert!(!period.contains(at("2024-03-01T00:00:00Z")));
        assert!(period.has_ended(at("2024-03-01T00:00:00Z")));
    }

    #[test]
    fn next_follows_mid_month_renewals() {
        let renewal = BillingPeriod::new(at("2024-01-10T00:00:00Z"), at("2024-02-10T00:00:00Z"))
            .unwrap();
        let next = renewal.next();
        assert_eq!(next.start, at("2024-02-10T00:00:00Z"));
        assert_eq!(next.end, at("2024-03-01T00:00:00Z"));
    }

    #[test]
    fn new_rejects_inverted_period() {
        assert!(BillingPeriod::new(at("2024-02-01T00:00:00Z"), at("2024-01-01T00:00:00Z")).is_err());
        assert!(BillingPeriod::new(at("2024-02-01T00:00:00Z"), at("2024-02-01T00:00:00Z")).is_err());
    }
}
