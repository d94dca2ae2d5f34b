//! Tier ceilings.

use std::collections::HashMap;

use super::SubscriptionTier;

/// Monthly request ceiling per tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaPolicy {
    limits: HashMap<SubscriptionTier, u32>,
}

impl QuotaPolicy {
    /// Policy with explicit ceilings.
    pub fn new(basic: u32, pro: u32) -> Self {
        let mut limits = HashMap::new();
        limits.insert(SubscriptionTier::Basic, basic);
        limits.insert(SubscriptionTier::Pro, pro);
        Self { limits }
    }

    /// Ceiling for `tier`.
    pub fn limit_for(&self, tier: SubscriptionTier) -> u32 {
        self.limits
            .get(&tier)
            .copied()
            .unwrap_or_else(|| tier.default_monthly_quota())
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self::new(
            SubscriptionTier::Basic.default_monthly_quota(),
            SubscriptionTier::Pro.default_monthly_quota(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_uses_tier_defaults() {
        let policy = QuotaPolicy::default();
        assert_eq!(policy.limit_for(SubscriptionTier::Basic), 1_000);
        assert_eq!(policy.limit_for(SubscriptionTier::Pro), 10_000);
    }

    #[test]
    fn custom_policy_overrides() {
        let policy = QuotaPolicy::new(5, 50);
        assert_eq!(policy.limit_for(SubscriptionTier::Basic), 5);
        assert_eq!(policy.limit_for(SubscriptionTier::Pro), 50);
    }
}
