//! Subscription quota configuration

use serde::Deserialize;
use std::time::Duration;

use crate::domain::quota::{QuotaPolicy, SubscriptionTier};

use super::error::ValidationError;

/// Tier ceilings and outage behavior
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Monthly requests for the basic tier
    #[serde(default = "default_basic_limit")]
    pub basic_monthly_limit: u32,

    /// Monthly requests for the pro tier
    #[serde(default = "default_pro_limit")]
    pub pro_monthly_limit: u32,

    /// How long a tenant seen within quota keeps being admitted while the
    /// quota store is down. Zero fails closed immediately.
    #[serde(default)]
    pub outage_grace_secs: u64,
}

impl QuotaConfig {
    pub fn policy(&self) -> QuotaPolicy {
        QuotaPolicy::new(self.basic_monthly_limit, self.pro_monthly_limit)
    }

    pub fn outage_grace(&self) -> Duration {
        Duration::from_secs(self.outage_grace_secs)
    }

    /// Validate quota configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.basic_monthly_limit == 0 || self.pro_monthly_limit == 0 {
            return Err(ValidationError::InvalidQuotaLimit);
        }
        if self.outage_grace_secs > 3600 {
            return Err(ValidationError::OutageGraceTooLong);
        }
        Ok(())
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            basic_monthly_limit: default_basic_limit(),
            pro_monthly_limit: default_pro_limit(),
            outage_grace_secs: 0,
        }
    }
}

fn default_basic_limit() -> u32 {
    SubscriptionTier::Basic.default_monthly_quota()
}

fn default_pro_limit() -> u32 {
    SubscriptionTier::Pro.default_monthly_quota()
}
