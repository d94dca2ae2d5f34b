//! Subscription tier definitions.
//!
//! Tiers are assigned by the billing system. This crate only enforces the
//! ceiling a tier implies.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::foundation::ValidationError;

/// Subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    /// Entry tier, 1,000 billable requests per month by default.
    Basic,
    /// Professional tier, 10,000 billable requests per month by default.
    Pro,
}

impl SubscriptionTier {
    /// Returns the display name for this tier.
    pub fn display_name(&self) -> &'static str {
        match self {
            SubscriptionTier::Basic => "Basic",
            SubscriptionTier::Pro => "Pro",
        }
    }

    /// Returns the storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Basic => "basic",
            SubscriptionTier::Pro => "pro",
        }
    }

    /// Default monthly request ceiling.
    pub fn default_monthly_quota(&self) -> u32 {
        match self {
            SubscriptionTier::Basic => 1_000,
            SubscriptionTier::Pro => 10_000,
        }
    }

    /// Model-inference service that callers on this tier are metered against.
    pub fn inference_service(&self) -> &'static str {
        match self {
            SubscriptionTier::Basic => "model-inference",
            SubscriptionTier::Pro => "model-inference-pro",
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for SubscriptionTier {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(SubscriptionTier::Basic),
            "pro" => Ok(SubscriptionTier::Pro),
            other => Err(ValidationError::invalid_format(
                "tier",
                format!("unknown tier '{}'", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_quotas_match_pricing() {
        assert_eq!(SubscriptionTier::Basic.default_monthly_quota(), 1_000);
        assert_eq!(SubscriptionTier::Pro.default_monthly_quota(), 10_000);
    }

    #[test]
    fn tier_serializes_lowercase() {
        let json = serde_json::to_string(&SubscriptionTier::Pro).unwrap();
        assert_eq!(json, "\"pro\"");
    }

    #[test]
    fn tier_parses_case_insensitively() {
        assert_eq!("PRO".parse::<SubscriptionTier>().unwrap(), SubscriptionTier::Pro);
        assert_eq!("basic".parse::<SubscriptionTier>().unwrap(), SubscriptionTier::Basic);
        assert!("enterprise".parse::<SubscriptionTier>().is_err());
    }

    #[test]
    fn pro_uses_higher_inference_limit() {
        assert_eq!(SubscriptionTier::Pro.inference_service(), "model-inference-pro");
    }
}
