//! Subscription quota domain.
//!
//! Calendar-period usage records checked against the ceiling a tier implies.

mod decision;
mod period;
mod policy;
mod record;
mod tier;

pub use decision::{QuotaDecision, QuotaDenial};
pub use period::BillingPeriod;
pub use policy::QuotaPolicy;
pub use record::QuotaRecord;
pub use tier::SubscriptionTier;
