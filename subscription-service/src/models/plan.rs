//! Subscription plan model and the plan aggregate.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::{Capability, ResourceType};

/// Billing interval for plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingInterval {
    Month,
    HalfYear,
    Year,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Month => "MONTH",
            BillingInterval::HalfYear => "HALF_YEAR",
            BillingInterval::Year => "YEAR",
        }
    }

    /// Strict parse for write paths.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MONTH" => Some(BillingInterval::Month),
            "HALF_YEAR" => Some(BillingInterval::HalfYear),
            "YEAR" => Some(BillingInterval::Year),
            _ => None,
        }
    }

    /// Lenient parse for stored values.
    pub fn from_string(s: &str) -> Self {
        Self::parse(s).unwrap_or(BillingInterval::Month)
    }

    /// Fixed calendar-duration approximation: 30, 182, and 365 days.
    /// Shared by subscription creation and extension so both agree on what
    /// one interval is worth.
    pub fn duration(&self) -> Duration {
        match self {
            BillingInterval::Month => Duration::days(30),
            BillingInterval::HalfYear => Duration::days(182),
            BillingInterval::Year => Duration::days(365),
        }
    }
}

/// Subscription plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionPlan {
    pub plan_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub billing_interval: String,
    pub is_active: bool,
    pub has_trial: bool,
    pub trial_discount: Option<f64>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl SubscriptionPlan {
    pub fn interval(&self) -> BillingInterval {
        BillingInterval::from_string(&self.billing_interval)
    }
}

/// Per-plan limit plus a constraint map for one resource type.
/// At most one quota per (plan, resource type).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Quota {
    pub quota_id: Uuid,
    pub plan_id: Uuid,
    pub resource_type: String,
    pub resource_limit: Option<i32>,
    pub constraints: serde_json::Value,
}

/// Plan price in one currency. At most one price per (plan, currency);
/// immutable once referenced by a completed payment.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Price {
    pub price_id: Uuid,
    pub plan_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub billing_interval: String,
}

/// Input for creating a plan.
#[derive(Debug, Clone)]
pub struct CreatePlan {
    pub name: String,
    pub description: Option<String>,
    pub billing_interval: BillingInterval,
    pub is_active: bool,
    pub has_trial: bool,
    pub trial_discount: Option<f64>,
}

/// Input for updating a plan.
#[derive(Debug, Clone, Default)]
pub struct UpdatePlan {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub has_trial: Option<bool>,
    pub trial_discount: Option<f64>,
}

/// Input for adding a quota to a plan.
#[derive(Debug, Clone)]
pub struct CreateQuota {
    pub resource_type: ResourceType,
    pub resource_limit: Option<i32>,
    pub constraints: serde_json::Value,
}

/// Input for adding a price to a plan.
#[derive(Debug, Clone)]
pub struct CreatePrice {
    pub amount: Decimal,
    pub currency: String,
    pub billing_interval: BillingInterval,
}

/// A plan together with its quotas and prices.
///
/// Answers "what does this plan grant" and "what does this plan cost"
/// without leaking row shape to callers.
#[derive(Debug, Clone, Serialize)]
pub struct PlanAggregate {
    pub plan: SubscriptionPlan,
    pub quotas: Vec<Quota>,
    pub prices: Vec<Price>,
}

impl PlanAggregate {
    /// What does this plan grant for `resource_type`?
    ///
    /// `None` means the plan does not grant or restrict the resource at all,
    /// an expected outcome distinct from a malformed quota.
    pub fn resolve_quota(&self, resource_type: ResourceType) -> Option<Capability> {
        self.quotas
            .iter()
            .find(|q| q.resource_type == resource_type.as_str())
            .map(|quota| resource_type.project(quota))
    }

    /// What does this plan cost in `currency` for `interval`?
    pub fn resolve_price(&self, currency: &str, interval: BillingInterval) -> Option<&Price> {
        self.prices
            .iter()
            .find(|p| p.currency == currency && p.billing_interval == interval.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_plan() -> SubscriptionPlan {
        SubscriptionPlan {
            plan_id: Uuid::new_v4(),
            name: "Premium".to_string(),
            description: None,
            billing_interval: "MONTH".to_string(),
            is_active: true,
            has_trial: false,
            trial_discount: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    fn test_aggregate() -> PlanAggregate {
        let plan = test_plan();
        let quotas = vec![Quota {
            quota_id: Uuid::new_v4(),
            plan_id: plan.plan_id,
            resource_type: "PROTOCOLS_COUNT".to_string(),
            resource_limit: Some(2),
            constraints: json!({
                "SIMULTANEOUS_USE": true,
                "USE_VLESS": true,
                "USE_OUTLINE": true,
                "USE_WIREGUARD": false
            }),
        }];
        let prices = vec![Price {
            price_id: Uuid::new_v4(),
            plan_id: plan.plan_id,
            amount: Decimal::new(999, 2),
            currency: "RUB".to_string(),
            billing_interval: "MONTH".to_string(),
        }];
        PlanAggregate { plan, quotas, prices }
    }

    #[test]
    fn interval_durations_are_fixed() {
        assert_eq!(BillingInterval::Month.duration(), Duration::days(30));
        assert_eq!(BillingInterval::HalfYear.duration(), Duration::days(182));
        assert_eq!(BillingInterval::Year.duration(), Duration::days(365));
    }

    #[test]
    fn resolve_quota_projects_configured_resource() {
        let aggregate = test_aggregate();

        let capability = aggregate
            .resolve_quota(ResourceType::ProtocolsCount)
            .expect("protocols quota is configured");
        let Capability::Protocols(protocols) = capability else {
            panic!("expected a protocols capability");
        };
        assert_eq!(
            protocols.available_protocols().unwrap(),
            vec!["vless", "outline"]
        );
    }

    #[test]
    fn unconfigured_resource_resolves_to_none() {
        let aggregate = test_aggregate();
        assert!(aggregate.resolve_quota(ResourceType::LocationsCount).is_none());
    }

    #[test]
    fn resolve_price_matches_currency_and_interval() {
        let aggregate = test_aggregate();

        let price = aggregate
            .resolve_price("RUB", BillingInterval::Month)
            .expect("RUB monthly price exists");
        assert_eq!(price.amount, Decimal::new(999, 2));

        assert!(aggregate.resolve_price("USD", BillingInterval::Month).is_none());
        assert!(aggregate.resolve_price("RUB", BillingInterval::Year).is_none());
    }
}
