//! Subscription model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription status.
///
/// Cancellation, renewal, and downgrade are represented by the audit
/// timestamps on the row, not by extra enum states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Inactive,
    Active,
    Upgraded,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Inactive => "inactive",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Upgraded => "upgraded",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "upgraded" => SubscriptionStatus::Upgraded,
            _ => SubscriptionStatus::Inactive,
        }
    }
}

/// Subscription.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    /// The payment that originated this subscription, when there was one.
    pub invoice_id: Option<Uuid>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub renewed_at: Option<DateTime<Utc>>,
    pub renewed_subscription_id: Option<Uuid>,
    pub upgraded_at: Option<DateTime<Utc>>,
    pub upgraded_to_plan_id: Option<Uuid>,
    pub downgraded_at: Option<DateTime<Utc>>,
    pub downgraded_to_plan_id: Option<Uuid>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub status: String,
    pub created_utc: DateTime<Utc>,
}

impl Subscription {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_string(&self.status)
    }

    /// Does this row satisfy the one-active-per-customer entitlement check
    /// at `now`?
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status() == SubscriptionStatus::Active
            && self.cancelled_at.is_none()
            && self.deleted_at.is_none()
            && self.ends_at > now
    }
}

/// Input for creating a subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: SubscriptionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn subscription(status: SubscriptionStatus, ends_in: Duration) -> Subscription {
        let now = Utc::now();
        Subscription {
            subscription_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            invoice_id: None,
            starts_at: now - Duration::days(1),
            ends_at: now + ends_in,
            renewed_at: None,
            renewed_subscription_id: None,
            upgraded_at: None,
            upgraded_to_plan_id: None,
            downgraded_at: None,
            downgraded_to_plan_id: None,
            cancelled_at: None,
            deleted_at: None,
            status: status.as_str().to_string(),
            created_utc: now,
        }
    }

    #[test]
    fn cancelled_subscription_is_never_active() {
        let now = Utc::now();
        let mut sub = subscription(SubscriptionStatus::Active, Duration::days(10));
        assert!(sub.is_active_at(now));

        sub.cancelled_at = Some(now);
        assert!(!sub.is_active_at(now));
    }

    #[test]
    fn expired_subscription_is_not_active() {
        let now = Utc::now();
        let sub = subscription(SubscriptionStatus::Active, Duration::seconds(-1));
        assert!(!sub.is_active_at(now));
    }

    #[test]
    fn status_round_trips() {
        for status in [
            SubscriptionStatus::Inactive,
            SubscriptionStatus::Active,
            SubscriptionStatus::Upgraded,
        ] {
            assert_eq!(SubscriptionStatus::from_string(status.as_str()), status);
        }
    }
}
