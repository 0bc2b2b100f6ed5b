//! Domain models for subscription-service.

mod payment;
mod plan;
mod resource;
mod subscription;

pub use payment::{
    CreatePayment, Payment, PaymentKassa, PaymentMethod, PaymentMethodKind, STATUS_SUCCEEDED,
};
pub use plan::{
    BillingInterval, CreatePlan, CreatePrice, CreateQuota, PlanAggregate, Price, Quota,
    SubscriptionPlan, UpdatePlan,
};
pub use resource::{Capability, LocationsCapability, ProtocolsCapability, ResourceType};
pub use subscription::{CreateSubscription, Subscription, SubscriptionStatus};
