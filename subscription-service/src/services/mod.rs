//! Services for subscription-service.

pub mod database;
pub mod metrics;
pub mod reconciler;
pub mod yookassa;

pub use database::{Database, ReconcileOutcome};
pub use metrics::{get_metrics, init_metrics, record_payment_event, record_subscription_operation};
pub use reconciler::{PaymentConfirmation, PaymentReconciler};
pub use yookassa::{EventDetails, PaymentIntent, WebhookEvent, YookassaClient};
