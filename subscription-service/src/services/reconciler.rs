//! Payment reconciler.
//!
//! Sits between the YooKassa gateway and the database: requests remote
//! payment intents and turns delivered gateway events into local state.

use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{CreatePayment, PaymentKassa, PaymentMethodKind};
use crate::services::database::{Database, ReconcileOutcome};
use crate::services::metrics::record_payment_event;
use crate::services::yookassa::{EventDetails, WebhookEvent, YookassaClient};

/// Outcome of requesting a payment: the local record plus what the client
/// needs to complete the payment.
#[derive(Debug, Serialize)]
pub struct PaymentConfirmation {
    pub payment_id: Uuid,
    pub transaction_id: String,
    pub confirmation_url: Option<String>,
    pub status: String,
}

#[derive(Clone)]
pub struct PaymentReconciler {
    db: Database,
    gateway: YookassaClient,
    return_url: String,
}

impl PaymentReconciler {
    pub fn new(db: Database, gateway: YookassaClient, return_url: String) -> Self {
        Self {
            db,
            gateway,
            return_url,
        }
    }

    /// Request a payment for a plan: create the remote intent first, then
    /// record it locally under the gateway-assigned transaction id.
    ///
    /// The intent carries a fresh idempotency key, so a retried request is a
    /// new logical attempt with its own remote intent.
    #[instrument(skip(self), fields(user_id = %user_id, plan_id = %plan_id))]
    pub async fn request_payment(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        currency: &str,
    ) -> Result<PaymentConfirmation, AppError> {
        let aggregate = self
            .db
            .get_plan_aggregate(plan_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "subscription plan {} does not exist",
                    plan_id
                ))
            })?;

        if !aggregate.plan.is_active {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "plan {} is not open for purchase",
                plan_id
            )));
        }

        let interval = aggregate.plan.interval();
        let price = aggregate.resolve_price(currency, interval).ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "plan {} has no {} price for its billing interval",
                plan_id,
                currency
            ))
        })?;
        let amount: Decimal = price.amount;

        let description = format!("Subscription: {}", aggregate.plan.name);
        let intent = self
            .gateway
            .create_intent(
                amount,
                currency,
                &description,
                &self.return_url,
                user_id,
                plan_id,
                Uuid::new_v4(),
            )
            .await?;

        let metadata = serde_json::json!({
            "yookassa_id": intent.id,
            "confirmation_url": intent.confirmation_url(),
        });

        let payment = self
            .db
            .create_payment(&CreatePayment {
                user_id,
                amount,
                currency: currency.to_string(),
                plan_id,
                method: PaymentMethodKind::RuDebitCard,
                kassa: PaymentKassa::Yookassa,
                transaction_id: Some(intent.id.clone()),
                status: intent.status.clone(),
                metadata: Some(metadata),
            })
            .await?;

        info!(
            payment_id = %payment.payment_id,
            transaction_id = %intent.id,
            "Payment requested"
        );

        Ok(PaymentConfirmation {
            payment_id: payment.payment_id,
            confirmation_url: intent
                .confirmation_url()
                .map(|url| url.to_string()),
            transaction_id: intent.id,
            status: payment.status,
        })
    }

    /// Apply one delivered gateway event.
    #[instrument(skip(self, event), fields(event = %event.event))]
    pub async fn ingest_event(&self, event: &WebhookEvent) -> Result<ReconcileOutcome, AppError> {
        let details = EventDetails::from_event(event)?;
        let outcome = self.db.reconcile_payment_event(&details).await?;
        record_payment_event(&details.status, outcome.as_str());
        Ok(outcome)
    }
}
