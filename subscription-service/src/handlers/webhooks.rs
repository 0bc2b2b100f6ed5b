//! Gateway webhook handler.
//!
//! The gateway retries deliveries until it sees 200, so reconciliation must
//! be idempotent; outcome-bearing responses are for operators, the gateway
//! only looks at the status code.

use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;
use tracing::info;

use crate::services::WebhookEvent;
use crate::AppState;

pub async fn yookassa_webhook(
    State(state): State<AppState>,
    Json(event): Json<WebhookEvent>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.reconciler.ingest_event(&event).await?;

    info!(event = %event.event, outcome = outcome.as_str(), "Webhook processed");

    Ok(Json(outcome))
}
