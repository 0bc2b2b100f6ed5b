//! Payment handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::middleware::AuthContext;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RequestPaymentRequest {
    pub plan_id: Uuid,
    #[validate(length(min = 3, max = 3, message = "Currency must be an ISO 4217 code"))]
    pub currency: String,
}

/// Create a remote payment intent and the local pending payment record for
/// the calling user.
pub async fn request_payment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<RequestPaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let confirmation = state
        .reconciler
        .request_payment(auth.user_id, req.plan_id, &req.currency)
        .await?;

    Ok((StatusCode::CREATED, Json(confirmation)))
}

pub async fn get_payment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(payment_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let payment = state.db.get_payment(payment_id).await?.ok_or_else(|| {
        AppError::NotFound(anyhow::anyhow!("payment {} does not exist", payment_id))
    })?;

    auth.authorize_subject(payment.user_id)?;

    Ok(Json(payment))
}

pub async fn list_user_payments(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    auth.authorize_subject(user_id)?;

    let payments = state.db.list_user_payments(user_id).await?;

    Ok(Json(payments))
}

pub async fn list_payment_methods(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    auth.authorize_subject(user_id)?;

    let methods = state.db.list_payment_methods(user_id).await?;

    Ok(Json(methods))
}

/// Administrative removal of a payment record, for data-subject erasure.
pub async fn purge_payment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(payment_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    auth.require_admin()?;

    if !state.db.purge_payment(payment_id).await? {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "payment {} does not exist",
            payment_id
        )));
    }

    Ok(StatusCode::NO_CONTENT)
}
