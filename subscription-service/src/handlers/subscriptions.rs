//! Subscription lifecycle handlers.
//!
//! Users read their own subscriptions; all transitions except cancellation
//! of one's own subscription are administrative.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

use crate::middleware::AuthContext;
use crate::models::{CreateSubscription, SubscriptionStatus};
use crate::services::record_subscription_operation;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub activate: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListSubscriptionsQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct RenewRequest {
    pub successor_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub new_plan_id: Uuid,
}

pub async fn create_subscription(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth.require_admin()?;

    if state.db.get_plan(req.plan_id).await?.is_none() {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "subscription plan {} does not exist",
            req.plan_id
        )));
    }

    let status = if req.activate {
        SubscriptionStatus::Active
    } else {
        SubscriptionStatus::Inactive
    };

    let subscription = state
        .db
        .create_subscription(&CreateSubscription {
            customer_id: req.customer_id,
            plan_id: req.plan_id,
            invoice_id: None,
            starts_at: req.starts_at,
            ends_at: req.ends_at,
            status,
        })
        .await?;

    record_subscription_operation("created");

    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(subscription_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let subscription = state
        .db
        .get_subscription(subscription_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "subscription {} does not exist",
                subscription_id
            ))
        })?;

    auth.authorize_subject(subscription.customer_id)?;

    Ok(Json(subscription))
}

pub async fn list_user_subscriptions(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(customer_id): Path<Uuid>,
    Query(query): Query<ListSubscriptionsQuery>,
) -> Result<impl IntoResponse, AppError> {
    auth.authorize_subject(customer_id)?;

    let subscriptions = state
        .db
        .list_user_subscriptions(customer_id, query.active_only)
        .await?;

    Ok(Json(subscriptions))
}

/// The caller's current entitlement, if any. 200 with null is the expected
/// shape for "no entitlement"; 404 is reserved for unknown resources.
pub async fn get_active_subscription(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(customer_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    auth.authorize_subject(customer_id)?;

    let subscription = state.db.get_active_subscription_for_user(customer_id).await?;

    Ok(Json(subscription))
}

pub async fn activate_subscription(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(subscription_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    auth.require_admin()?;

    let subscription = state.db.activate_subscription(subscription_id).await?;
    record_subscription_operation("activated");

    Ok(Json(subscription))
}

pub async fn renew_subscription(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(subscription_id): Path<Uuid>,
    Json(req): Json<RenewRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth.require_admin()?;

    if state.db.get_subscription(req.successor_id).await?.is_none() {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "successor subscription {} does not exist",
            req.successor_id
        )));
    }

    let subscription = state
        .db
        .renew_subscription(subscription_id, req.successor_id)
        .await?;
    record_subscription_operation("renewed");

    Ok(Json(subscription))
}

pub async fn upgrade_subscription(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(subscription_id): Path<Uuid>,
    Json(req): Json<ChangePlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth.require_admin()?;

    if state.db.get_plan(req.new_plan_id).await?.is_none() {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "subscription plan {} does not exist",
            req.new_plan_id
        )));
    }

    let subscription = state
        .db
        .upgrade_subscription(subscription_id, req.new_plan_id)
        .await?;
    record_subscription_operation("upgraded");

    Ok(Json(subscription))
}

pub async fn downgrade_subscription(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(subscription_id): Path<Uuid>,
    Json(req): Json<ChangePlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth.require_admin()?;

    if state.db.get_plan(req.new_plan_id).await?.is_none() {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "subscription plan {} does not exist",
            req.new_plan_id
        )));
    }

    let subscription = state
        .db
        .downgrade_subscription(subscription_id, req.new_plan_id)
        .await?;
    record_subscription_operation("downgraded");

    Ok(Json(subscription))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(subscription_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let subscription = state
        .db
        .get_subscription(subscription_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "subscription {} does not exist",
                subscription_id
            ))
        })?;

    auth.authorize_subject(subscription.customer_id)?;

    let subscription = state.db.cancel_subscription(subscription_id).await?;
    record_subscription_operation("cancelled");

    Ok(Json(subscription))
}

pub async fn delete_subscription(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(subscription_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    auth.require_admin()?;

    if !state.db.delete_subscription(subscription_id).await? {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "subscription {} does not exist",
            subscription_id
        )));
    }

    record_subscription_operation("deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Sweep lapsed active rows to inactive. Usually invoked by a scheduler.
pub async fn expire_lapsed(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    auth.require_admin()?;

    let expired = state.db.expire_lapsed_subscriptions().await?;
    record_subscription_operation("expired_sweep");

    Ok(Json(json!({ "expired": expired })))
}
