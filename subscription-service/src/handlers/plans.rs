//! Plan catalog handlers.
//!
//! Catalog writes are administrative; reads are open to any authenticated
//! caller.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use validator::Validate;

use crate::middleware::AuthContext;
use crate::models::{BillingInterval, CreatePlan, CreatePrice, CreateQuota, ResourceType, UpdatePlan};
use crate::services::record_subscription_operation;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePlanRequest {
    #[validate(length(min = 1, message = "Plan name is required"))]
    pub name: String,
    pub description: Option<String>,
    pub billing_interval: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub has_trial: bool,
    #[validate(range(min = 0.0, max = 1.0, message = "Trial discount must be a fraction"))]
    pub trial_discount: Option<f64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePlanRequest {
    #[validate(length(min = 1, message = "Plan name must not be empty"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub has_trial: Option<bool>,
    #[validate(range(min = 0.0, max = 1.0, message = "Trial discount must be a fraction"))]
    pub trial_discount: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ListPlansQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateQuotaRequest {
    pub resource_type: String,
    pub resource_limit: Option<i32>,
    pub constraints: serde_json::Value,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePriceRequest {
    pub amount: Decimal,
    #[validate(length(min = 3, max = 3, message = "Currency must be an ISO 4217 code"))]
    pub currency: String,
    pub billing_interval: String,
}

fn parse_interval(s: &str) -> Result<BillingInterval, AppError> {
    BillingInterval::parse(s)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("unknown billing interval {:?}", s)))
}

pub async fn create_plan(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreatePlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth.require_admin()?;
    req.validate()?;

    let plan = state
        .db
        .create_plan(&CreatePlan {
            name: req.name,
            description: req.description,
            billing_interval: parse_interval(&req.billing_interval)?,
            is_active: req.is_active,
            has_trial: req.has_trial,
            trial_discount: req.trial_discount,
        })
        .await?;

    record_subscription_operation("plan_created");

    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn list_plans(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(query): Query<ListPlansQuery>,
) -> Result<impl IntoResponse, AppError> {
    let plans = state.db.list_plans(query.active_only).await?;
    Ok(Json(plans))
}

pub async fn get_plan(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(plan_id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let aggregate = state
        .db
        .get_plan_aggregate(plan_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("subscription plan {} does not exist", plan_id))
        })?;
    Ok(Json(aggregate))
}

pub async fn update_plan(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(plan_id): Path<uuid::Uuid>,
    Json(req): Json<UpdatePlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth.require_admin()?;
    req.validate()?;

    let plan = state
        .db
        .update_plan(
            plan_id,
            &UpdatePlan {
                name: req.name,
                description: req.description,
                is_active: req.is_active,
                has_trial: req.has_trial,
                trial_discount: req.trial_discount,
            },
        )
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("subscription plan {} does not exist", plan_id))
        })?;

    Ok(Json(plan))
}

pub async fn add_quota(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(plan_id): Path<uuid::Uuid>,
    Json(req): Json<CreateQuotaRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth.require_admin()?;

    let resource_type = ResourceType::parse(&req.resource_type).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!(
            "unknown resource type {:?}",
            req.resource_type
        ))
    })?;

    let quota = state
        .db
        .add_quota(
            plan_id,
            &CreateQuota {
                resource_type,
                resource_limit: req.resource_limit,
                constraints: req.constraints,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(quota)))
}

pub async fn delete_quota(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((_plan_id, quota_id)): Path<(uuid::Uuid, uuid::Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    auth.require_admin()?;

    if !state.db.delete_quota(quota_id).await? {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "quota {} does not exist",
            quota_id
        )));
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_price(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(plan_id): Path<uuid::Uuid>,
    Json(req): Json<CreatePriceRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth.require_admin()?;
    req.validate()?;

    let price = state
        .db
        .add_price(
            plan_id,
            &CreatePrice {
                amount: req.amount,
                currency: req.currency,
                billing_interval: parse_interval(&req.billing_interval)?,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(price)))
}

pub async fn delete_price(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((_plan_id, price_id)): Path<(uuid::Uuid, uuid::Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    auth.require_admin()?;

    if !state.db.delete_price(price_id).await? {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "price {} does not exist",
            price_id
        )));
    }

    Ok(StatusCode::NO_CONTENT)
}
