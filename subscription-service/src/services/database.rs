//! Database service for subscription-service.
//!
//! Owns every read-check-write sequence. Each sequence runs inside a single
//! transaction acquired at entry and released on every exit path; early
//! returns and errors roll back on drop.

use crate::models::{
    CreatePayment, CreatePlan, CreatePrice, CreateQuota, CreateSubscription, Payment,
    PaymentMethod, PlanAggregate, Price, Quota, Subscription, SubscriptionPlan,
    SubscriptionStatus, UpdatePlan, STATUS_SUCCEEDED,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::yookassa::EventDetails;
use chrono::{DateTime, Utc};
use serde::Serialize;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const PLAN_COLUMNS: &str = "plan_id, name, description, billing_interval, is_active, has_trial, \
     trial_discount, created_utc, updated_utc";

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, customer_id, plan_id, invoice_id, starts_at, \
     ends_at, renewed_at, renewed_subscription_id, upgraded_at, upgraded_to_plan_id, \
     downgraded_at, downgraded_to_plan_id, cancelled_at, deleted_at, status, created_utc";

const PAYMENT_COLUMNS: &str = "payment_id, user_id, amount, currency, plan_id, method, kassa, \
     transaction_id, status, metadata, last_update";

/// Result of applying one gateway event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ReconcileOutcome {
    /// The stored status already matched the delivered status.
    DuplicateDelivery,
    /// Status recorded; no subscription effect was due.
    StatusRecorded { status: String },
    /// First transition into `succeeded`: a new subscription was created.
    SubscriptionCreated { subscription_id: Uuid },
    /// First transition into `succeeded`: the active subscription was
    /// extended in place.
    SubscriptionExtended {
        subscription_id: Uuid,
        ends_at: DateTime<Utc>,
    },
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::DuplicateDelivery => "duplicate_delivery",
            ReconcileOutcome::StatusRecorded { .. } => "status_recorded",
            ReconcileOutcome::SubscriptionCreated { .. } => "subscription_created",
            ReconcileOutcome::SubscriptionExtended { .. } => "subscription_extended",
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "subscription-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Plan Operations
    // =========================================================================

    /// Create a new subscription plan.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_plan(&self, input: &CreatePlan) -> Result<SubscriptionPlan, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_plan"])
            .start_timer();

        let plan_id = Uuid::new_v4();
        let plan = sqlx::query_as::<_, SubscriptionPlan>(&format!(
            "INSERT INTO subscription_plans (plan_id, name, description, billing_interval, is_active, has_trial, trial_discount) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {PLAN_COLUMNS}"
        ))
        .bind(plan_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.billing_interval.as_str())
        .bind(input.is_active)
        .bind(input.has_trial)
        .bind(input.trial_discount)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create plan: {}", e)))?;

        timer.observe_duration();
        info!(plan_id = %plan.plan_id, name = %plan.name, "Plan created");

        Ok(plan)
    }

    /// Get a plan by ID.
    #[instrument(skip(self), fields(plan_id = %plan_id))]
    pub async fn get_plan(&self, plan_id: Uuid) -> Result<Option<SubscriptionPlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, SubscriptionPlan>(&format!(
            "SELECT {PLAN_COLUMNS} FROM subscription_plans WHERE plan_id = $1"
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get plan: {}", e)))?;

        timer.observe_duration();

        Ok(plan)
    }

    /// List plans, optionally only active ones.
    #[instrument(skip(self))]
    pub async fn list_plans(&self, active_only: bool) -> Result<Vec<SubscriptionPlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_plans"])
            .start_timer();

        let plans = sqlx::query_as::<_, SubscriptionPlan>(&format!(
            "SELECT {PLAN_COLUMNS} FROM subscription_plans \
             WHERE ($1::bool = FALSE OR is_active = TRUE) \
             ORDER BY created_utc"
        ))
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list plans: {}", e)))?;

        timer.observe_duration();

        Ok(plans)
    }

    /// Update a plan.
    #[instrument(skip(self, input), fields(plan_id = %plan_id))]
    pub async fn update_plan(
        &self,
        plan_id: Uuid,
        input: &UpdatePlan,
    ) -> Result<Option<SubscriptionPlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, SubscriptionPlan>(&format!(
            "UPDATE subscription_plans \
             SET name = COALESCE($2, name), \
                 description = COALESCE($3, description), \
                 is_active = COALESCE($4, is_active), \
                 has_trial = COALESCE($5, has_trial), \
                 trial_discount = COALESCE($6, trial_discount), \
                 updated_utc = now() \
             WHERE plan_id = $1 \
             RETURNING {PLAN_COLUMNS}"
        ))
        .bind(plan_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.is_active)
        .bind(input.has_trial)
        .bind(input.trial_discount)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update plan: {}", e)))?;

        timer.observe_duration();

        Ok(plan)
    }

    /// Add a quota to a plan.
    ///
    /// The constraint map is validated against the resource type's key set
    /// here, at write time; at most one quota per (plan, resource type).
    #[instrument(skip(self, input), fields(plan_id = %plan_id, resource_type = %input.resource_type.as_str()))]
    pub async fn add_quota(&self, plan_id: Uuid, input: &CreateQuota) -> Result<Quota, AppError> {
        if let Some(limit) = input.resource_limit {
            if limit < 0 {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "quota limit must be non-negative"
                )));
            }
        }
        input.resource_type.validate_constraints(&input.constraints)?;

        if self.get_plan(plan_id).await?.is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "subscription plan {} does not exist",
                plan_id
            )));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["add_quota"])
            .start_timer();

        let quota_id = Uuid::new_v4();
        let result = sqlx::query_as::<_, Quota>(
            "INSERT INTO quotas (quota_id, plan_id, resource_type, resource_limit, constraints) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING quota_id, plan_id, resource_type, resource_limit, constraints",
        )
        .bind(quota_id)
        .bind(plan_id)
        .bind(input.resource_type.as_str())
        .bind(input.resource_limit)
        .bind(&input.constraints)
        .fetch_one(&self.pool)
        .await;

        timer.observe_duration();

        match result {
            Ok(quota) => Ok(quota),
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                Err(AppError::Conflict(anyhow::anyhow!(
                    "plan {} already has a {} quota",
                    plan_id,
                    input.resource_type.as_str()
                )))
            }
            Err(e) => Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to add quota: {}",
                e
            ))),
        }
    }

    /// Delete a quota.
    #[instrument(skip(self), fields(quota_id = %quota_id))]
    pub async fn delete_quota(&self, quota_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_quota"])
            .start_timer();

        let result = sqlx::query("DELETE FROM quotas WHERE quota_id = $1")
            .bind(quota_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete quota: {}", e)))?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    /// Add a price to a plan. At most one price per (plan, currency).
    #[instrument(skip(self, input), fields(plan_id = %plan_id, currency = %input.currency))]
    pub async fn add_price(&self, plan_id: Uuid, input: &CreatePrice) -> Result<Price, AppError> {
        if input.amount.is_sign_negative() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "price amount must be non-negative"
            )));
        }

        if self.get_plan(plan_id).await?.is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "subscription plan {} does not exist",
                plan_id
            )));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["add_price"])
            .start_timer();

        let price_id = Uuid::new_v4();
        let result = sqlx::query_as::<_, Price>(
            "INSERT INTO prices (price_id, plan_id, amount, currency, billing_interval) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING price_id, plan_id, amount, currency, billing_interval",
        )
        .bind(price_id)
        .bind(plan_id)
        .bind(input.amount)
        .bind(&input.currency)
        .bind(input.billing_interval.as_str())
        .fetch_one(&self.pool)
        .await;

        timer.observe_duration();

        match result {
            Ok(price) => Ok(price),
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                Err(AppError::Conflict(anyhow::anyhow!(
                    "plan {} already has a {} price",
                    plan_id,
                    input.currency
                )))
            }
            Err(e) => Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to add price: {}",
                e
            ))),
        }
    }

    /// Delete a price.
    #[instrument(skip(self), fields(price_id = %price_id))]
    pub async fn delete_price(&self, price_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_price"])
            .start_timer();

        let result = sqlx::query("DELETE FROM prices WHERE price_id = $1")
            .bind(price_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete price: {}", e)))?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    /// Get a plan together with its quotas and prices.
    #[instrument(skip(self), fields(plan_id = %plan_id))]
    pub async fn get_plan_aggregate(
        &self,
        plan_id: Uuid,
    ) -> Result<Option<PlanAggregate>, AppError> {
        let Some(plan) = self.get_plan(plan_id).await? else {
            return Ok(None);
        };

        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_plan_aggregate"])
            .start_timer();

        let quotas = sqlx::query_as::<_, Quota>(
            "SELECT quota_id, plan_id, resource_type, resource_limit, constraints \
             FROM quotas WHERE plan_id = $1 ORDER BY resource_type",
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get quotas: {}", e)))?;

        let prices = sqlx::query_as::<_, Price>(
            "SELECT price_id, plan_id, amount, currency, billing_interval \
             FROM prices WHERE plan_id = $1 ORDER BY currency",
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get prices: {}", e)))?;

        timer.observe_duration();

        Ok(Some(PlanAggregate {
            plan,
            quotas,
            prices,
        }))
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Create a subscription.
    ///
    /// When created active, the one-active-per-customer invariant is
    /// enforced: lapsed active rows are demoted first, and a racing insert
    /// loses on the partial unique index.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id, plan_id = %input.plan_id))]
    pub async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError> {
        if input.ends_at <= input.starts_at {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "ends_at must be after starts_at"
            )));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_subscription"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        if input.status == SubscriptionStatus::Active {
            demote_lapsed(&mut tx, input.customer_id, Utc::now()).await?;
        }

        let subscription_id = Uuid::new_v4();
        let result = sqlx::query_as::<_, Subscription>(&format!(
            "INSERT INTO subscriptions (subscription_id, customer_id, plan_id, invoice_id, starts_at, ends_at, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(subscription_id)
        .bind(input.customer_id)
        .bind(input.plan_id)
        .bind(input.invoice_id)
        .bind(input.starts_at)
        .bind(input.ends_at)
        .bind(input.status.as_str())
        .fetch_one(&mut *tx)
        .await;

        let subscription = match result {
            Ok(subscription) => subscription,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "customer {} already holds an active subscription",
                    input.customer_id
                )));
            }
            Err(e) => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to create subscription: {}",
                    e
                )));
            }
        };

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        info!(subscription_id = %subscription.subscription_id, "Subscription created");

        Ok(subscription)
    }

    /// Get a subscription by ID. Soft-deleted rows are invisible.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE subscription_id = $1 AND deleted_at IS NULL"
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    /// List a customer's subscriptions.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn list_user_subscriptions(
        &self,
        customer_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_user_subscriptions"])
            .start_timer();

        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE customer_id = $1 AND deleted_at IS NULL \
               AND ($2::bool = FALSE OR (status = 'active' AND cancelled_at IS NULL AND ends_at > now())) \
             ORDER BY created_utc"
        ))
        .bind(customer_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list subscriptions: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscriptions)
    }

    /// The unique active, non-cancelled, unexpired subscription for a
    /// customer. `None` is the expected outcome for customers without an
    /// entitlement, never an error.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn get_active_subscription_for_user(
        &self,
        customer_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_active_subscription_for_user"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE customer_id = $1 AND status = 'active' \
               AND cancelled_at IS NULL AND deleted_at IS NULL AND ends_at > now() \
             ORDER BY ends_at DESC LIMIT 1"
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get active subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    /// Activate a subscription.
    ///
    /// Idempotent when already active. Rejected with a conflict when the
    /// customer already holds a different active, non-cancelled, unexpired
    /// subscription.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn activate_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["activate_subscription"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE subscription_id = $1 AND deleted_at IS NULL FOR UPDATE"
        ))
        .bind(subscription_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to lock subscription: {}", e))
        })?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "subscription {} does not exist",
                subscription_id
            ))
        })?;

        if subscription.status() == SubscriptionStatus::Active {
            timer.observe_duration();
            return Ok(subscription);
        }

        let now = Utc::now();
        demote_lapsed(&mut tx, subscription.customer_id, now).await?;

        let other_active: Option<Uuid> = sqlx::query_scalar(
            "SELECT subscription_id FROM subscriptions \
             WHERE customer_id = $1 AND subscription_id <> $2 AND status = 'active' \
               AND cancelled_at IS NULL AND deleted_at IS NULL AND ends_at > $3 \
             LIMIT 1",
        )
        .bind(subscription.customer_id)
        .bind(subscription_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to check exclusivity: {}", e))
        })?;

        if other_active.is_some() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "customer {} already holds an active subscription",
                subscription.customer_id
            )));
        }

        let result = sqlx::query_as::<_, Subscription>(&format!(
            "UPDATE subscriptions SET status = 'active' \
             WHERE subscription_id = $1 \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(subscription_id)
        .fetch_one(&mut *tx)
        .await;

        let activated = match result {
            Ok(subscription) => subscription,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "customer {} already holds an active subscription",
                    subscription.customer_id
                )));
            }
            Err(e) => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to activate subscription: {}",
                    e
                )));
            }
        };

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        info!(subscription_id = %subscription_id, "Subscription activated");

        Ok(activated)
    }

    /// Record a renewal link to a successor subscription. Does not touch
    /// `ends_at`; in-place prolongation is `extend_subscription`.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn renew_subscription(
        &self,
        subscription_id: Uuid,
        successor_id: Uuid,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["renew_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "UPDATE subscriptions \
             SET renewed_at = now(), renewed_subscription_id = $2 \
             WHERE subscription_id = $1 AND deleted_at IS NULL \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(subscription_id)
        .bind(successor_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to renew subscription: {}", e))
        })?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "subscription {} does not exist",
                subscription_id
            ))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    /// Upgrade a subscription to a new plan.
    #[instrument(skip(self), fields(subscription_id = %subscription_id, new_plan_id = %new_plan_id))]
    pub async fn upgrade_subscription(
        &self,
        subscription_id: Uuid,
        new_plan_id: Uuid,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upgrade_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "UPDATE subscriptions \
             SET upgraded_at = now(), upgraded_to_plan_id = $2, status = 'upgraded' \
             WHERE subscription_id = $1 AND deleted_at IS NULL \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(subscription_id)
        .bind(new_plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to upgrade subscription: {}", e))
        })?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "subscription {} does not exist",
                subscription_id
            ))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    /// Record a downgrade to a new plan. Status is unchanged.
    #[instrument(skip(self), fields(subscription_id = %subscription_id, new_plan_id = %new_plan_id))]
    pub async fn downgrade_subscription(
        &self,
        subscription_id: Uuid,
        new_plan_id: Uuid,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["downgrade_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "UPDATE subscriptions \
             SET downgraded_at = now(), downgraded_to_plan_id = $2 \
             WHERE subscription_id = $1 AND deleted_at IS NULL \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(subscription_id)
        .bind(new_plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to downgrade subscription: {}", e))
        })?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "subscription {} does not exist",
                subscription_id
            ))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    /// Cancel a subscription. Idempotent: the first cancellation timestamp
    /// sticks. Status is not altered; active queries filter on
    /// `cancelled_at`.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cancel_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "UPDATE subscriptions \
             SET cancelled_at = COALESCE(cancelled_at, now()) \
             WHERE subscription_id = $1 AND deleted_at IS NULL \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to cancel subscription: {}", e))
        })?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "subscription {} does not exist",
                subscription_id
            ))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    /// Demote every lapsed active subscription to inactive. Returns the
    /// number of rows demoted.
    #[instrument(skip(self))]
    pub async fn expire_lapsed_subscriptions(&self) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["expire_lapsed_subscriptions"])
            .start_timer();

        let result = sqlx::query(
            "UPDATE subscriptions SET status = 'inactive' \
             WHERE status = 'active' AND ends_at <= now() AND deleted_at IS NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to expire subscriptions: {}", e))
        })?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    /// Soft-delete a subscription. Rows are never physically removed.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn delete_subscription(&self, subscription_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_subscription"])
            .start_timer();

        let result = sqlx::query(
            "UPDATE subscriptions SET deleted_at = now() \
             WHERE subscription_id = $1 AND deleted_at IS NULL",
        )
        .bind(subscription_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to delete subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Payment Operations
    // =========================================================================

    /// Create a payment record.
    #[instrument(skip(self, input), fields(user_id = %input.user_id, plan_id = %input.plan_id))]
    pub async fn create_payment(&self, input: &CreatePayment) -> Result<Payment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_payment"])
            .start_timer();

        let payment_id = Uuid::new_v4();
        let result = sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments (payment_id, user_id, amount, currency, plan_id, method, kassa, transaction_id, status, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(payment_id)
        .bind(input.user_id)
        .bind(input.amount)
        .bind(&input.currency)
        .bind(input.plan_id)
        .bind(input.method.as_str())
        .bind(input.kassa.as_str())
        .bind(&input.transaction_id)
        .bind(&input.status)
        .bind(&input.metadata)
        .fetch_one(&self.pool)
        .await;

        timer.observe_duration();

        match result {
            Ok(payment) => {
                info!(payment_id = %payment.payment_id, "Payment created");
                Ok(payment)
            }
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                Err(AppError::Conflict(anyhow::anyhow!(
                    "a payment with this transaction id already exists"
                )))
            }
            Err(e) => Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to create payment: {}",
                e
            ))),
        }
    }

    /// Get a payment by ID.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        timer.observe_duration();

        Ok(payment)
    }

    /// Get a payment by gateway transaction ID.
    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    pub async fn get_payment_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment_by_transaction_id"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE transaction_id = $1"
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        timer.observe_duration();

        Ok(payment)
    }

    /// List a user's payments, most recent first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_user_payments(&self, user_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_user_payments"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE user_id = $1 ORDER BY last_update DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        timer.observe_duration();

        Ok(payments)
    }

    /// List a user's stored payment methods.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_payment_methods(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PaymentMethod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payment_methods"])
            .start_timer();

        let methods = sqlx::query_as::<_, PaymentMethod>(
            "SELECT method_id, user_id, method_name, external_method_id, created_utc \
             FROM payment_methods WHERE user_id = $1 ORDER BY method_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list payment methods: {}", e))
        })?;

        timer.observe_duration();

        Ok(methods)
    }

    /// Administrative purge of a payment record.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn purge_payment(&self, payment_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["purge_payment"])
            .start_timer();

        let result = sqlx::query("DELETE FROM payments WHERE payment_id = $1")
            .bind(payment_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to purge payment: {}", e)))?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Apply one validated gateway event as a single atomic unit.
    ///
    /// The payment row lock serializes concurrent deliveries for the same
    /// transaction id; the duplicate-status check makes redelivery a no-op;
    /// the old-status guard lets a record transition into the succeeded
    /// effect exactly once. Everything after the lock commits together or
    /// not at all.
    #[instrument(skip(self, details), fields(transaction_id = %details.transaction_id, status = %details.status))]
    pub async fn reconcile_payment_event(
        &self,
        details: &EventDetails,
    ) -> Result<ReconcileOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reconcile_payment_event"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE transaction_id = $1 FOR UPDATE"
        ))
        .bind(&details.transaction_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock payment: {}", e)))?
        .ok_or_else(|| AppError::UnknownTransaction(details.transaction_id.clone()))?;

        // Redelivery: the status transition, not the event receipt, is the
        // unit of work.
        if payment.status == details.status {
            timer.observe_duration();
            return Ok(ReconcileOutcome::DuplicateDelivery);
        }

        let old_status = payment.status.clone();

        sqlx::query("UPDATE payments SET status = $2, last_update = now() WHERE payment_id = $1")
            .bind(payment.payment_id)
            .bind(&details.status)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to update payment status: {}", e))
            })?;

        if old_status == STATUS_SUCCEEDED || details.status != STATUS_SUCCEEDED {
            tx.commit().await.map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
            })?;
            timer.observe_duration();
            return Ok(ReconcileOutcome::StatusRecorded {
                status: details.status.clone(),
            });
        }

        // First transition into succeeded.
        if let Some((method_name, external_id)) = &details.payment_method {
            sqlx::query(
                "INSERT INTO payment_methods (user_id, method_name, external_method_id) \
                 VALUES ($1, $2, $3)",
            )
            .bind(details.user_id)
            .bind(method_name)
            .bind(external_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to store payment method: {}", e))
            })?;
        }

        let plan = sqlx::query_as::<_, SubscriptionPlan>(&format!(
            "SELECT {PLAN_COLUMNS} FROM subscription_plans WHERE plan_id = $1"
        ))
        .bind(details.plan_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get plan: {}", e)))?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "subscription plan {} does not exist",
                details.plan_id
            ))
        })?;
        let interval = plan.interval().duration();

        let now = Utc::now();
        let active = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE customer_id = $1 AND status = 'active' \
               AND cancelled_at IS NULL AND deleted_at IS NULL AND ends_at > $2 \
             ORDER BY ends_at DESC LIMIT 1 FOR UPDATE",
        ))
        .bind(details.user_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to lock active subscription: {}", e))
        })?;

        let outcome = match active {
            Some(subscription) => {
                let new_ends_at = subscription.ends_at + interval;
                sqlx::query("UPDATE subscriptions SET ends_at = $2 WHERE subscription_id = $1")
                    .bind(subscription.subscription_id)
                    .bind(new_ends_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        AppError::DatabaseError(anyhow::anyhow!(
                            "Failed to extend subscription: {}",
                            e
                        ))
                    })?;
                ReconcileOutcome::SubscriptionExtended {
                    subscription_id: subscription.subscription_id,
                    ends_at: new_ends_at,
                }
            }
            None => {
                demote_lapsed(&mut tx, details.user_id, now).await?;

                let subscription_id = Uuid::new_v4();
                let result = sqlx::query(
                    "INSERT INTO subscriptions (subscription_id, customer_id, plan_id, invoice_id, starts_at, ends_at, status) \
                     VALUES ($1, $2, $3, $4, $5, $6, 'active')",
                )
                .bind(subscription_id)
                .bind(details.user_id)
                .bind(details.plan_id)
                .bind(payment.payment_id)
                .bind(now)
                .bind(now + interval)
                .execute(&mut *tx)
                .await;

                match result {
                    Ok(_) => ReconcileOutcome::SubscriptionCreated { subscription_id },
                    Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                        return Err(AppError::Conflict(anyhow::anyhow!(
                            "customer {} already holds an active subscription",
                            details.user_id
                        )));
                    }
                    Err(e) => {
                        return Err(AppError::DatabaseError(anyhow::anyhow!(
                            "Failed to create subscription: {}",
                            e
                        )));
                    }
                }
            }
        };

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        info!(
            transaction_id = %details.transaction_id,
            outcome = outcome.as_str(),
            "Payment event reconciled"
        );

        Ok(outcome)
    }
}

/// Demote a customer's lapsed active rows so they cannot trip the
/// one-active-per-customer index when a new active row is inserted.
async fn demote_lapsed(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    customer_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE subscriptions SET status = 'inactive' \
         WHERE customer_id = $1 AND status = 'active' \
           AND cancelled_at IS NULL AND deleted_at IS NULL AND ends_at <= $2",
    )
    .bind(customer_id)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!(
            "Failed to demote lapsed subscriptions: {}",
            e
        ))
    })?;

    Ok(())
}
