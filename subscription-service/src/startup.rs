//! Application startup and lifecycle management.

use crate::config::Config;
use crate::handlers::{payments, plans, subscriptions, webhooks};
use crate::services::{get_metrics, init_metrics, Database, PaymentReconciler, YookassaClient};
use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::delete, routing::get,
    routing::post, routing::put, Json, Router,
};
use secrecy::ExposeSecret;
use serde_json::json;
use service_core::error::AppError;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub reconciler: PaymentReconciler,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "subscription-service",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "subscription-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Business API, nested under `/api/v1`.
fn api_router() -> Router<AppState> {
    Router::new()
        .route("/plans", post(plans::create_plan).get(plans::list_plans))
        .route("/plans/:plan_id", get(plans::get_plan).put(plans::update_plan))
        .route("/plans/:plan_id/quotas", post(plans::add_quota))
        .route(
            "/plans/:plan_id/quotas/:quota_id",
            delete(plans::delete_quota),
        )
        .route("/plans/:plan_id/prices", post(plans::add_price))
        .route(
            "/plans/:plan_id/prices/:price_id",
            delete(plans::delete_price),
        )
        .route(
            "/subscriptions",
            post(subscriptions::create_subscription),
        )
        .route(
            "/subscriptions/expire-lapsed",
            post(subscriptions::expire_lapsed),
        )
        .route(
            "/subscriptions/:subscription_id",
            get(subscriptions::get_subscription).delete(subscriptions::delete_subscription),
        )
        .route(
            "/subscriptions/:subscription_id/activate",
            put(subscriptions::activate_subscription),
        )
        .route(
            "/subscriptions/:subscription_id/renew",
            put(subscriptions::renew_subscription),
        )
        .route(
            "/subscriptions/:subscription_id/upgrade",
            put(subscriptions::upgrade_subscription),
        )
        .route(
            "/subscriptions/:subscription_id/downgrade",
            put(subscriptions::downgrade_subscription),
        )
        .route(
            "/subscriptions/:subscription_id/cancel",
            put(subscriptions::cancel_subscription),
        )
        .route(
            "/users/:user_id/subscriptions",
            get(subscriptions::list_user_subscriptions),
        )
        .route(
            "/users/:user_id/subscriptions/active",
            get(subscriptions::get_active_subscription),
        )
        .route("/payments", post(payments::request_payment))
        .route(
            "/payments/:payment_id",
            get(payments::get_payment).delete(payments::purge_payment),
        )
        .route("/users/:user_id/payments", get(payments::list_user_payments))
        .route(
            "/users/:user_id/payment-methods",
            get(payments::list_payment_methods),
        )
        .route("/webhooks/yookassa", post(webhooks::yookassa_webhook))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: Config) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: Config, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let gateway = YookassaClient::new(config.yookassa.clone());
        if gateway.is_configured() {
            tracing::info!("YooKassa client initialized");
        } else {
            tracing::warn!("YooKassa credentials not configured - payment requests will fail");
        }

        let reconciler = PaymentReconciler::new(
            db.clone(),
            gateway,
            config.yookassa.return_url.clone(),
        );

        let state = AppState {
            config: config.clone(),
            db,
            reconciler,
        };

        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid listen address: {}", e)))?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Subscription service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .nest("/api/v1", api_router())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state);

        tracing::info!(
            service = "subscription-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await
    }
}
