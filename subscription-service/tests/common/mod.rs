//! Common test utilities for subscription-service integration tests.
//!
//! Tests run against a real PostgreSQL pointed to by `TEST_DATABASE_URL`.
//! Each test gets its own schema so tests can run concurrently; when the
//! variable is unset the DB-backed tests skip themselves.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Once;
use subscription_service::models::{
    BillingInterval, CreatePayment, CreatePlan, CreatePrice, CreateQuota, Payment, PaymentKassa,
    PaymentMethodKind, ResourceType, SubscriptionPlan,
};
use subscription_service::services::{Database, EventDetails};
use uuid::Uuid;

static INIT: Once = Once::new();
static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,subscription_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// A schema-isolated database handle for one test.
pub struct TestDb {
    pub db: Database,
    pub schema: String,
    pub database_url: String,
}

impl TestDb {
    /// Connect to the test database, or `None` when `TEST_DATABASE_URL` is
    /// not set (the test then skips itself).
    pub async fn spawn() -> Option<TestDb> {
        init_tracing();

        let base_url = match std::env::var("TEST_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("TEST_DATABASE_URL not set; skipping DB-backed test");
                return None;
            }
        };

        let schema = format!(
            "test_subscription_{}_{}",
            std::process::id(),
            SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst)
        );

        let admin = Database::new(&base_url, 1, 1)
            .await
            .expect("Failed to connect to TEST_DATABASE_URL");
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
            .execute(admin.pool())
            .await
            .expect("Failed to create test schema");

        let separator = if base_url.contains('?') { '&' } else { '?' };
        let database_url = format!(
            "{}{}options=-csearch_path%3D{}",
            base_url, separator, schema
        );

        let db = Database::new(&database_url, 4, 1)
            .await
            .expect("Failed to connect to test schema");
        db.run_migrations().await.expect("Failed to run migrations");

        Some(TestDb {
            db,
            schema,
            database_url,
        })
    }
}

/// Seed a plan with a quota and an RUB price for its own interval.
pub async fn seed_plan(db: &Database, interval: BillingInterval) -> SubscriptionPlan {
    let plan = db
        .create_plan(&CreatePlan {
            name: format!("Test plan {}", Uuid::new_v4()),
            description: Some("integration test plan".to_string()),
            billing_interval: interval,
            is_active: true,
            has_trial: false,
            trial_discount: None,
        })
        .await
        .expect("Failed to create plan");

    db.add_quota(
        plan.plan_id,
        &CreateQuota {
            resource_type: ResourceType::ProtocolsCount,
            resource_limit: Some(2),
            constraints: serde_json::json!({
                "SIMULTANEOUS_USE": true,
                "USE_VLESS": true,
                "USE_OUTLINE": true,
                "USE_WIREGUARD": false
            }),
        },
    )
    .await
    .expect("Failed to add quota");

    db.add_price(
        plan.plan_id,
        &CreatePrice {
            amount: Decimal::new(19900, 2),
            currency: "RUB".to_string(),
            billing_interval: interval,
        },
    )
    .await
    .expect("Failed to add price");

    plan
}

/// Seed a pending payment carrying a gateway transaction id.
pub async fn seed_pending_payment(db: &Database, user_id: Uuid, plan_id: Uuid) -> Payment {
    db.create_payment(&CreatePayment {
        user_id,
        amount: Decimal::new(19900, 2),
        currency: "RUB".to_string(),
        plan_id,
        method: PaymentMethodKind::RuDebitCard,
        kassa: PaymentKassa::Yookassa,
        transaction_id: Some(format!("tx-{}", Uuid::new_v4())),
        status: "pending".to_string(),
        metadata: None,
    })
    .await
    .expect("Failed to create payment")
}

/// A succeeded-event view for a seeded payment.
pub fn succeeded_event(payment: &Payment) -> EventDetails {
    EventDetails {
        transaction_id: payment
            .transaction_id
            .clone()
            .expect("seeded payment has a transaction id"),
        status: "succeeded".to_string(),
        user_id: payment.user_id,
        plan_id: payment.plan_id,
        payment_method: None,
    }
}

/// Far-future and recent-past timestamps for lifecycle tests.
pub fn period_days(start_offset: i64, end_offset: i64) -> (chrono::DateTime<Utc>, chrono::DateTime<Utc>) {
    let now = Utc::now();
    (now + Duration::days(start_offset), now + Duration::days(end_offset))
}
