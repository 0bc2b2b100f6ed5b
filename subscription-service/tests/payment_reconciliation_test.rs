//! Integration tests for payment event reconciliation.

mod common;

use common::{seed_pending_payment, seed_plan, succeeded_event, TestDb};
use service_core::error::AppError;
use subscription_service::models::{BillingInterval, STATUS_SUCCEEDED};
use subscription_service::services::{EventDetails, ReconcileOutcome};
use uuid::Uuid;

#[tokio::test]
async fn first_succeeded_event_creates_active_subscription() {
    let Some(test_db) = TestDb::spawn().await else { return };
    let db = &test_db.db;

    let plan = seed_plan(db, BillingInterval::Month).await;
    let user_id = Uuid::new_v4();
    let payment = seed_pending_payment(db, user_id, plan.plan_id).await;

    let outcome = db
        .reconcile_payment_event(&succeeded_event(&payment))
        .await
        .unwrap();

    let ReconcileOutcome::SubscriptionCreated { subscription_id } = outcome else {
        panic!("expected a subscription to be created, got {:?}", outcome);
    };

    let subscription = db
        .get_subscription(subscription_id)
        .await
        .unwrap()
        .expect("created subscription exists");
    assert_eq!(subscription.customer_id, user_id);
    assert_eq!(subscription.plan_id, plan.plan_id);
    assert_eq!(subscription.invoice_id, Some(payment.payment_id));
    assert!(subscription.is_active_at(chrono::Utc::now()));

    let stored = db.get_payment(payment.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, STATUS_SUCCEEDED);
}

#[tokio::test]
async fn redelivered_event_is_a_noop() {
    let Some(test_db) = TestDb::spawn().await else { return };
    let db = &test_db.db;

    let plan = seed_plan(db, BillingInterval::Month).await;
    let user_id = Uuid::new_v4();
    let payment = seed_pending_payment(db, user_id, plan.plan_id).await;
    let event = succeeded_event(&payment);

    let first = db.reconcile_payment_event(&event).await.unwrap();
    assert!(matches!(first, ReconcileOutcome::SubscriptionCreated { .. }));

    let redelivery = db.reconcile_payment_event(&event).await.unwrap();
    assert!(matches!(redelivery, ReconcileOutcome::DuplicateDelivery));

    let subscriptions = db.list_user_subscriptions(user_id, false).await.unwrap();
    assert_eq!(subscriptions.len(), 1, "redelivery must not mint a second subscription");
}

#[tokio::test]
async fn second_payment_extends_the_active_subscription() {
    let Some(test_db) = TestDb::spawn().await else { return };
    let db = &test_db.db;

    let plan = seed_plan(db, BillingInterval::Month).await;
    let user_id = Uuid::new_v4();

    let first = seed_pending_payment(db, user_id, plan.plan_id).await;
    let created = db
        .reconcile_payment_event(&succeeded_event(&first))
        .await
        .unwrap();
    let ReconcileOutcome::SubscriptionCreated { subscription_id } = created else {
        panic!("expected first payment to create a subscription");
    };
    let original_ends_at = db
        .get_subscription(subscription_id)
        .await
        .unwrap()
        .unwrap()
        .ends_at;

    let second = seed_pending_payment(db, user_id, plan.plan_id).await;
    let outcome = db
        .reconcile_payment_event(&succeeded_event(&second))
        .await
        .unwrap();

    let ReconcileOutcome::SubscriptionExtended {
        subscription_id: extended_id,
        ends_at,
    } = outcome
    else {
        panic!("expected second payment to extend, got {:?}", outcome);
    };
    assert_eq!(extended_id, subscription_id);
    assert_eq!(ends_at, original_ends_at + chrono::Duration::days(30));

    let subscriptions = db.list_user_subscriptions(user_id, false).await.unwrap();
    assert_eq!(subscriptions.len(), 1, "extension must not create a second row");
}

#[tokio::test]
async fn non_succeeded_status_is_recorded_without_subscription_effect() {
    let Some(test_db) = TestDb::spawn().await else { return };
    let db = &test_db.db;

    let plan = seed_plan(db, BillingInterval::Month).await;
    let user_id = Uuid::new_v4();
    let payment = seed_pending_payment(db, user_id, plan.plan_id).await;

    let mut event = succeeded_event(&payment);
    event.status = "canceled".to_string();

    let outcome = db.reconcile_payment_event(&event).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::StatusRecorded { .. }));

    let stored = db.get_payment(payment.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, "canceled");
    assert!(db
        .list_user_subscriptions(user_id, false)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn status_flap_back_to_succeeded_extends_in_place() {
    let Some(test_db) = TestDb::spawn().await else { return };
    let db = &test_db.db;

    let plan = seed_plan(db, BillingInterval::Month).await;
    let user_id = Uuid::new_v4();
    let payment = seed_pending_payment(db, user_id, plan.plan_id).await;

    let event = succeeded_event(&payment);
    db.reconcile_payment_event(&event).await.unwrap();

    // Gateway flaps the status away and back again.
    let mut flap = event.clone();
    flap.status = "waiting_for_capture".to_string();
    db.reconcile_payment_event(&flap).await.unwrap();

    let back = db.reconcile_payment_event(&event).await.unwrap();
    assert!(
        matches!(back, ReconcileOutcome::SubscriptionExtended { .. }),
        "a fresh transition into succeeded extends rather than re-creates"
    );

    let subscriptions = db.list_user_subscriptions(user_id, false).await.unwrap();
    assert_eq!(subscriptions.len(), 1);
}

#[tokio::test]
async fn unknown_transaction_is_rejected() {
    let Some(test_db) = TestDb::spawn().await else { return };
    let db = &test_db.db;

    let event = EventDetails {
        transaction_id: format!("tx-{}", Uuid::new_v4()),
        status: "succeeded".to_string(),
        user_id: Uuid::new_v4(),
        plan_id: Uuid::new_v4(),
        payment_method: None,
    };

    let err = db.reconcile_payment_event(&event).await.unwrap_err();
    assert!(matches!(err, AppError::UnknownTransaction(_)));
}

#[tokio::test]
async fn gateway_payment_method_is_stored_on_success() {
    let Some(test_db) = TestDb::spawn().await else { return };
    let db = &test_db.db;

    let plan = seed_plan(db, BillingInterval::Month).await;
    let user_id = Uuid::new_v4();
    let payment = seed_pending_payment(db, user_id, plan.plan_id).await;

    let mut event = succeeded_event(&payment);
    event.payment_method = Some(("bank_card".to_string(), "pm-stored-1".to_string()));

    db.reconcile_payment_event(&event).await.unwrap();

    let methods = db.list_payment_methods(user_id).await.unwrap();
    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0].method_name, "bank_card");
    assert_eq!(methods[0].external_method_id, "pm-stored-1");
}

#[tokio::test]
async fn concurrent_deliveries_apply_the_effect_once() {
    let Some(test_db) = TestDb::spawn().await else { return };
    let db = test_db.db.clone();

    let plan = seed_plan(&db, BillingInterval::Month).await;
    let user_id = Uuid::new_v4();
    let payment = seed_pending_payment(&db, user_id, plan.plan_id).await;
    let event = succeeded_event(&payment);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let db = db.clone();
        let event = event.clone();
        handles.push(tokio::spawn(async move {
            db.reconcile_payment_event(&event).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ReconcileOutcome::SubscriptionCreated { .. } => created += 1,
            ReconcileOutcome::DuplicateDelivery => {}
            other => panic!("unexpected outcome under contention: {:?}", other),
        }
    }

    assert_eq!(created, 1, "exactly one delivery wins the row lock");
    let subscriptions = db.list_user_subscriptions(user_id, false).await.unwrap();
    assert_eq!(subscriptions.len(), 1);
}

#[tokio::test]
async fn duplicate_transaction_id_is_a_conflict() {
    let Some(test_db) = TestDb::spawn().await else { return };
    let db = &test_db.db;

    let plan = seed_plan(db, BillingInterval::Month).await;
    let user_id = Uuid::new_v4();
    let payment = seed_pending_payment(db, user_id, plan.plan_id).await;

    let err = db
        .create_payment(&subscription_service::models::CreatePayment {
            user_id,
            amount: payment.amount,
            currency: payment.currency.clone(),
            plan_id: plan.plan_id,
            method: subscription_service::models::PaymentMethodKind::RuDebitCard,
            kassa: subscription_service::models::PaymentKassa::Yookassa,
            transaction_id: payment.transaction_id.clone(),
            status: "pending".to_string(),
            metadata: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Conflict(_)));
}
