//! Payment models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Gateway status a payment must reach before it affects subscriptions.
pub const STATUS_SUCCEEDED: &str = "succeeded";

/// Payment instrument kinds the gateway supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethodKind {
    RuDebitCard,
    Sbp,
    Sberpay,
    Yoomoney,
}

impl PaymentMethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodKind::RuDebitCard => "RU_DEBIT_CARD",
            PaymentMethodKind::Sbp => "SBP",
            PaymentMethodKind::Sberpay => "SBERPAY",
            PaymentMethodKind::Yoomoney => "YOOMONEY",
        }
    }
}

/// Supported payment gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentKassa {
    Yookassa,
}

impl PaymentKassa {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKassa::Yookassa => "YOOKASSA",
        }
    }
}

/// A payment attempt against a plan.
///
/// `transaction_id` is the gateway-assigned identity: unique and immutable
/// once set. Status is mutated only by the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub plan_id: Uuid,
    pub method: String,
    pub kassa: String,
    pub transaction_id: Option<String>,
    pub status: String,
    pub metadata: Option<serde_json::Value>,
    pub last_update: DateTime<Utc>,
}

/// A reusable gateway instrument token. Append-only; duplicates are
/// harmless since this is a capability record, not a balance.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentMethod {
    pub method_id: i64,
    pub user_id: Uuid,
    pub method_name: String,
    pub external_method_id: String,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a payment record.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub plan_id: Uuid,
    pub method: PaymentMethodKind,
    pub kassa: PaymentKassa,
    pub transaction_id: Option<String>,
    pub status: String,
    pub metadata: Option<serde_json::Value>,
}
