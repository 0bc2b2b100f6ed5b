//! YooKassa payment gateway client.
//!
//! Implements payment-intent creation against the YooKassa Payments API and
//! the webhook payload types the reconciler consumes.

use anyhow::anyhow;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::config::YookassaConfig;

/// YooKassa client for interacting with the YooKassa Payments API.
#[derive(Clone)]
pub struct YookassaClient {
    client: Client,
    config: YookassaConfig,
}

#[derive(Debug, Serialize)]
struct AmountBody {
    value: String,
    currency: String,
}

#[derive(Debug, Serialize)]
struct ConfirmationBody {
    #[serde(rename = "type")]
    kind: String,
    return_url: String,
}

#[derive(Debug, Serialize)]
struct IntentMetadata {
    user_id: Uuid,
    subscription_plan_id: Uuid,
}

/// Request to create a YooKassa payment intent.
#[derive(Debug, Serialize)]
struct CreateIntentRequest {
    amount: AmountBody,
    capture: bool,
    confirmation: ConfirmationBody,
    description: String,
    metadata: IntentMetadata,
}

/// Remote payment intent as returned by YooKassa.
#[derive(Debug, Deserialize)]
pub struct PaymentIntent {
    /// Gateway-assigned transaction identity.
    pub id: String,
    /// Intent status (usually "pending" at creation).
    pub status: String,
    pub confirmation: Option<IntentConfirmation>,
}

#[derive(Debug, Deserialize)]
pub struct IntentConfirmation {
    pub confirmation_url: Option<String>,
}

impl PaymentIntent {
    /// Redirect URL the client must visit to confirm the payment.
    pub fn confirmation_url(&self) -> Option<&str> {
        self.confirmation
            .as_ref()
            .and_then(|c| c.confirmation_url.as_deref())
    }
}

/// YooKassa API error response.
#[derive(Debug, Deserialize)]
struct GatewayError {
    code: Option<String>,
    description: Option<String>,
}

impl YookassaClient {
    /// Create a new YooKassa client.
    pub fn new(config: YookassaConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if YooKassa is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.shop_id.is_empty() && !self.config.secret_key.expose_secret().is_empty()
    }

    /// Create a remote payment intent.
    ///
    /// `idempotency_key` must be fresh per logical attempt: a retried
    /// creation call carries a new key and cannot mint a second remote
    /// intent for one user action.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
        description: &str,
        return_url: &str,
        user_id: Uuid,
        plan_id: Uuid,
        idempotency_key: Uuid,
    ) -> Result<PaymentIntent, AppError> {
        if !self.is_configured() {
            return Err(AppError::ConfigError(anyhow!(
                "YooKassa credentials not configured"
            )));
        }

        let request = CreateIntentRequest {
            amount: AmountBody {
                value: amount.to_string(),
                currency: currency.to_string(),
            },
            capture: true,
            confirmation: ConfirmationBody {
                kind: "redirect".to_string(),
                return_url: return_url.to_string(),
            },
            description: description.to_string(),
            metadata: IntentMetadata {
                user_id,
                subscription_plan_id: plan_id,
            },
        };

        let url = format!("{}/payments", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(
                &self.config.shop_id,
                Some(self.config.secret_key.expose_secret()),
            )
            .header("Idempotence-Key", idempotency_key.to_string())
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::BadGateway(format!("YooKassa request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::BadGateway(format!("YooKassa response unreadable: {}", e)))?;

        tracing::debug!(status = %status, body = %body, "YooKassa create_intent response");

        if status.is_success() {
            let intent: PaymentIntent = serde_json::from_str(&body).map_err(|e| {
                AppError::BadGateway(format!("YooKassa returned an unparseable intent: {}", e))
            })?;
            tracing::info!(
                intent_id = %intent.id,
                status = %intent.status,
                "YooKassa payment intent created"
            );
            Ok(intent)
        } else {
            let error: GatewayError = serde_json::from_str(&body).unwrap_or(GatewayError {
                code: None,
                description: None,
            });
            let code = error.code.unwrap_or_else(|| "UNKNOWN".to_string());
            let description = error.description.unwrap_or(body);
            tracing::error!(
                code = %code,
                description = %description,
                "YooKassa intent creation failed"
            );
            Err(AppError::BadGateway(format!(
                "YooKassa error: {} - {}",
                code, description
            )))
        }
    }
}

/// Webhook notification payload delivered by YooKassa.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub object: WebhookObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub payment_method: Option<WebhookPaymentMethod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPaymentMethod {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Validated view of one webhook event.
///
/// Structural problems surface as `MalformedEvent` before any state is
/// touched.
#[derive(Debug, Clone)]
pub struct EventDetails {
    pub transaction_id: String,
    pub status: String,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    /// (instrument kind, gateway token) when the gateway exposed a reusable
    /// instrument.
    pub payment_method: Option<(String, String)>,
}

impl EventDetails {
    pub fn from_event(event: &WebhookEvent) -> Result<Self, AppError> {
        let transaction_id = event
            .object
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::MalformedEvent("missing object.id".to_string()))?;

        let status = event
            .object
            .status
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::MalformedEvent("missing object.status".to_string()))?;

        let metadata = event
            .object
            .metadata
            .as_ref()
            .and_then(|m| m.as_object())
            .ok_or_else(|| AppError::MalformedEvent("missing object.metadata".to_string()))?;

        let user_id = metadata
            .get("user_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::MalformedEvent("missing metadata.user_id".to_string()))?;
        let user_id = Uuid::parse_str(user_id)
            .map_err(|_| AppError::MalformedEvent("metadata.user_id is not a UUID".to_string()))?;

        let plan_id = metadata
            .get("subscription_plan_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AppError::MalformedEvent("missing metadata.subscription_plan_id".to_string())
            })?;
        let plan_id = Uuid::parse_str(plan_id).map_err(|_| {
            AppError::MalformedEvent("metadata.subscription_plan_id is not a UUID".to_string())
        })?;

        let payment_method = event.object.payment_method.as_ref().and_then(|pm| {
            pm.id
                .clone()
                .filter(|id| !id.is_empty())
                .map(|id| (pm.kind.clone().unwrap_or_else(|| "card".to_string()), id))
        });

        Ok(Self {
            transaction_id,
            status,
            user_id,
            plan_id,
            payment_method,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_base_url: String) -> YookassaConfig {
        YookassaConfig {
            shop_id: "test-shop".to_string(),
            secret_key: Secret::new("test-key".to_string()),
            api_base_url,
            return_url: "https://app.example/payment/success".to_string(),
        }
    }

    fn event(value: serde_json::Value) -> WebhookEvent {
        serde_json::from_value(value).expect("webhook payload deserializes")
    }

    #[test]
    fn test_is_configured() {
        let client = YookassaClient::new(test_config("https://api.yookassa.ru/v3".to_string()));
        assert!(client.is_configured());

        let empty = YookassaConfig {
            shop_id: String::new(),
            secret_key: Secret::new(String::new()),
            api_base_url: String::new(),
            return_url: String::new(),
        };
        let client = YookassaClient::new(empty);
        assert!(!client.is_configured());
    }

    #[tokio::test]
    async fn create_intent_sends_idempotency_key_and_metadata() {
        let server = MockServer::start().await;
        let user_id = Uuid::new_v4();
        let plan_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path("/payments"))
            .and(header_exists("Idempotence-Key"))
            .and(body_partial_json(json!({
                "amount": { "value": "9.99", "currency": "RUB" },
                "capture": true,
                "metadata": {
                    "user_id": user_id,
                    "subscription_plan_id": plan_id
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "2e52e1d4-000f-5000-9000-1db2b8a8a97d",
                "status": "pending",
                "confirmation": {
                    "type": "redirect",
                    "confirmation_url": "https://yookassa.example/confirm"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = YookassaClient::new(test_config(server.uri()));
        let intent = client
            .create_intent(
                Decimal::new(999, 2),
                "RUB",
                "Subscription payment",
                "https://app.example/payment/success",
                user_id,
                plan_id,
                Uuid::new_v4(),
            )
            .await
            .unwrap();

        assert_eq!(intent.status, "pending");
        assert_eq!(
            intent.confirmation_url(),
            Some("https://yookassa.example/confirm")
        );
    }

    #[tokio::test]
    async fn gateway_error_surfaces_as_bad_gateway() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/payments"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "type": "error",
                "code": "invalid_request",
                "description": "Invalid currency"
            })))
            .mount(&server)
            .await;

        let client = YookassaClient::new(test_config(server.uri()));
        let err = client
            .create_intent(
                Decimal::ONE,
                "XXX",
                "Subscription payment",
                "https://app.example/payment/success",
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::BadGateway(_)));
    }

    #[test]
    fn valid_event_yields_details() {
        let user_id = Uuid::new_v4();
        let plan_id = Uuid::new_v4();
        let event = event(json!({
            "event": "payment.succeeded",
            "object": {
                "id": "tx-42",
                "status": "succeeded",
                "metadata": {
                    "user_id": user_id,
                    "subscription_plan_id": plan_id
                },
                "payment_method": { "id": "pm-1", "type": "bank_card" }
            }
        }));

        let details = EventDetails::from_event(&event).unwrap();
        assert_eq!(details.transaction_id, "tx-42");
        assert_eq!(details.status, "succeeded");
        assert_eq!(details.user_id, user_id);
        assert_eq!(details.plan_id, plan_id);
        assert_eq!(
            details.payment_method,
            Some(("bank_card".to_string(), "pm-1".to_string()))
        );
    }

    #[test]
    fn event_missing_user_id_is_malformed() {
        let event = event(json!({
            "event": "payment.succeeded",
            "object": {
                "id": "tx-42",
                "status": "succeeded",
                "metadata": { "subscription_plan_id": Uuid::new_v4() }
            }
        }));

        let err = EventDetails::from_event(&event).unwrap_err();
        assert!(matches!(err, AppError::MalformedEvent(_)));
    }

    #[test]
    fn event_missing_id_is_malformed() {
        let event = event(json!({
            "event": "payment.succeeded",
            "object": {
                "status": "succeeded",
                "metadata": {
                    "user_id": Uuid::new_v4(),
                    "subscription_plan_id": Uuid::new_v4()
                }
            }
        }));

        let err = EventDetails::from_event(&event).unwrap_err();
        assert!(matches!(err, AppError::MalformedEvent(_)));
    }
}
