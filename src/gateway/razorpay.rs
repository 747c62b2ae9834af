//! Razorpay (orders, refunds, payout links, webhooks) over its REST API.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use sqlx::PgConnection;
use uuid::Uuid;

use super::{
    PaymentGateway, PaymentOrder, PaymentOrderStatus, PayoutRequest, PayoutResponse, WebhookEvent,
    WebhookPayload, RAZORPAY_GATEWAY,
};
use crate::config::RazorpayConfig;
use crate::models::payout::PayoutStatus;
use crate::models::round_money;
use crate::utils::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

const CURRENCY: &str = "INR";

/// Events acknowledged without any state change.
const IGNORED_EVENTS: &[&str] = &[
    "payment.authorized",
    "payment.dispute.created",
    "order.paid",
    "refund.created",
    "refund.processed",
    "refund.failed",
    "payout.queued",
    "payout.pending",
    "payout.initiated",
    "payout.updated",
    "payout_link.issued",
    "payout_link.processing",
    "payout_link.attempted",
];

fn to_paise(amount: Decimal) -> AppResult<i64> {
    (round_money(amount) * Decimal::ONE_HUNDRED)
        .trunc()
        .to_i64()
        .ok_or(AppError::InvalidAmount)
}

fn from_paise(paise: i64) -> Decimal {
    Decimal::new(paise, 2)
}

#[cfg(test)]
fn sign(secret: &str, message: &[u8]) -> AppResult<String> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::InternalServerError(format!("Invalid HMAC key: {}", e)))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex HMAC-SHA256 signature.
fn verify_signature(secret: &str, message: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}

fn entity_str<'a>(body: &'a Value, entity: &str, field: &str) -> Option<&'a str> {
    body["payload"][entity]["entity"][field].as_str()
}

fn missing(event: &str, field: &str) -> AppError {
    AppError::ValidationError(format!("Webhook '{}' is missing {}", event, field))
}

/// Maps a verified Razorpay webhook body onto a [`WebhookEvent`].
///
/// Payment events are keyed by the Razorpay order id, which is what checkout
/// stored as the order's `payment_id`. Payout events are keyed by the payout
/// link id stored on the payout when one exists.
fn classify(body: &Value) -> AppResult<WebhookEvent> {
    let event = body["event"]
        .as_str()
        .ok_or_else(|| AppError::UnrecognizedWebhookEvent("<missing>".to_string()))?;

    let payment_reference = || {
        entity_str(body, "payment", "order_id")
            .map(str::to_string)
            .ok_or_else(|| missing(event, "payment.order_id"))
    };
    let payout_reference = || {
        entity_str(body, "payout_link", "id")
            .or_else(|| entity_str(body, "payout", "payout_link_id"))
            .or_else(|| entity_str(body, "payout", "id"))
            .map(str::to_string)
            .ok_or_else(|| missing(event, "payout id"))
    };

    match event {
        "payment.captured" => Ok(WebhookEvent::PaymentSuccess {
            payment_id: payment_reference()?,
        }),
        "payment.failed" => Ok(WebhookEvent::PaymentFailed {
            payment_id: payment_reference()?,
        }),
        "payout.processed" | "payout_link.processed" => Ok(WebhookEvent::PayoutSuccess {
            payout_id: payout_reference()?,
        }),
        "payout.failed" | "payout.rejected" | "payout.reversed" | "payout_link.rejected"
        | "payout_link.cancelled" | "payout_link.expired" => Ok(WebhookEvent::PayoutFailed {
            payout_id: payout_reference()?,
        }),
        other if IGNORED_EVENTS.contains(&other) => Ok(WebhookEvent::NoOp {
            event: other.to_string(),
        }),
        other => Err(AppError::UnrecognizedWebhookEvent(other.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct ClientProof {
    razorpay_payment_id: String,
    razorpay_signature: String,
}

#[derive(Debug, Deserialize)]
struct OrderEntity {
    id: String,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PayoutLinkEntity {
    id: String,
    amount: i64,
    short_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct PayoutContact<'a> {
    name: &'a str,
    contact: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Debug, Serialize)]
struct PayoutLinkRequest<'a> {
    account_number: &'a str,
    contact: PayoutContact<'a>,
    amount: i64,
    currency: &'a str,
    purpose: &'a str,
    description: &'a str,
    receipt: String,
    send_sms: bool,
    send_email: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    expire_by: Option<i64>,
}

pub struct RazorpayGateway {
    config: RazorpayConfig,
    http: Client,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig) -> Self {
        Self {
            config,
            http: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> AppResult<T> {
        let response = request
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
            .send()
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("Razorpay request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalServiceError(format!(
                "Razorpay returned {}: {}",
                status, body
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("Razorpay response unreadable: {}", e)))
    }

    /// Refunds every captured payment made against a Razorpay order.
    async fn refund_order_payments(&self, order_id: &str) -> AppResult<usize> {
        let payments: Collection<PaymentEntity> = self
            .send(self.http.get(self.url(&format!("orders/{}/payments", order_id))))
            .await?;

        let mut refunded = 0;
        for payment in payments.items.iter().filter(|p| p.status == "captured") {
            let _: Value = self
                .send(
                    self.http
                        .post(self.url(&format!("payments/{}/refund", payment.id)))
                        .json(&json!({})),
                )
                .await?;
            refunded += 1;
        }
        Ok(refunded)
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn name(&self) -> &'static str {
        RAZORPAY_GATEWAY
    }

    async fn create_order(
        &self,
        _conn: &mut PgConnection,
        _user_id: Uuid,
        amount: Decimal,
        tag: Option<&str>,
    ) -> AppResult<PaymentOrder> {
        let body = json!({
            "amount": to_paise(amount)?,
            "currency": CURRENCY,
            "payment_capture": 1,
            "receipt": tag,
        });
        let order: OrderEntity = self.send(self.http.post(self.url("orders")).json(&body)).await?;

        tracing::info!(razorpay_order_id = %order.id, amount = %amount, "Razorpay order created");
        Ok(PaymentOrder {
            id: order.id,
            amount: from_paise(order.amount),
            status: PaymentOrderStatus::Pending,
        })
    }

    /// `client_proof` is the checkout handler's JSON
    /// `{razorpay_payment_id, razorpay_signature}`; the signed message is
    /// `order_id|payment_id` under the API secret.
    async fn confirm_payment(&self, client_proof: &str, stored_reference: &str) -> AppResult<bool> {
        let proof: ClientProof = match serde_json::from_str(client_proof) {
            Ok(proof) => proof,
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable Razorpay payment proof");
                return Ok(false);
            }
        };
        let message = format!("{}|{}", stored_reference, proof.razorpay_payment_id);
        Ok(verify_signature(
            &self.config.api_secret,
            message.as_bytes(),
            &proof.razorpay_signature,
        ))
    }

    async fn refund_payment(&self, _conn: &mut PgConnection, reference: &str) -> AppResult<bool> {
        match self.refund_order_payments(reference).await {
            Ok(count) => {
                tracing::info!(razorpay_order_id = %reference, refunded = count, "Razorpay refund issued");
                Ok(true)
            }
            Err(e) => {
                tracing::error!(razorpay_order_id = %reference, error = %e, "Razorpay refund failed");
                Ok(false)
            }
        }
    }

    fn get_webhook_details(&self, raw: &[u8], signature: &str) -> AppResult<WebhookPayload> {
        if !verify_signature(&self.config.webhook_secret, raw, signature) {
            return Err(AppError::InvalidWebhookSignature);
        }
        let body: Value = serde_json::from_slice(raw)
            .map_err(|e| AppError::ValidationError(format!("Malformed webhook body: {}", e)))?;
        let event = classify(&body)?;
        Ok(WebhookPayload {
            event,
            data: body["payload"].clone(),
        })
    }

    async fn create_payout(&self, request: &PayoutRequest) -> AppResult<PayoutResponse> {
        let body = PayoutLinkRequest {
            account_number: &self.config.account_number,
            contact: PayoutContact {
                name: &request.name,
                contact: &request.phone_number,
                kind: "customer",
            },
            amount: to_paise(request.amount)?,
            currency: CURRENCY,
            purpose: "refund",
            description: &request.description,
            receipt: format!("Payout for {}", request.user_id),
            send_sms: true,
            send_email: false,
            expire_by: self
                .config
                .payout_expiry_secs
                .map(|secs| chrono::Utc::now().timestamp() + secs),
        };
        let link: PayoutLinkEntity = self
            .send(self.http.post(self.url("payout-links")).json(&body))
            .await?;

        tracing::info!(payout_link_id = %link.id, user_id = %request.user_id, "Razorpay payout link issued");
        Ok(PayoutResponse {
            id: link.id,
            status: PayoutStatus::Pending,
            amount: from_paise(link.amount),
            payment_link: link.short_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn gateway() -> RazorpayGateway {
        RazorpayGateway::new(RazorpayConfig {
            api_key: "rzp_test_key".into(),
            api_secret: "api_secret".into(),
            webhook_secret: "hook_secret".into(),
            account_number: "7878780080857996".into(),
            base_url: "http://localhost:9".into(),
            payout_expiry_secs: None,
        })
    }

    #[test]
    fn paise_conversion() {
        assert_eq!(to_paise(dec!(1014.80)).unwrap(), 101_480);
        assert_eq!(to_paise(dec!(0.005)).unwrap(), 1);
        assert_eq!(from_paise(101_480), dec!(1014.80));
    }

    #[tokio::test]
    async fn payment_proof_signature() {
        let gateway = gateway();
        let signature = sign("api_secret", b"order_abc|pay_xyz").unwrap();
        let proof = json!({
            "razorpay_payment_id": "pay_xyz",
            "razorpay_signature": signature,
        })
        .to_string();

        assert!(gateway.confirm_payment(&proof, "order_abc").await.unwrap());
        assert!(!gateway.confirm_payment(&proof, "order_other").await.unwrap());
        assert!(!gateway.confirm_payment("not json", "order_abc").await.unwrap());
    }

    #[test]
    fn webhook_signature_is_checked_before_parsing() {
        let gateway = gateway();
        let body = br#"{"event":"payment.captured"}"#;
        assert!(matches!(
            gateway.get_webhook_details(body, "deadbeef"),
            Err(AppError::InvalidWebhookSignature)
        ));
        assert!(matches!(
            gateway.get_webhook_details(body, "not-hex"),
            Err(AppError::InvalidWebhookSignature)
        ));
    }

    #[test]
    fn captured_payment_maps_to_order_reference() {
        let gateway = gateway();
        let body = json!({
            "event": "payment.captured",
            "payload": {"payment": {"entity": {"id": "pay_1", "order_id": "order_1", "amount": 5000}}}
        })
        .to_string();
        let signature = sign("hook_secret", body.as_bytes()).unwrap();

        let details = gateway.get_webhook_details(body.as_bytes(), &signature).unwrap();
        assert_eq!(
            details.event,
            WebhookEvent::PaymentSuccess {
                payment_id: "order_1".into()
            }
        );
    }

    #[test]
    fn payout_events() {
        let processed = json!({
            "event": "payout.processed",
            "payload": {"payout": {"entity": {"id": "pout_1", "payout_link_id": "poutlk_1"}}}
        });
        assert_eq!(
            classify(&processed).unwrap(),
            WebhookEvent::PayoutSuccess {
                payout_id: "poutlk_1".into()
            }
        );

        let rejected = json!({
            "event": "payout.rejected",
            "payload": {"payout": {"entity": {"id": "pout_2"}}}
        });
        assert_eq!(
            classify(&rejected).unwrap(),
            WebhookEvent::PayoutFailed {
                payout_id: "pout_2".into()
            }
        );
    }

    #[test]
    fn ignorable_and_unknown_events() {
        assert_eq!(
            classify(&json!({"event": "order.paid"})).unwrap(),
            WebhookEvent::NoOp {
                event: "order.paid".into()
            }
        );
        assert!(matches!(
            classify(&json!({"event": "subscription.charged"})),
            Err(AppError::UnrecognizedWebhookEvent(_))
        ));
        assert!(classify(&json!({"event": "payment.failed", "payload": {}})).is_err());
    }
}
