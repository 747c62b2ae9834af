#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use boxoffice_server::config::Config;
use boxoffice_server::gateway::{
    GatewayRegistry, PaymentGateway, PaymentOrder, PaymentOrderStatus, PayoutRequest, PayoutResponse,
    WalletGateway, WebhookEvent, WebhookPayload,
};
use boxoffice_server::models::payout::PayoutStatus;
use boxoffice_server::services::order::OrderService;
use boxoffice_server::services::quota;
use boxoffice_server::utils::error::{AppError, AppResult};

pub const FAKE_GATEWAY: &str = "fakepay";
pub const FAKE_SIGNATURE: &str = "fake-signature";

/// Online gateway double: orders stay pending until confirmed, refunds are
/// recorded, payout requests can be made to fail.
#[derive(Default)]
pub struct FakeGateway {
    pub refunds: Mutex<Vec<String>>,
    pub fail_payouts: AtomicBool,
}

impl FakeGateway {
    pub fn proof_for(reference: &str) -> String {
        format!("paid:{}", reference)
    }

    pub fn refunded(&self) -> Vec<String> {
        self.refunds.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> &'static str {
        FAKE_GATEWAY
    }

    async fn create_order(
        &self,
        _conn: &mut PgConnection,
        _user_id: Uuid,
        amount: Decimal,
        _tag: Option<&str>,
    ) -> AppResult<PaymentOrder> {
        Ok(PaymentOrder {
            id: format!("fake_{}", Uuid::new_v4().simple()),
            amount,
            status: PaymentOrderStatus::Pending,
        })
    }

    async fn confirm_payment(&self, client_proof: &str, stored_reference: &str) -> AppResult<bool> {
        Ok(client_proof == Self::proof_for(stored_reference))
    }

    async fn refund_payment(&self, _conn: &mut PgConnection, reference: &str) -> AppResult<bool> {
        if let Ok(mut refunds) = self.refunds.lock() {
            refunds.push(reference.to_string());
        }
        Ok(true)
    }

    fn get_webhook_details(&self, raw: &[u8], signature: &str) -> AppResult<WebhookPayload> {
        if signature != FAKE_SIGNATURE {
            return Err(AppError::InvalidWebhookSignature);
        }
        let body: serde_json::Value =
            serde_json::from_slice(raw).map_err(|e| AppError::ValidationError(e.to_string()))?;
        let reference = body["reference"].as_str().unwrap_or_default().to_string();
        let event = match body["event"].as_str() {
            Some("payment_success") => WebhookEvent::PaymentSuccess { payment_id: reference },
            Some("payment_failed") => WebhookEvent::PaymentFailed { payment_id: reference },
            Some("payout_success") => WebhookEvent::PayoutSuccess { payout_id: reference },
            Some("payout_failed") => WebhookEvent::PayoutFailed { payout_id: reference },
            Some("ping") => WebhookEvent::NoOp { event: "ping".into() },
            other => return Err(AppError::UnrecognizedWebhookEvent(other.unwrap_or("").into())),
        };
        Ok(WebhookPayload { event, data: body })
    }

    async fn create_payout(&self, request: &PayoutRequest) -> AppResult<PayoutResponse> {
        if self.fail_payouts.load(Ordering::SeqCst) {
            return Err(AppError::ExternalServiceError("payout link rejected".into()));
        }
        Ok(PayoutResponse {
            id: format!("poutlk_{}", Uuid::new_v4().simple()),
            status: PayoutStatus::Pending,
            amount: request.amount,
            payment_link: Some("https://pay.example/link".into()),
        })
    }
}

pub fn webhook_body(event: &str, reference: &str) -> Vec<u8> {
    serde_json::json!({ "event": event, "reference": reference })
        .to_string()
        .into_bytes()
}

pub fn test_config() -> Config {
    let mut config = Config::from_env();
    config.active_payment_gateway = FAKE_GATEWAY.to_string();
    config.pricing.platform_fee = Decimal::new(1000, 2);
    config.pricing.tax_rate = Decimal::new(18, 2);
    config.order_expiry_minutes = 30;
    config.cart_expiry_minutes = 30;
    config.sweep_batch_size = 500;
    config.min_wallet_recharge = Decimal::from(100);
    config.max_wallet_recharge = Decimal::from(10_000);
    config.pricing.min_payable_amount = Decimal::ONE;
    config
}

pub fn order_service(pool: &PgPool, gateway: Arc<FakeGateway>) -> OrderService {
    let config = test_config();
    let registry = GatewayRegistry::new(FAKE_GATEWAY)
        .with(gateway)
        .with(Arc::new(WalletGateway));
    OrderService::new(pool.clone(), Arc::new(config), Arc::new(registry))
}

pub async fn seed_event(pool: &PgPool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO events (id, name) VALUES ($1, 'Summer Fest')")
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
    id
}

pub async fn seed_product(pool: &PgPool, event_id: Uuid, price: Decimal) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO products (id, event_id, name, price) VALUES ($1, $2, 'General admission', $3)")
        .bind(id)
        .bind(event_id)
        .bind(price)
        .execute(pool)
        .await
        .unwrap();
    id
}

pub async fn seed_quota(pool: &PgPool, product_id: Uuid, max_count: i32) -> Uuid {
    let mut conn = pool.acquire().await.unwrap();
    quota::create_quota(&mut conn, "Floor", max_count, None, &[product_id])
        .await
        .unwrap()
        .id
}

pub async fn slots_booked(pool: &PgPool, quota_id: Uuid) -> i32 {
    sqlx::query_scalar::<_, i32>("SELECT slots_booked FROM quotas WHERE id = $1")
        .bind(quota_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn ticket_count(pool: &PgPool, order_id: Uuid) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tickets WHERE order_id = $1 AND NOT is_cancelled")
        .bind(order_id)
        .fetch_one(pool)
        .await
        .unwrap()
}
