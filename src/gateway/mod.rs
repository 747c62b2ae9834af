//! Payment gateway abstraction.
//!
//! Each provider implements [`PaymentGateway`]. Instances are built once at
//! start-up into a [`GatewayRegistry`] and looked up by the name stored on
//! orders and payouts, so a historical order always resolves to the gateway
//! that handled it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::config::Config;
use crate::models::payout::PayoutStatus;
use crate::utils::error::{AppError, AppResult};

pub mod razorpay;
pub mod wallet;

pub use razorpay::RazorpayGateway;
pub use wallet::WalletGateway;

pub const WALLET_GATEWAY: &str = "wallet";
pub const RAZORPAY_GATEWAY: &str = "razorpay";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOrderStatus {
    Pending,
    Success,
    Failed,
}

/// A charge requested from a gateway. `id` is what gets stored as the
/// order's `payment_id`.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOrder {
    pub id: String,
    pub amount: Decimal,
    pub status: PaymentOrderStatus,
}

/// Gateway-neutral classification of an inbound webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentSuccess { payment_id: String },
    PaymentFailed { payment_id: String },
    PayoutSuccess { payout_id: String },
    PayoutFailed { payout_id: String },
    /// A recognised event that needs no action.
    NoOp { event: String },
}

#[derive(Debug, Clone)]
pub struct WebhookPayload {
    pub event: WebhookEvent,
    pub data: Value,
}

#[derive(Debug, Clone)]
pub struct PayoutRequest {
    pub amount: Decimal,
    pub user_id: Uuid,
    pub name: String,
    pub phone_number: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct PayoutResponse {
    pub id: String,
    pub status: PayoutStatus,
    pub amount: Decimal,
    pub payment_link: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// True when `create_order` moves money on the caller's transaction
    /// instead of calling out. Such gateways run after quotas are reserved.
    fn settles_in_transaction(&self) -> bool {
        false
    }

    /// Requests a charge. Runs on the checkout transaction's connection so
    /// in-house gateways can move money atomically with the order.
    async fn create_order(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        amount: Decimal,
        tag: Option<&str>,
    ) -> AppResult<PaymentOrder>;

    /// Checks a client-supplied payment proof against the stored reference.
    async fn confirm_payment(&self, client_proof: &str, stored_reference: &str) -> AppResult<bool>;

    /// Returns the money for a stored payment reference. `false` means the
    /// gateway declined and the failure has been logged.
    async fn refund_payment(&self, conn: &mut PgConnection, reference: &str) -> AppResult<bool>;

    /// Verifies the signature and classifies the event. Nothing is processed
    /// when verification fails.
    fn get_webhook_details(&self, raw: &[u8], signature: &str) -> AppResult<WebhookPayload>;

    async fn create_payout(&self, request: &PayoutRequest) -> AppResult<PayoutResponse>;
}

/// Gateways keyed by name, plus the one used for new online payments.
#[derive(Clone)]
pub struct GatewayRegistry {
    gateways: HashMap<&'static str, Arc<dyn PaymentGateway>>,
    active: String,
}

impl GatewayRegistry {
    pub fn new(active: impl Into<String>) -> Self {
        Self {
            gateways: HashMap::new(),
            active: active.into(),
        }
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.name(), gateway);
        self
    }

    /// Razorpay and the in-house wallet, with `ACTIVE_PAYMENT_GATEWAY` for
    /// online payments.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.active_payment_gateway.clone())
            .with(Arc::new(RazorpayGateway::new(config.razorpay.clone())))
            .with(Arc::new(WalletGateway))
    }

    pub fn get(&self, name: &str) -> AppResult<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Payment gateway '{}'", name)))
    }

    pub fn active(&self) -> AppResult<Arc<dyn PaymentGateway>> {
        self.get(&self.active)
    }

    pub fn active_name(&self) -> &str {
        &self.active
    }

    pub fn wallet(&self) -> AppResult<Arc<dyn PaymentGateway>> {
        self.get(WALLET_GATEWAY)
    }
}
