use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::cart::Cart;
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Initial,
    Successful,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Ticket,
    Coupon,
    WalletRecharge,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Option<Uuid>,
    pub quantity: Option<i32>,
    pub gross_price: Decimal,
    pub discount_amount: Decimal,
    pub platform_fee: Decimal,
    pub tax: Decimal,
    pub net_price: Decimal,
    pub discount_coupon: Option<String>,
    pub payment_id: Option<String>,
    pub payment_gateway: Option<String>,
    pub status: OrderStatus,
    pub failure_reason: Option<String>,
    pub order_type: OrderType,
    pub applied_quota_ids: Vec<Uuid>,
    pub end_user_discount_percentage: Option<Decimal>,
    pub expires_on: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Limits on wallet recharge orders and the gateway they must not use.
#[derive(Debug, Clone)]
pub struct RechargePolicy {
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub wallet_gateway: String,
}

/// How an order leaves `initial` through cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    Cancelled,
    AlreadyFailed,
}

impl Order {
    /// Snapshot of a priced cart. The cart is linked separately.
    pub fn from_cart(
        cart: &Cart,
        payment_id: Option<String>,
        payment_gateway: Option<String>,
        applied_quota_ids: Vec<Uuid>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: cart.user_id,
            product_id: cart.product_id,
            quantity: Some(cart.quantity),
            gross_price: cart.gross_price,
            discount_amount: cart.discount_amount,
            platform_fee: cart.platform_fee,
            tax: cart.tax,
            net_price: cart.net_price,
            discount_coupon: cart.discount_coupon.clone(),
            payment_id,
            payment_gateway,
            status: OrderStatus::Initial,
            failure_reason: None,
            order_type: cart.order_type(),
            applied_quota_ids,
            end_user_discount_percentage: cart.end_user_discount_percentage,
            expires_on: now + ttl,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn wallet_recharge(
        user_id: Uuid,
        amount: Decimal,
        payment_id: Option<String>,
        payment_gateway: Option<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            product_id: None,
            quantity: None,
            gross_price: amount,
            discount_amount: Decimal::ZERO,
            platform_fee: Decimal::ZERO,
            tax: Decimal::ZERO,
            net_price: amount,
            discount_coupon: None,
            payment_id,
            payment_gateway,
            status: OrderStatus::Initial,
            failure_reason: None,
            order_type: OrderType::WalletRecharge,
            applied_quota_ids: Vec::new(),
            end_user_discount_percentage: None,
            expires_on: now + ttl,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self, recharge: &RechargePolicy) -> AppResult<()> {
        match self.order_type {
            OrderType::Ticket | OrderType::Coupon => {
                if self.quantity.unwrap_or(0) <= 0 {
                    return Err(AppError::ValidationError(
                        "Quantity must be greater than 0".to_string(),
                    ));
                }
                if self.product_id.is_none() {
                    return Err(AppError::ValidationError(
                        "Product is required for this order".to_string(),
                    ));
                }
            }
            OrderType::WalletRecharge => {
                if self.payment_gateway.as_deref() == Some(recharge.wallet_gateway.as_str()) {
                    return Err(AppError::ValidationError(
                        "Cannot recharge wallet using wallet".to_string(),
                    ));
                }
                if self.product_id.is_some() || self.quantity.is_some() {
                    return Err(AppError::ValidationError(
                        "Wallet recharge cannot carry a product".to_string(),
                    ));
                }
                if self.gross_price < recharge.min_amount || self.gross_price > recharge.max_amount {
                    return Err(AppError::RechargeOutOfBounds {
                        min: recharge.min_amount,
                        max: recharge.max_amount,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_on <= now
    }

    pub fn is_terminal(&self) -> bool {
        self.status != OrderStatus::Initial
    }

    pub fn has_payment(&self, min_payable: Decimal) -> bool {
        self.net_price >= min_payable && self.payment_id.is_some()
    }

    pub fn ticket_quantity(&self) -> i32 {
        self.quantity.unwrap_or(0)
    }

    /// initial -> successful. Expired or terminal orders are rejected.
    pub fn mark_successful(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        if self.status != OrderStatus::Initial || self.is_expired(now) {
            return Err(AppError::OrderNotValid);
        }
        self.status = OrderStatus::Successful;
        Ok(())
    }

    /// initial -> failed. Cancelling a failed order is a no-op; a successful
    /// order cannot be cancelled.
    pub fn mark_cancelled(&mut self, reason: &str) -> AppResult<Cancellation> {
        match self.status {
            OrderStatus::Failed => Ok(Cancellation::AlreadyFailed),
            OrderStatus::Successful => Err(AppError::OrderNotValid),
            OrderStatus::Initial => {
                self.status = OrderStatus::Failed;
                self.failure_reason = Some(reason.to_string());
                Ok(Cancellation::Cancelled)
            }
        }
    }

    /// Promoter revenue share for a coupon-backed ticket sale.
    pub fn promoter_share(&self, end_user_discount_percentage: Option<Decimal>) -> Decimal {
        let discount = end_user_discount_percentage.unwrap_or(Decimal::ZERO);
        super::round_money(self.gross_price * (Decimal::ONE_HUNDRED - discount) / Decimal::ONE_HUNDRED)
    }
}
