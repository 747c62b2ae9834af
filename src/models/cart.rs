use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::order::OrderType;
use super::round_money;
use crate::config::PricingConfig;
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "cart_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    Initial,
    Freed,
    OrderCreated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Online,
    Wallet,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Cart {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Option<Uuid>,
    pub quantity: i32,
    pub discount_coupon: Option<String>,
    pub gross_price: Decimal,
    pub discount_amount: Decimal,
    pub platform_fee: Decimal,
    pub tax: Decimal,
    pub net_price: Decimal,
    pub end_user_discount_percentage: Option<Decimal>,
    pub applied_promo_ids: Vec<Uuid>,
    pub payment_mode: PaymentMode,
    pub status: CartStatus,
    pub is_promoter: bool,
    pub order_id: Option<Uuid>,
    pub expires_on: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full price breakdown derived from gross price and the promotion outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceBreakdown {
    pub gross_price: Decimal,
    pub discount_amount: Decimal,
    pub platform_fee: Decimal,
    pub tax: Decimal,
    pub net_price: Decimal,
    pub applied_promo_ids: Vec<Uuid>,
    pub end_user_discount_percentage: Option<Decimal>,
}

impl PriceBreakdown {
    /// Fee is skipped for a fully discounted cart; tax applies to discounted
    /// price plus fee.
    pub fn compute(
        gross_price: Decimal,
        discounted_price: Decimal,
        applied_promo_ids: Vec<Uuid>,
        end_user_discount_percentage: Option<Decimal>,
        pricing: &PricingConfig,
    ) -> Self {
        let gross_price = round_money(gross_price);
        let discounted = round_money(discounted_price.max(Decimal::ZERO));
        let platform_fee = if discounted > Decimal::ZERO {
            pricing.platform_fee
        } else {
            Decimal::ZERO
        };
        let tax = round_money(pricing.tax_rate * (discounted + platform_fee));
        Self {
            gross_price,
            discount_amount: (gross_price - discounted).max(Decimal::ZERO),
            platform_fee,
            tax,
            net_price: discounted + platform_fee + tax,
            applied_promo_ids,
            end_user_discount_percentage,
        }
    }
}

impl Cart {
    pub fn new(
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        is_promoter: bool,
        ttl: Duration,
    ) -> AppResult<Self> {
        if quantity < 1 {
            return Err(AppError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            product_id: Some(product_id),
            quantity,
            discount_coupon: None,
            gross_price: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            platform_fee: Decimal::ZERO,
            tax: Decimal::ZERO,
            net_price: Decimal::ZERO,
            end_user_discount_percentage: None,
            applied_promo_ids: Vec::new(),
            payment_mode: PaymentMode::Online,
            status: CartStatus::Initial,
            is_promoter,
            order_id: None,
            expires_on: now + ttl,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_on <= now || self.status == CartStatus::Freed
    }

    pub fn can_modify(&self, now: DateTime<Utc>) -> bool {
        self.status == CartStatus::Initial && !self.is_expired(now)
    }

    pub fn ensure_modifiable(&self, now: DateTime<Utc>) -> AppResult<()> {
        if self.can_modify(now) {
            Ok(())
        } else {
            Err(AppError::CartNotModifiable)
        }
    }

    pub fn require_product(&self) -> AppResult<Uuid> {
        self.product_id.ok_or(AppError::ProductUnavailable)
    }

    pub fn order_type(&self) -> OrderType {
        if self.is_promoter {
            OrderType::Coupon
        } else {
            OrderType::Ticket
        }
    }

    pub fn apply_breakdown(&mut self, breakdown: PriceBreakdown) {
        self.gross_price = breakdown.gross_price;
        self.discount_amount = breakdown.discount_amount;
        self.platform_fee = breakdown.platform_fee;
        self.tax = breakdown.tax;
        self.net_price = breakdown.net_price;
        self.applied_promo_ids = breakdown.applied_promo_ids;
        self.end_user_discount_percentage = breakdown.end_user_discount_percentage;
    }

    /// initial -> freed. Terminal carts cannot be freed again.
    pub fn free(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        self.ensure_modifiable(now)?;
        self.status = CartStatus::Freed;
        Ok(())
    }

    /// Used by the expiry sweep, where the cart is already past `expires_on`.
    pub fn free_expired(&mut self) -> AppResult<()> {
        if self.status != CartStatus::Initial {
            return Err(AppError::CartNotModifiable);
        }
        self.status = CartStatus::Freed;
        Ok(())
    }
}
