use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::product::Product;
use super::quota::Quota;
use super::round_money;
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "promo_user_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PromoUserType {
    All,
    Promoter,
    EndUser,
}

impl PromoUserType {
    pub fn matches(self, is_promoter: bool) -> bool {
        match self {
            PromoUserType::All => true,
            PromoUserType::Promoter => is_promoter,
            PromoUserType::EndUser => !is_promoter,
        }
    }
}

/// Percentage and fixed discounts are mutually exclusive, both when stored and
/// when applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Discount {
    Percentage(Decimal),
    Fixed(Decimal),
}

impl Discount {
    pub fn from_columns(percentage: Option<Decimal>, fixed: Option<Decimal>) -> AppResult<Self> {
        match (percentage, fixed) {
            (Some(p), None) => Ok(Discount::Percentage(p)),
            (None, Some(f)) => Ok(Discount::Fixed(f)),
            (None, None) => Err(AppError::ValidationError(
                "Either discount percentage or fixed discount must be set".to_string(),
            )),
            (Some(_), Some(_)) => Err(AppError::ValidationError(
                "Discount percentage and fixed discount cannot be set together".to_string(),
            )),
        }
    }

    pub fn percentage(&self) -> Option<Decimal> {
        match self {
            Discount::Percentage(p) => Some(*p),
            Discount::Fixed(_) => None,
        }
    }

    pub fn fixed(&self) -> Option<Decimal> {
        match self {
            Discount::Percentage(_) => None,
            Discount::Fixed(f) => Some(*f),
        }
    }
}

/// Row as stored; see [`Promotion`] for the validated form.
#[derive(Debug, Clone, FromRow)]
pub struct PromotionRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub all_products: bool,
    pub code: Option<String>,
    pub is_listed: bool,
    pub is_active: bool,
    pub discount_percentage: Option<Decimal>,
    pub discount_fixed: Option<Decimal>,
    pub min_order_value: Option<Decimal>,
    pub max_order_value: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    pub min_quantity: i32,
    pub max_quantity: Option<i32>,
    pub quantity_step: i32,
    pub owner_id: Option<Uuid>,
    pub priority: i32,
    pub applicable_user_type: PromoUserType,
    pub end_user_discount_percentage: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promotion {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub code: Option<String>,
    pub is_listed: bool,
    pub is_active: bool,
    pub discount: Discount,
    pub min_order_value: Option<Decimal>,
    pub max_order_value: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    pub min_quantity: i32,
    pub max_quantity: Option<i32>,
    pub quantity_step: i32,
    pub owner_id: Option<Uuid>,
    pub priority: i32,
    pub applicable_user_type: PromoUserType,
    pub end_user_discount_percentage: Option<Decimal>,
    /// Explicit product scope; empty means every product of the event.
    pub product_ids: Vec<Uuid>,
    /// Quota owned by this promotion, capping its redemptions.
    pub quota: Option<Quota>,
    pub created_at: DateTime<Utc>,
}

/// The slice of a cart the eligibility predicate looks at.
#[derive(Debug, Clone, Copy)]
pub struct CartSnapshot<'a> {
    pub product: &'a Product,
    pub quantity: i32,
    pub gross_price: Decimal,
    pub is_promoter: bool,
}

impl Promotion {
    pub fn from_row(row: PromotionRow, product_ids: Vec<Uuid>, quota: Option<Quota>) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            event_id: row.event_id,
            name: row.name,
            description: row.description,
            code: row.code,
            is_listed: row.is_listed,
            is_active: row.is_active,
            discount: Discount::from_columns(row.discount_percentage, row.discount_fixed)?,
            min_order_value: row.min_order_value,
            max_order_value: row.max_order_value,
            max_discount: row.max_discount,
            min_quantity: row.min_quantity,
            max_quantity: row.max_quantity,
            quantity_step: row.quantity_step,
            owner_id: row.owner_id,
            priority: row.priority,
            applicable_user_type: row.applicable_user_type,
            end_user_discount_percentage: row.end_user_discount_percentage,
            product_ids,
            quota,
            created_at: row.created_at,
        })
    }

    pub fn all_products(&self) -> bool {
        self.product_ids.is_empty()
    }

    pub fn is_promoter_issued(&self) -> bool {
        self.owner_id.is_some()
    }

    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: &str| Err(AppError::ValidationError(msg.to_string()));
        let hundred = Decimal::ONE_HUNDRED;

        if let Some(p) = self.end_user_discount_percentage {
            if p < Decimal::ZERO || p > hundred {
                return invalid("End user discount percentage must be between 0 and 100");
            }
        }
        match self.discount {
            Discount::Percentage(p) if p < Decimal::ZERO || p > hundred => {
                return invalid("Discount percentage must be between 0 and 100");
            }
            Discount::Fixed(f) if f < Decimal::ZERO => {
                return invalid("Fixed discount must not be negative");
            }
            _ => {}
        }
        if self.min_order_value.is_some_and(|v| v < Decimal::ZERO) {
            return invalid("Minimum order value must be positive");
        }
        if let (Some(min), Some(max)) = (self.min_order_value, self.max_order_value) {
            if max < min {
                return invalid(
                    "Maximum order value must be greater than or equal to minimum order value",
                );
            }
        }
        if self.max_discount.is_some_and(|v| v < Decimal::ZERO) {
            return invalid("Maximum discount must be positive");
        }
        if self.min_quantity < 1 {
            return invalid("Minimum quantity must be at least 1");
        }
        if self.max_quantity.is_some_and(|max| max < self.min_quantity) {
            return invalid("Maximum quantity must be greater than or equal to minimum quantity");
        }
        if self.quantity_step < 1 {
            return invalid("Quantity step must be at least 1");
        }
        Ok(())
    }

    pub fn check_order_value(&self, order_value: Decimal) -> bool {
        if self.min_order_value.is_some_and(|min| order_value < min) {
            return false;
        }
        if self.max_order_value.is_some_and(|max| order_value > max) {
            return false;
        }
        true
    }

    pub fn check_quantity(&self, quantity: i32) -> bool {
        if quantity < self.min_quantity {
            return false;
        }
        if self.max_quantity.is_some_and(|max| quantity > max) {
            return false;
        }
        (quantity - self.min_quantity) % self.quantity_step == 0
    }

    pub fn can_apply(&self, cart: &CartSnapshot<'_>) -> bool {
        if !self.is_active {
            return false;
        }
        if !self.check_order_value(cart.gross_price) || !self.check_quantity(cart.quantity) {
            return false;
        }
        if !self.applicable_user_type.matches(cart.is_promoter) {
            return false;
        }
        if cart.product.event_id != self.event_id {
            return false;
        }
        if !self.all_products() && !self.product_ids.contains(&cart.product.id) {
            return false;
        }
        match &self.quota {
            Some(quota) => quota.can_reserve(cart.quantity),
            None => true,
        }
    }

    /// Price after this promotion alone. The reduction is capped by
    /// `max_discount` and the result never drops below zero.
    pub fn calculate_new_price(&self, price: Decimal) -> Decimal {
        let discounted = match self.discount {
            Discount::Percentage(p) => price * (Decimal::ONE - p / Decimal::ONE_HUNDRED),
            Discount::Fixed(f) => price - f,
        };
        let discounted = match self.max_discount {
            Some(cap) => discounted.max(price - cap),
            None => discounted,
        };
        round_money(discounted.max(Decimal::ZERO))
    }
}
