//! Promotion engine: which offers apply to a cart, and in what order.

use std::collections::HashMap;

use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::product::Product;
use crate::models::promotion::{CartSnapshot, Discount, PromoUserType, Promotion, PromotionRow};
use crate::models::quota::Quota;
use crate::utils::error::{AppError, AppResult};

/// Discounted price before fee and tax, plus what produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionOutcome {
    pub discounted_price: Decimal,
    pub applied_promo_ids: Vec<Uuid>,
    pub end_user_discount_percentage: Option<Decimal>,
}

/// Applies eligible system promotions by ascending priority, then the coupon.
///
/// The coupon must itself be eligible or the whole evaluation fails with
/// `CouponNotApplicable`. The reported end-user discount is the maximum over
/// applied promotions, not a product of them.
pub fn evaluate(
    cart: &CartSnapshot<'_>,
    system_promotions: &[Promotion],
    coupon: Option<&Promotion>,
) -> AppResult<PromotionOutcome> {
    if let Some(coupon) = coupon {
        if !coupon.can_apply(cart) {
            return Err(AppError::CouponNotApplicable);
        }
    }

    let mut ordered: Vec<&Promotion> = system_promotions
        .iter()
        .filter(|p| p.code.is_none())
        .collect();
    ordered.sort_by_key(|p| (p.priority, p.created_at, p.id));
    ordered.extend(coupon);

    let mut price = cart.gross_price;
    let mut applied_promo_ids = Vec::new();
    let mut end_user_discount_percentage: Option<Decimal> = None;

    for promo in ordered {
        if !promo.can_apply(cart) {
            continue;
        }
        price = promo.calculate_new_price(price);
        applied_promo_ids.push(promo.id);
        if let Some(pct) = promo.end_user_discount_percentage {
            end_user_discount_percentage = Some(match end_user_discount_percentage {
                Some(current) => current.max(pct),
                None => pct,
            });
        }
    }

    Ok(PromotionOutcome {
        discounted_price: price,
        applied_promo_ids,
        end_user_discount_percentage,
    })
}

async fn hydrate(conn: &mut PgConnection, rows: Vec<PromotionRow>) -> AppResult<Vec<Promotion>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

    let links = sqlx::query_as::<_, (Uuid, Uuid)>(
        "SELECT promotion_id, product_id FROM promotion_products WHERE promotion_id = ANY($1)",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;
    let mut products: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (promotion_id, product_id) in links {
        products.entry(promotion_id).or_default().push(product_id);
    }

    let quotas = sqlx::query_as::<_, Quota>("SELECT * FROM quotas WHERE promotion_id = ANY($1)")
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;
    let mut quotas: HashMap<Uuid, Quota> = quotas
        .into_iter()
        .filter_map(|q| q.promotion_id.map(|id| (id, q)))
        .collect();

    rows.into_iter()
        .map(|row| {
            let id = row.id;
            Promotion::from_row(row, products.remove(&id).unwrap_or_default(), quotas.remove(&id))
        })
        .collect()
}

/// Active, code-less promotions of an event, in application order.
pub async fn active_system_promotions(conn: &mut PgConnection, event_id: Uuid) -> AppResult<Vec<Promotion>> {
    let rows = sqlx::query_as::<_, PromotionRow>(
        "SELECT * FROM promotions
         WHERE event_id = $1 AND is_active AND code IS NULL
         ORDER BY priority, created_at, id",
    )
    .bind(event_id)
    .fetch_all(&mut *conn)
    .await?;
    hydrate(conn, rows).await
}

pub async fn promotion_by_code(conn: &mut PgConnection, code: &str) -> AppResult<Option<Promotion>> {
    let row = sqlx::query_as::<_, PromotionRow>("SELECT * FROM promotions WHERE code = $1")
        .bind(code)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => Ok(hydrate(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

/// Ids out of `promotion_ids` that are still active for the event.
pub async fn still_active(conn: &mut PgConnection, event_id: Uuid, promotion_ids: &[Uuid]) -> AppResult<Vec<Uuid>> {
    if promotion_ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM promotions WHERE event_id = $1 AND is_active AND id = ANY($2)",
    )
    .bind(event_id)
    .bind(promotion_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Listed, active promotions an end user can see for a product.
pub async fn list_for_product(conn: &mut PgConnection, product: &Product) -> AppResult<Vec<Promotion>> {
    let rows = sqlx::query_as::<_, PromotionRow>(
        "SELECT p.* FROM promotions p
         WHERE p.event_id = $1 AND p.is_listed AND p.is_active
           AND (p.all_products OR EXISTS (
                SELECT 1 FROM promotion_products pp
                WHERE pp.promotion_id = p.id AND pp.product_id = $2))
         ORDER BY p.priority, p.created_at, p.id",
    )
    .bind(product.event_id)
    .bind(product.id)
    .fetch_all(&mut *conn)
    .await?;
    hydrate(conn, rows).await
}

/// Input for [`create_promotion`].
#[derive(Debug, Clone)]
pub struct NewPromotion {
    pub event_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub code: Option<String>,
    pub is_listed: bool,
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
    pub product_ids: Vec<Uuid>,
}

impl NewPromotion {
    pub fn new(event_id: Uuid, name: impl Into<String>, discount: Discount) -> Self {
        Self {
            event_id,
            name: name.into(),
            description: None,
            code: None,
            is_listed: true,
            discount,
            min_order_value: None,
            max_order_value: None,
            max_discount: None,
            min_quantity: 1,
            max_quantity: None,
            quantity_step: 1,
            owner_id: None,
            priority: 0,
            applicable_user_type: PromoUserType::All,
            end_user_discount_percentage: None,
            product_ids: Vec::new(),
        }
    }
}

/// Validates and stores a promotion; `all_products` follows the product set.
pub async fn create_promotion(conn: &mut PgConnection, new: NewPromotion) -> AppResult<Promotion> {
    let promotion = Promotion {
        id: Uuid::new_v4(),
        event_id: new.event_id,
        name: new.name,
        description: new.description,
        code: new.code,
        is_listed: new.is_listed,
        is_active: true,
        discount: new.discount,
        min_order_value: new.min_order_value,
        max_order_value: new.max_order_value,
        max_discount: new.max_discount,
        min_quantity: new.min_quantity,
        max_quantity: new.max_quantity,
        quantity_step: new.quantity_step,
        owner_id: new.owner_id,
        priority: new.priority,
        applicable_user_type: new.applicable_user_type,
        end_user_discount_percentage: new.end_user_discount_percentage,
        product_ids: new.product_ids,
        quota: None,
        created_at: chrono::Utc::now(),
    };
    promotion.validate()?;

    sqlx::query(
        "INSERT INTO promotions (
            id, event_id, name, description, all_products, code, is_listed, is_active,
            discount_percentage, discount_fixed, min_order_value, max_order_value, max_discount,
            min_quantity, max_quantity, quantity_step, owner_id, priority,
            applicable_user_type, end_user_discount_percentage, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)",
    )
    .bind(promotion.id)
    .bind(promotion.event_id)
    .bind(&promotion.name)
    .bind(&promotion.description)
    .bind(promotion.all_products())
    .bind(&promotion.code)
    .bind(promotion.is_listed)
    .bind(promotion.is_active)
    .bind(promotion.discount.percentage())
    .bind(promotion.discount.fixed())
    .bind(promotion.min_order_value)
    .bind(promotion.max_order_value)
    .bind(promotion.max_discount)
    .bind(promotion.min_quantity)
    .bind(promotion.max_quantity)
    .bind(promotion.quantity_step)
    .bind(promotion.owner_id)
    .bind(promotion.priority)
    .bind(promotion.applicable_user_type)
    .bind(promotion.end_user_discount_percentage)
    .bind(promotion.created_at)
    .execute(&mut *conn)
    .await?;

    for product_id in &promotion.product_ids {
        sqlx::query("INSERT INTO promotion_products (promotion_id, product_id) VALUES ($1, $2)")
            .bind(promotion.id)
            .bind(product_id)
            .execute(&mut *conn)
            .await?;
    }

    tracing::info!(promotion_id = %promotion.id, event_id = %promotion.event_id, "Promotion created");
    Ok(promotion)
}
