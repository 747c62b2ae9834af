//! Cart mutations. Every one locks the cart row and re-prices from scratch.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{Connection, PgConnection, PgPool};
use uuid::Uuid;

use crate::config::PricingConfig;
use crate::models::cart::{Cart, PaymentMode, PriceBreakdown};
use crate::models::product::CatalogProduct;
use crate::models::promotion::CartSnapshot;
use crate::models::question::Answer;
use crate::services::{catalog, promotion, question};
use crate::utils::error::{AppError, AppResult};

pub async fn lock_cart(conn: &mut PgConnection, cart_id: Uuid, user_id: Uuid) -> AppResult<Cart> {
    sqlx::query_as::<_, Cart>("SELECT * FROM carts WHERE id = $1 AND user_id = $2 FOR UPDATE")
        .bind(cart_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Cart {}", cart_id)))
}

async fn insert_cart(conn: &mut PgConnection, cart: &Cart) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO carts (
            id, user_id, product_id, quantity, discount_coupon, gross_price, discount_amount,
            platform_fee, tax, net_price, end_user_discount_percentage, applied_promo_ids,
            payment_mode, status, is_promoter, order_id, expires_on, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
    )
    .bind(cart.id)
    .bind(cart.user_id)
    .bind(cart.product_id)
    .bind(cart.quantity)
    .bind(&cart.discount_coupon)
    .bind(cart.gross_price)
    .bind(cart.discount_amount)
    .bind(cart.platform_fee)
    .bind(cart.tax)
    .bind(cart.net_price)
    .bind(cart.end_user_discount_percentage)
    .bind(&cart.applied_promo_ids)
    .bind(cart.payment_mode)
    .bind(cart.status)
    .bind(cart.is_promoter)
    .bind(cart.order_id)
    .bind(cart.expires_on)
    .bind(cart.created_at)
    .bind(cart.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn store_cart(conn: &mut PgConnection, cart: &Cart) -> AppResult<()> {
    sqlx::query(
        "UPDATE carts SET
            quantity = $2, discount_coupon = $3, gross_price = $4, discount_amount = $5,
            platform_fee = $6, tax = $7, net_price = $8, end_user_discount_percentage = $9,
            applied_promo_ids = $10, payment_mode = $11, status = $12, order_id = $13,
            updated_at = now()
         WHERE id = $1",
    )
    .bind(cart.id)
    .bind(cart.quantity)
    .bind(&cart.discount_coupon)
    .bind(cart.gross_price)
    .bind(cart.discount_amount)
    .bind(cart.platform_fee)
    .bind(cart.tax)
    .bind(cart.net_price)
    .bind(cart.end_user_discount_percentage)
    .bind(&cart.applied_promo_ids)
    .bind(cart.payment_mode)
    .bind(cart.status)
    .bind(cart.order_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Recomputes gross price, promotions, fee and tax for the cart's current
/// product, quantity and coupon.
pub async fn calculate_pricing(
    conn: &mut PgConnection,
    cart: &mut Cart,
    catalog: &CatalogProduct,
    pricing: &PricingConfig,
) -> AppResult<()> {
    let gross_price = catalog.product.price * Decimal::from(cart.quantity);

    let coupon = match cart.discount_coupon.as_deref() {
        Some(code) => Some(
            promotion::promotion_by_code(conn, code)
                .await?
                .ok_or(AppError::InvalidCoupon)?,
        ),
        None => None,
    };
    let system = promotion::active_system_promotions(conn, catalog.event.id).await?;

    let snapshot = CartSnapshot {
        product: &catalog.product,
        quantity: cart.quantity,
        gross_price,
        is_promoter: cart.is_promoter,
    };
    let outcome = promotion::evaluate(&snapshot, &system, coupon.as_ref())?;

    cart.apply_breakdown(PriceBreakdown::compute(
        gross_price,
        outcome.discounted_price,
        outcome.applied_promo_ids,
        outcome.end_user_discount_percentage,
        pricing,
    ));
    Ok(())
}

async fn catalog_for(conn: &mut PgConnection, cart: &Cart) -> AppResult<CatalogProduct> {
    let product_id = cart.require_product()?;
    catalog::load_product(conn, product_id).await
}

pub async fn create_cart(
    conn: &mut PgConnection,
    user_id: Uuid,
    product_id: Uuid,
    quantity: i32,
    is_promoter: bool,
    pricing: &PricingConfig,
    ttl: Duration,
) -> AppResult<Cart> {
    let catalog = catalog::load_product(conn, product_id).await?;
    if !catalog.is_sale_active(Utc::now()) {
        return Err(AppError::ProductUnavailable);
    }

    let mut cart = Cart::new(user_id, product_id, quantity, is_promoter, ttl)?;
    calculate_pricing(conn, &mut cart, &catalog, pricing).await?;
    insert_cart(conn, &cart).await?;

    tracing::info!(cart_id = %cart.id, user_id = %user_id, product_id = %product_id, "Cart created");
    Ok(cart)
}

pub async fn change_quantity(
    conn: &mut PgConnection,
    user_id: Uuid,
    cart_id: Uuid,
    quantity: i32,
    pricing: &PricingConfig,
) -> AppResult<Cart> {
    if quantity < 1 {
        return Err(AppError::ValidationError(
            "Quantity must be at least 1".to_string(),
        ));
    }
    let mut cart = lock_cart(conn, cart_id, user_id).await?;
    let now = Utc::now();
    cart.ensure_modifiable(now)?;
    let catalog = catalog_for(conn, &cart).await?;
    if !catalog.is_sale_active(now) {
        return Err(AppError::ProductUnavailable);
    }

    cart.quantity = quantity;
    calculate_pricing(conn, &mut cart, &catalog, pricing).await?;
    store_cart(conn, &cart).await?;
    Ok(cart)
}

/// `None` (or a blank code) removes the coupon.
pub async fn apply_coupon(
    conn: &mut PgConnection,
    user_id: Uuid,
    cart_id: Uuid,
    code: Option<String>,
    pricing: &PricingConfig,
) -> AppResult<Cart> {
    let mut cart = lock_cart(conn, cart_id, user_id).await?;
    cart.ensure_modifiable(Utc::now())?;
    let catalog = catalog_for(conn, &cart).await?;

    cart.discount_coupon = code
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    calculate_pricing(conn, &mut cart, &catalog, pricing).await?;
    store_cart(conn, &cart).await?;
    Ok(cart)
}

pub async fn change_payment_mode(
    conn: &mut PgConnection,
    user_id: Uuid,
    cart_id: Uuid,
    payment_mode: PaymentMode,
    pricing: &PricingConfig,
) -> AppResult<Cart> {
    let mut cart = lock_cart(conn, cart_id, user_id).await?;
    cart.ensure_modifiable(Utc::now())?;
    let catalog = catalog_for(conn, &cart).await?;

    cart.payment_mode = payment_mode;
    calculate_pricing(conn, &mut cart, &catalog, pricing).await?;
    store_cart(conn, &cart).await?;
    Ok(cart)
}

pub async fn cancel_cart(conn: &mut PgConnection, user_id: Uuid, cart_id: Uuid) -> AppResult<Cart> {
    let mut cart = lock_cart(conn, cart_id, user_id).await?;
    cart.free(Utc::now())?;
    store_cart(conn, &cart).await?;
    tracing::info!(cart_id = %cart.id, "Cart freed");
    Ok(cart)
}

pub async fn save_answer(
    conn: &mut PgConnection,
    user_id: Uuid,
    cart_id: Uuid,
    question_id: Uuid,
    raw: Option<&str>,
) -> AppResult<Option<Answer>> {
    let cart = lock_cart(conn, cart_id, user_id).await?;
    cart.ensure_modifiable(Utc::now())?;
    let product_id = cart.require_product()?;
    let product = catalog::find_product(conn, product_id).await?;
    question::save_answer(conn, cart.id, &product, question_id, raw).await
}

/// Frees up to `batch_size` expired carts. Rows locked elsewhere are skipped
/// and each cart is freed in its own savepoint.
pub async fn clear_expired_carts(pool: &PgPool, batch_size: i64) -> AppResult<usize> {
    let mut tx = pool.begin().await?;
    let carts = sqlx::query_as::<_, Cart>(
        "SELECT * FROM carts
         WHERE status = 'initial' AND expires_on <= now()
         ORDER BY expires_on
         LIMIT $1
         FOR UPDATE SKIP LOCKED",
    )
    .bind(batch_size)
    .fetch_all(&mut *tx)
    .await?;

    let mut freed = 0;
    for mut cart in carts {
        let mut savepoint = tx.begin().await?;
        let result = match cart.free_expired() {
            Ok(()) => store_cart(&mut savepoint, &cart).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                savepoint.commit().await?;
                freed += 1;
            }
            Err(e) => {
                savepoint.rollback().await?;
                tracing::warn!(cart_id = %cart.id, error = %e, "Failed to free expired cart");
            }
        }
    }
    tx.commit().await?;

    if freed > 0 {
        tracing::info!(freed, "Expired carts freed");
    }
    Ok(freed)
}
