//! Checkout, payment confirmation, cancellation and the expiry sweep.
//!
//! Each public operation runs in one database transaction. Rows are locked in
//! a fixed order: cart, quotas (ascending), order, wallets (ascending).

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sqlx::{Connection, PgConnection, PgPool};
use uuid::Uuid;

use crate::config::Config;
use crate::gateway::{GatewayRegistry, PaymentGateway, PaymentOrderStatus};
use crate::models::cart::{CartStatus, PaymentMode};
use crate::models::order::{Cancellation, Order, OrderStatus, OrderType, RechargePolicy};
use crate::models::promotion::Discount;
use crate::models::ticket::Ticket;
use crate::services::promotion::NewPromotion;
use crate::services::{cart, catalog, promotion, question, quota, wallet};
use crate::utils::error::{AppError, AppResult};

const COUPON_CODE_LEN: usize = 10;
const COUPON_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn generate_coupon_code() -> String {
    let mut rng = rand::thread_rng();
    (0..COUPON_CODE_LEN)
        .map(|_| COUPON_CHARSET[rng.gen_range(0..COUPON_CHARSET.len())] as char)
        .collect()
}

pub async fn lock_order(conn: &mut PgConnection, order_id: Uuid, user_id: Uuid) -> AppResult<Order> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 AND user_id = $2 FOR UPDATE")
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {}", order_id)))
}

pub async fn lock_order_by_payment(conn: &mut PgConnection, payment_id: &str, gateway: &str) -> AppResult<Order> {
    sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE payment_id = $1 AND payment_gateway = $2 FOR UPDATE",
    )
    .bind(payment_id)
    .bind(gateway)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Order for payment {}", payment_id)))
}

async fn insert_order(conn: &mut PgConnection, order: &Order) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO orders (
            id, user_id, product_id, quantity, gross_price, discount_amount, platform_fee, tax,
            net_price, discount_coupon, payment_id, payment_gateway, status, failure_reason,
            order_type, applied_quota_ids, end_user_discount_percentage, expires_on,
            created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)",
    )
    .bind(order.id)
    .bind(order.user_id)
    .bind(order.product_id)
    .bind(order.quantity)
    .bind(order.gross_price)
    .bind(order.discount_amount)
    .bind(order.platform_fee)
    .bind(order.tax)
    .bind(order.net_price)
    .bind(&order.discount_coupon)
    .bind(&order.payment_id)
    .bind(&order.payment_gateway)
    .bind(order.status)
    .bind(&order.failure_reason)
    .bind(order.order_type)
    .bind(&order.applied_quota_ids)
    .bind(order.end_user_discount_percentage)
    .bind(order.expires_on)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn store_status(conn: &mut PgConnection, order: &Order) -> AppResult<()> {
    sqlx::query("UPDATE orders SET status = $2, failure_reason = $3, updated_at = now() WHERE id = $1")
        .bind(order.id)
        .bind(order.status)
        .bind(&order.failure_reason)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn insert_tickets(conn: &mut PgConnection, tickets: &[Ticket]) -> AppResult<()> {
    for ticket in tickets {
        sqlx::query(
            "INSERT INTO tickets (id, user_id, product_id, order_id, is_cancelled, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(ticket.id)
        .bind(ticket.user_id)
        .bind(ticket.product_id)
        .bind(ticket.order_id)
        .bind(ticket.is_cancelled)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn tickets_for_order(conn: &mut PgConnection, order_id: Uuid) -> AppResult<Vec<Ticket>> {
    let tickets = sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(tickets)
}

/// initial -> successful plus the side effects of the order type.
async fn confirm_order(conn: &mut PgConnection, order: &mut Order) -> AppResult<()> {
    order.mark_successful(Utc::now())?;
    store_status(conn, order).await?;

    match order.order_type {
        OrderType::Ticket => {
            let tickets = Ticket::for_order(order);
            insert_tickets(conn, &tickets).await?;
            if let Some(code) = order.discount_coupon.as_deref() {
                pay_promoter(conn, order, code).await?;
            }
        }
        OrderType::Coupon => mint_promoter_coupon(conn, order).await?,
        OrderType::WalletRecharge => {
            let mut locked = wallet::lock_wallet_for_user(conn, order.user_id).await?;
            wallet::credit(conn, &mut locked, order.gross_price, Some("Wallet recharge")).await?;
        }
    }

    tracing::info!(order_id = %order.id, order_type = ?order.order_type, "Order confirmed");
    Ok(())
}

/// Credits the owner of a promoter-issued coupon with their share of the sale.
async fn pay_promoter(conn: &mut PgConnection, order: &Order, code: &str) -> AppResult<()> {
    let Some(promo) = promotion::promotion_by_code(conn, code).await? else {
        return Ok(());
    };
    let Some(owner_id) = promo.owner_id else {
        return Ok(());
    };
    let share = order.promoter_share(promo.end_user_discount_percentage);
    if share <= Decimal::ZERO {
        return Ok(());
    }

    let mut locked = wallet::lock_wallet_for_user(conn, owner_id).await?;
    let description = format!("Coupon sale {} for order {}", code, order.id);
    wallet::credit(conn, &mut locked, share, Some(&description)).await?;
    Ok(())
}

/// A coupon order buys a private promotion for the product with a quota of
/// the purchased quantity.
async fn mint_promoter_coupon(conn: &mut PgConnection, order: &Order) -> AppResult<()> {
    let product_id = order.product_id.ok_or(AppError::ProductUnavailable)?;
    let product = catalog::find_product(conn, product_id).await?;
    let percentage = order.end_user_discount_percentage.unwrap_or(Decimal::ZERO);

    let mut new = NewPromotion::new(
        product.event_id,
        format!("Exclusive discount of {}%", percentage.normalize()),
        Discount::Percentage(percentage),
    );
    new.code = Some(generate_coupon_code());
    new.is_listed = false;
    new.owner_id = Some(order.user_id);
    new.end_user_discount_percentage = Some(percentage);
    new.product_ids = vec![product.id];

    let promo = promotion::create_promotion(conn, new).await?;
    quota::create_quota(
        conn,
        &format!("Promotion for {}", product.name),
        order.ticket_quantity(),
        Some(promo.id),
        &[],
    )
    .await?;
    Ok(())
}

/// initial -> failed, releasing quota and cancelling tickets. Quota drift is
/// logged by the tracker and never blocks the cancellation.
async fn cancel_locked(conn: &mut PgConnection, order: &mut Order, reason: &str) -> AppResult<Cancellation> {
    let outcome = order.mark_cancelled(reason)?;
    if outcome == Cancellation::AlreadyFailed {
        return Ok(outcome);
    }
    store_status(conn, order).await?;

    quota::release(conn, &order.applied_quota_ids, order.ticket_quantity()).await?;
    if order.order_type == OrderType::Ticket {
        sqlx::query("UPDATE tickets SET is_cancelled = TRUE, updated_at = now() WHERE order_id = $1")
            .bind(order.id)
            .execute(&mut *conn)
            .await?;
    }

    tracing::info!(order_id = %order.id, reason, "Order cancelled");
    Ok(outcome)
}

/// Order and payment workflows. Cheap to clone; shared through `AppState`.
#[derive(Clone)]
pub struct OrderService {
    pool: PgPool,
    config: Arc<Config>,
    gateways: Arc<GatewayRegistry>,
}

impl OrderService {
    pub fn new(pool: PgPool, config: Arc<Config>, gateways: Arc<GatewayRegistry>) -> Self {
        Self {
            pool,
            config,
            gateways,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    fn order_ttl(&self) -> Duration {
        Duration::minutes(self.config.order_expiry_minutes)
    }

    fn recharge_policy(&self) -> RechargePolicy {
        RechargePolicy {
            min_amount: self.config.min_wallet_recharge,
            max_amount: self.config.max_wallet_recharge,
            wallet_gateway: crate::gateway::WALLET_GATEWAY.to_string(),
        }
    }

    fn gateway_for(&self, mode: PaymentMode) -> AppResult<Arc<dyn PaymentGateway>> {
        match mode {
            PaymentMode::Wallet => self.gateways.wallet(),
            PaymentMode::Online => self.gateways.active(),
        }
    }

    /// Turns a priced cart into an order: quota reserved, payment requested,
    /// answers moved. Any failure leaves cart, quotas and wallets untouched.
    pub async fn create_order(&self, user_id: Uuid, cart_id: Uuid) -> AppResult<Order> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let mut cart = cart::lock_cart(&mut tx, cart_id, user_id).await?;
        cart.ensure_modifiable(now)?;
        let product_id = cart.require_product()?;
        let product = catalog::load_product(&mut tx, product_id).await?;
        if !product.is_sale_active(now) {
            return Err(AppError::ProductUnavailable);
        }

        let mut promo_ids = cart.applied_promo_ids.clone();
        promo_ids.sort_unstable();
        promo_ids.dedup();
        let still_active = promotion::still_active(&mut tx, product.event.id, &promo_ids).await?;
        if still_active.len() != promo_ids.len() {
            return Err(AppError::StalePromotions);
        }

        if question::count_unanswered_required(&mut tx, cart.id, &product.product).await? > 0 {
            return Err(AppError::MissingAnswers);
        }

        let coupon = match cart.discount_coupon.as_deref() {
            Some(code) => promotion::promotion_by_code(&mut tx, code).await?,
            None => None,
        };
        let promoter_issued = coupon.as_ref().is_some_and(|p| p.is_promoter_issued());
        let promoter_id = coupon.as_ref().and_then(|p| p.owner_id);

        let gateway = if cart.net_price >= self.config.pricing.min_payable_amount {
            Some(self.gateway_for(cart.payment_mode)?)
        } else {
            None
        };
        let tag = cart.id.to_string();

        // Remote gateways are called before any quota row is locked.
        let mut payment = None;
        if let Some(gateway) = gateway.as_ref().filter(|g| !g.settles_in_transaction()) {
            payment = Some(gateway.create_order(&mut tx, user_id, cart.net_price, Some(&tag)).await?);
        }

        // Slots behind a promoter's coupon were taken when the coupon was bought.
        let mut quota_ids = quota::promotion_quota_ids(&mut tx, &promo_ids).await?;
        if !promoter_issued {
            quota_ids.extend(product.quota_ids.iter().copied());
        }
        let applied_quota_ids = quota::reserve(&mut tx, &quota_ids, cart.quantity).await?;

        if let Some(gateway) = gateway.as_ref().filter(|g| g.settles_in_transaction()) {
            // Payer and promoter wallets are both written before commit.
            if let Some(promoter_id) = promoter_id {
                wallet::lock_wallets_for_users(&mut tx, &[user_id, promoter_id]).await?;
            }
            payment = Some(gateway.create_order(&mut tx, user_id, cart.net_price, Some(&tag)).await?);
        }

        let settled = payment
            .as_ref()
            .is_some_and(|p| p.status == PaymentOrderStatus::Success);
        let payment_id = payment.map(|p| p.id);
        let payment_gateway = gateway.as_ref().map(|g| g.name().to_string());

        let mut order = Order::from_cart(&cart, payment_id, payment_gateway, applied_quota_ids, self.order_ttl());
        order.validate(&self.recharge_policy())?;
        insert_order(&mut tx, &order).await?;

        cart.status = CartStatus::OrderCreated;
        cart.order_id = Some(order.id);
        cart::store_cart(&mut tx, &cart).await?;
        question::move_answers_to_order(&mut tx, cart.id, order.id).await?;

        if settled || !order.has_payment(self.config.pricing.min_payable_amount) {
            confirm_order(&mut tx, &mut order).await?;
        }

        tx.commit().await?;
        tracing::info!(order_id = %order.id, cart_id = %cart_id, status = ?order.status, "Order created");
        Ok(order)
    }

    /// Wallet top-up paid through the active online gateway.
    pub async fn create_recharge_order(&self, user_id: Uuid, amount: Decimal) -> AppResult<Order> {
        let gateway = self.gateways.active()?;
        let mut order = Order::wallet_recharge(
            user_id,
            amount,
            None,
            Some(gateway.name().to_string()),
            self.order_ttl(),
        );
        order.validate(&self.recharge_policy())?;

        let mut tx = self.pool.begin().await?;
        let payment = gateway
            .create_order(&mut tx, user_id, amount, Some(&order.id.to_string()))
            .await?;
        order.payment_id = Some(payment.id);
        insert_order(&mut tx, &order).await?;
        if payment.status == PaymentOrderStatus::Success {
            confirm_order(&mut tx, &mut order).await?;
        }
        tx.commit().await?;

        tracing::info!(order_id = %order.id, amount = %amount, "Wallet recharge order created");
        Ok(order)
    }

    /// Synchronous confirmation with the client's payment proof.
    pub async fn confirm_payment(&self, user_id: Uuid, order_id: Uuid, client_proof: &str) -> AppResult<Order> {
        let mut tx = self.pool.begin().await?;
        let mut order = lock_order(&mut tx, order_id, user_id).await?;

        let (Some(gateway_name), Some(payment_id)) = (order.payment_gateway.clone(), order.payment_id.clone()) else {
            return Err(AppError::ValidationError("Order does not have a payment.".to_string()));
        };
        if !order.has_payment(self.config.pricing.min_payable_amount) {
            return Err(AppError::ValidationError("Order does not have a payment.".to_string()));
        }
        let gateway = self.gateways.get(&gateway_name)?;
        if !gateway.confirm_payment(client_proof, &payment_id).await? {
            return Err(AppError::ValidationError("Payment confirmation failed.".to_string()));
        }

        self.mark_confirm_or_refund(&mut tx, &mut order).await?;
        tx.commit().await?;
        Ok(order)
    }

    pub async fn cancel_order(&self, user_id: Uuid, order_id: Uuid) -> AppResult<Order> {
        let mut tx = self.pool.begin().await?;
        let mut order = lock_order(&mut tx, order_id, user_id).await?;
        self.cancel_and_refund(&mut tx, &mut order, "Cancelled").await?;
        tx.commit().await?;
        Ok(order)
    }

    /// Cancels a locked order and refunds it if this call did the cancelling.
    /// The refund is attempted even for pending payments so a capture that
    /// lands later is returned too.
    async fn cancel_and_refund(&self, conn: &mut PgConnection, order: &mut Order, reason: &str) -> AppResult<Cancellation> {
        let outcome = cancel_locked(conn, order, reason).await?;
        if outcome == Cancellation::Cancelled && order.has_payment(self.config.pricing.min_payable_amount) {
            self.refund(conn, order).await?;
        }
        Ok(outcome)
    }

    async fn refund(&self, conn: &mut PgConnection, order: &Order) -> AppResult<()> {
        let (Some(gateway_name), Some(payment_id)) = (order.payment_gateway.as_deref(), order.payment_id.as_deref()) else {
            return Ok(());
        };
        let gateway = self.gateways.get(gateway_name)?;
        if !gateway.refund_payment(conn, payment_id).await? {
            tracing::error!(order_id = %order.id, payment_id, gateway = gateway_name, "Refund was not accepted");
        }
        Ok(())
    }

    /// Shared by synchronous confirmation and webhooks, on an order the caller
    /// has locked. Terminal orders are left alone. A validation failure while
    /// confirming (typically expiry) refunds and cancels instead of leaving the
    /// payment stranded.
    pub async fn mark_confirm_or_refund(&self, conn: &mut PgConnection, order: &mut Order) -> AppResult<()> {
        if order.is_terminal() {
            tracing::info!(order_id = %order.id, status = ?order.status, "Order already settled, nothing to confirm");
            return Ok(());
        }

        let mut attempt = order.clone();
        let mut savepoint = conn.begin().await?;
        match confirm_order(&mut savepoint, &mut attempt).await {
            Ok(()) => {
                savepoint.commit().await?;
                *order = attempt;
                Ok(())
            }
            Err(e) if e.is_validation() => {
                savepoint.rollback().await?;
                tracing::warn!(order_id = %order.id, error = %e, "Confirmation rejected, refunding payment");
                self.refund(conn, order).await?;
                cancel_locked(conn, order, &e.to_string()).await?;
                Ok(())
            }
            Err(e) => {
                savepoint.rollback().await?;
                Err(e)
            }
        }
    }

    /// Cancels with "Payment Failed" on a locked order. A failure reported
    /// after success is logged and ignored.
    pub async fn mark_payment_failed(&self, conn: &mut PgConnection, order: &mut Order) -> AppResult<()> {
        if order.status == OrderStatus::Successful {
            tracing::warn!(order_id = %order.id, "Payment failure reported for a successful order");
            return Ok(());
        }
        cancel_locked(conn, order, "Payment Failed").await?;
        Ok(())
    }

    pub async fn clear_expired_carts(&self) -> AppResult<usize> {
        cart::clear_expired_carts(&self.pool, self.config.sweep_batch_size).await
    }

    /// Cancels up to `sweep_batch_size` expired initial orders, each in its
    /// own savepoint. Rows locked by a live request are skipped.
    pub async fn clear_expired_orders(&self) -> AppResult<usize> {
        let mut tx = self.pool.begin().await?;
        let orders = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders
             WHERE status = 'initial' AND expires_on <= now()
             ORDER BY expires_on
             LIMIT $1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(self.config.sweep_batch_size)
        .fetch_all(&mut *tx)
        .await?;

        let mut cancelled = 0;
        for mut order in orders {
            let mut savepoint = tx.begin().await?;
            match self.cancel_and_refund(&mut savepoint, &mut order, "Expired").await {
                Ok(_) => {
                    savepoint.commit().await?;
                    cancelled += 1;
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    tracing::warn!(order_id = %order.id, error = %e, "Failed to cancel expired order");
                }
            }
        }
        tx.commit().await?;

        if cancelled > 0 {
            tracing::info!(cancelled, "Expired orders cancelled");
        }
        Ok(cancelled)
    }
}
