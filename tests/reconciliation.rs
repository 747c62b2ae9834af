//! Payment confirmation, webhooks and expiry sweeps against PostgreSQL.
//! Run with `cargo test -- --ignored`.

mod common;

use std::sync::Arc;

use chrono::Duration;
use rust_decimal_macros::dec;
use sqlx::PgPool;
use uuid::Uuid;

use boxoffice_server::gateway::WebhookEvent;
use boxoffice_server::models::cart::CartStatus;
use boxoffice_server::models::order::{Order, OrderStatus};
use boxoffice_server::services::order::OrderService;
use boxoffice_server::services::{cart, webhook};
use boxoffice_server::utils::error::AppError;

use common::*;

async fn pending_order(pool: &PgPool, orders: &OrderService, quota_max: i32) -> (Order, Uuid, Uuid) {
    let config = test_config();
    let event = seed_event(pool).await;
    let product = seed_product(pool, event, dec!(250)).await;
    let quota_id = seed_quota(pool, product, quota_max).await;
    let user = Uuid::new_v4();
    let mut conn = pool.acquire().await.unwrap();
    let created = cart::create_cart(&mut conn, user, product, 2, false, &config.pricing, Duration::minutes(30))
        .await
        .unwrap();
    let order = orders.create_order(user, created.id).await.unwrap();
    (order, user, quota_id)
}

async fn reload(pool: &PgPool, order_id: Uuid) -> Order {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn expire(pool: &PgPool, table: &str, id: Uuid) {
    sqlx::query(&format!(
        "UPDATE {} SET expires_on = now() - interval '1 minute' WHERE id = $1",
        table
    ))
    .bind(id)
    .execute(pool)
    .await
    .unwrap();
}

#[sqlx::test]
#[ignore]
async fn webhook_and_client_confirmation_mint_one_set_of_tickets(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway.clone());
    let (order, user, quota_id) = pending_order(&pool, &orders, 10).await;
    assert_eq!(order.status, OrderStatus::Initial);
    assert_eq!(slots_booked(&pool, quota_id).await, 2);
    let payment_id = order.payment_id.clone().unwrap();

    let body = webhook_body("payment_success", &payment_id);
    let event = webhook::process_webhook(&orders, FAKE_GATEWAY, &body, FAKE_SIGNATURE)
        .await
        .unwrap();
    assert!(matches!(event, WebhookEvent::PaymentSuccess { .. }));

    let confirmed = orders
        .confirm_payment(user, order.id, &FakeGateway::proof_for(&payment_id))
        .await
        .unwrap();
    assert_eq!(confirmed.status, OrderStatus::Successful);

    // A redelivered webhook is harmless too.
    webhook::process_webhook(&orders, FAKE_GATEWAY, &body, FAKE_SIGNATURE)
        .await
        .unwrap();

    assert_eq!(ticket_count(&pool, order.id).await, 2);
    assert!(gateway.refunded().is_empty());
}

#[sqlx::test]
#[ignore]
async fn wrong_proof_is_rejected(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway);
    let (order, user, _) = pending_order(&pool, &orders, 10).await;

    let result = orders.confirm_payment(user, order.id, "paid:someone-else").await;
    assert!(matches!(result, Err(AppError::ValidationError(_))));
    assert_eq!(reload(&pool, order.id).await.status, OrderStatus::Initial);
}

#[sqlx::test]
#[ignore]
async fn payment_after_expiry_is_refunded(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway.clone());
    let (order, _, quota_id) = pending_order(&pool, &orders, 10).await;
    let payment_id = order.payment_id.clone().unwrap();
    expire(&pool, "orders", order.id).await;

    let body = webhook_body("payment_success", &payment_id);
    webhook::process_webhook(&orders, FAKE_GATEWAY, &body, FAKE_SIGNATURE)
        .await
        .unwrap();

    let stored = reload(&pool, order.id).await;
    assert_eq!(stored.status, OrderStatus::Failed);
    assert!(stored.failure_reason.is_some());
    assert_eq!(gateway.refunded(), vec![payment_id]);
    assert_eq!(ticket_count(&pool, order.id).await, 0);
    assert_eq!(slots_booked(&pool, quota_id).await, 0);
}

#[sqlx::test]
#[ignore]
async fn failed_payment_releases_quota(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway);
    let (order, _, quota_id) = pending_order(&pool, &orders, 10).await;
    let payment_id = order.payment_id.clone().unwrap();

    let body = webhook_body("payment_failed", &payment_id);
    webhook::process_webhook(&orders, FAKE_GATEWAY, &body, FAKE_SIGNATURE)
        .await
        .unwrap();

    let stored = reload(&pool, order.id).await;
    assert_eq!(stored.status, OrderStatus::Failed);
    assert_eq!(stored.failure_reason.as_deref(), Some("Payment Failed"));
    assert_eq!(slots_booked(&pool, quota_id).await, 0);
}

#[sqlx::test]
#[ignore]
async fn webhook_edge_cases(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway);

    let ping = webhook_body("ping", "");
    let event = webhook::process_webhook(&orders, FAKE_GATEWAY, &ping, FAKE_SIGNATURE)
        .await
        .unwrap();
    assert!(matches!(event, WebhookEvent::NoOp { .. }));

    let forged = webhook::process_webhook(&orders, FAKE_GATEWAY, &ping, "forged").await;
    assert!(matches!(forged, Err(AppError::InvalidWebhookSignature)));

    let unknown = webhook_body("refund_created", "x");
    let result = webhook::process_webhook(&orders, FAKE_GATEWAY, &unknown, FAKE_SIGNATURE).await;
    assert!(matches!(result, Err(AppError::UnrecognizedWebhookEvent(_))));

    let orphan = webhook_body("payment_success", "fake_missing");
    let result = webhook::process_webhook(&orders, FAKE_GATEWAY, &orphan, FAKE_SIGNATURE).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[sqlx::test]
#[ignore]
async fn expired_orders_are_swept(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway.clone());
    let (order, _, quota_id) = pending_order(&pool, &orders, 10).await;
    expire(&pool, "orders", order.id).await;

    assert_eq!(orders.clear_expired_orders().await.unwrap(), 1);
    assert_eq!(orders.clear_expired_orders().await.unwrap(), 0);

    let stored = reload(&pool, order.id).await;
    assert_eq!(stored.status, OrderStatus::Failed);
    assert_eq!(slots_booked(&pool, quota_id).await, 0);
    assert_eq!(gateway.refunded(), vec![order.payment_id.unwrap()]);
}

#[sqlx::test]
#[ignore]
async fn expired_carts_are_freed(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway);
    let config = test_config();
    let event = seed_event(&pool).await;
    let product = seed_product(&pool, event, dec!(80)).await;
    let user = Uuid::new_v4();
    let mut conn = pool.acquire().await.unwrap();
    let stale = cart::create_cart(&mut conn, user, product, 1, false, &config.pricing, Duration::minutes(30))
        .await
        .unwrap();
    let live = cart::create_cart(&mut conn, user, product, 1, false, &config.pricing, Duration::minutes(30))
        .await
        .unwrap();
    expire(&pool, "carts", stale.id).await;

    assert_eq!(orders.clear_expired_carts().await.unwrap(), 1);

    let status_of = |id: Uuid| {
        let pool = pool.clone();
        async move {
            sqlx::query_scalar::<_, CartStatus>("SELECT status FROM carts WHERE id = $1")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap()
        }
    };
    assert_eq!(status_of(stale.id).await, CartStatus::Freed);
    assert_eq!(status_of(live.id).await, CartStatus::Initial);
    assert!(matches!(
        orders.create_order(user, stale.id).await,
        Err(AppError::CartNotModifiable)
    ));
}

#[sqlx::test]
#[ignore]
async fn order_sweep_skips_rows_held_by_another_transaction(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway.clone());
    let (order, _, quota_id) = pending_order(&pool, &orders, 10).await;
    expire(&pool, "orders", order.id).await;

    let mut holder = pool.begin().await.unwrap();
    sqlx::query("SELECT id FROM orders WHERE id = $1 FOR UPDATE")
        .bind(order.id)
        .execute(&mut *holder)
        .await
        .unwrap();

    assert_eq!(orders.clear_expired_orders().await.unwrap(), 0);
    assert_eq!(reload(&pool, order.id).await.status, OrderStatus::Initial);
    assert_eq!(slots_booked(&pool, quota_id).await, 2);
    assert!(gateway.refunded().is_empty());

    holder.rollback().await.unwrap();
    assert_eq!(orders.clear_expired_orders().await.unwrap(), 1);
    assert_eq!(reload(&pool, order.id).await.status, OrderStatus::Failed);
}

#[sqlx::test]
#[ignore]
async fn cart_sweep_skips_rows_held_by_another_transaction(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway);
    let config = test_config();
    let event = seed_event(&pool).await;
    let product = seed_product(&pool, event, dec!(80)).await;
    let user = Uuid::new_v4();
    let mut conn = pool.acquire().await.unwrap();
    let stale = cart::create_cart(&mut conn, user, product, 1, false, &config.pricing, Duration::minutes(30))
        .await
        .unwrap();
    expire(&pool, "carts", stale.id).await;

    let mut holder = pool.begin().await.unwrap();
    sqlx::query("SELECT id FROM carts WHERE id = $1 FOR UPDATE")
        .bind(stale.id)
        .execute(&mut *holder)
        .await
        .unwrap();

    assert_eq!(orders.clear_expired_carts().await.unwrap(), 0);
    let status = sqlx::query_scalar::<_, CartStatus>("SELECT status FROM carts WHERE id = $1")
        .bind(stale.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, CartStatus::Initial);

    holder.rollback().await.unwrap();
    assert_eq!(orders.clear_expired_carts().await.unwrap(), 1);
}

#[sqlx::test]
#[ignore]
async fn user_cancel_refunds_once(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway.clone());
    let (order, user, quota_id) = pending_order(&pool, &orders, 10).await;

    let cancelled = orders.cancel_order(user, order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Failed);
    orders.cancel_order(user, order.id).await.unwrap();

    assert_eq!(gateway.refunded().len(), 1);
    assert_eq!(slots_booked(&pool, quota_id).await, 0);
}
