//! Database-backed checkout scenarios. Need a PostgreSQL `DATABASE_URL`;
//! run with `cargo test -- --ignored`.

mod common;

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;
use uuid::Uuid;

use boxoffice_server::models::cart::{CartStatus, PaymentMode};
use boxoffice_server::models::order::OrderStatus;
use boxoffice_server::models::order::OrderType;
use boxoffice_server::models::promotion::{Discount, PromoUserType};
use boxoffice_server::services::promotion::{self, NewPromotion};
use boxoffice_server::services::{cart, quota, wallet};
use boxoffice_server::utils::error::AppError;

use common::*;

#[sqlx::test]
#[ignore]
async fn last_slot_goes_to_exactly_one_checkout(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway);
    let config = test_config();
    let event = seed_event(&pool).await;
    let product = seed_product(&pool, event, dec!(100)).await;
    let quota_id = seed_quota(&pool, product, 1).await;

    let mut conn = pool.acquire().await.unwrap();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let ttl = Duration::minutes(30);
    let first = cart::create_cart(&mut conn, alice, product, 1, false, &config.pricing, ttl).await.unwrap();
    let second = cart::create_cart(&mut conn, bob, product, 1, false, &config.pricing, ttl).await.unwrap();

    let (a, b) = tokio::join!(
        orders.create_order(alice, first.id),
        orders.create_order(bob, second.id)
    );
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(AppError::QuotaExhausted))));
    assert_eq!(slots_booked(&pool, quota_id).await, 1);
}

#[sqlx::test]
#[ignore]
async fn stacked_promotions_then_fee_and_tax(pool: PgPool) {
    let config = test_config();
    let event = seed_event(&pool).await;
    let product = seed_product(&pool, event, dec!(500)).await;
    let mut conn = pool.acquire().await.unwrap();

    promotion::create_promotion(&mut conn, NewPromotion::new(event, "Early bird", Discount::Percentage(dec!(10))))
        .await
        .unwrap();
    let mut flat = NewPromotion::new(event, "Flat fifty", Discount::Fixed(dec!(50)));
    flat.code = Some("FLAT50".into());
    flat.is_listed = false;
    promotion::create_promotion(&mut conn, flat).await.unwrap();

    let user = Uuid::new_v4();
    let created = cart::create_cart(&mut conn, user, product, 2, false, &config.pricing, Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(created.gross_price, dec!(1000));
    assert_eq!(created.net_price, dec!(1073.80));

    let priced = cart::apply_coupon(&mut conn, user, created.id, Some("FLAT50".into()), &config.pricing)
        .await
        .unwrap();
    assert_eq!(priced.discount_amount, dec!(150));
    assert_eq!(priced.platform_fee, dec!(10));
    assert_eq!(priced.tax, dec!(154.80));
    assert_eq!(priced.net_price, dec!(1014.80));
    assert_eq!(priced.applied_promo_ids.len(), 2);

    let unknown = cart::apply_coupon(&mut conn, user, created.id, Some("NOPE".into()), &config.pricing).await;
    assert!(matches!(unknown, Err(AppError::InvalidCoupon)));
}

#[sqlx::test]
#[ignore]
async fn failed_wallet_payment_leaves_nothing_behind(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway);
    let config = test_config();
    let event = seed_event(&pool).await;
    let product = seed_product(&pool, event, dec!(300)).await;
    let quota_id = seed_quota(&pool, product, 10).await;
    let user = Uuid::new_v4();

    let mut conn = pool.acquire().await.unwrap();
    let mut locked = wallet::lock_wallet_for_user(&mut conn, user).await.unwrap();
    wallet::credit(&mut conn, &mut locked, dec!(100), None).await.unwrap();

    let created = cart::create_cart(&mut conn, user, product, 1, false, &config.pricing, Duration::minutes(30))
        .await
        .unwrap();
    cart::change_payment_mode(&mut conn, user, created.id, PaymentMode::Wallet, &config.pricing)
        .await
        .unwrap();

    let result = orders.create_order(user, created.id).await;
    assert!(matches!(result, Err(AppError::InsufficientBalance)));

    assert_eq!(slots_booked(&pool, quota_id).await, 0);
    let balance = wallet::wallet_for_user(&mut conn, user).await.unwrap().balance;
    assert_eq!(balance, dec!(100));
    let status = sqlx::query_scalar::<_, CartStatus>("SELECT status FROM carts WHERE id = $1")
        .bind(created.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, CartStatus::Initial);
}

#[sqlx::test]
#[ignore]
async fn wallet_checkout_confirms_immediately(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway);
    let config = test_config();
    let event = seed_event(&pool).await;
    let product = seed_product(&pool, event, dec!(100)).await;
    let user = Uuid::new_v4();

    let mut conn = pool.acquire().await.unwrap();
    let mut locked = wallet::lock_wallet_for_user(&mut conn, user).await.unwrap();
    wallet::credit(&mut conn, &mut locked, dec!(1000), None).await.unwrap();

    let created = cart::create_cart(&mut conn, user, product, 2, false, &config.pricing, Duration::minutes(30))
        .await
        .unwrap();
    cart::change_payment_mode(&mut conn, user, created.id, PaymentMode::Wallet, &config.pricing)
        .await
        .unwrap();

    let order = orders.create_order(user, created.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Successful);
    assert_eq!(ticket_count(&pool, order.id).await, 2);

    let balance = wallet::wallet_for_user(&mut conn, user).await.unwrap().balance;
    assert_eq!(balance, dec!(1000) - order.net_price);

    let again = cart::cancel_cart(&mut conn, user, created.id).await;
    assert!(matches!(again, Err(AppError::CartNotModifiable)));
}

#[sqlx::test]
#[ignore]
async fn required_questions_block_checkout(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway);
    let config = test_config();
    let event = seed_event(&pool).await;
    let product = seed_product(&pool, event, dec!(0)).await;
    let question_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO questions (id, event_id, question, kind, required, all_products)
         VALUES ($1, $2, 'Full name', 'string', TRUE, TRUE)",
    )
    .bind(question_id)
    .bind(event)
    .execute(&pool)
    .await
    .unwrap();

    let user = Uuid::new_v4();
    let mut conn = pool.acquire().await.unwrap();
    let created = cart::create_cart(&mut conn, user, product, 1, false, &config.pricing, Duration::minutes(30))
        .await
        .unwrap();
    assert!(matches!(
        orders.create_order(user, created.id).await,
        Err(AppError::MissingAnswers)
    ));

    cart::save_answer(&mut conn, user, created.id, question_id, Some("Ada Lovelace"))
        .await
        .unwrap();
    let order = orders.create_order(user, created.id).await.unwrap();
    // Free orders need no payment and are confirmed on the spot.
    assert_eq!(order.status, OrderStatus::Successful);
    assert!(order.payment_id.is_none());

    let moved = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM answers WHERE order_id = $1")
        .bind(order.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(moved, 1);
}

#[sqlx::test]
#[ignore]
async fn deactivated_promotion_makes_cart_stale(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway);
    let config = test_config();
    let event = seed_event(&pool).await;
    let product = seed_product(&pool, event, dec!(200)).await;
    let mut conn = pool.acquire().await.unwrap();
    let promo = promotion::create_promotion(&mut conn, NewPromotion::new(event, "Launch", Discount::Percentage(dec!(20))))
        .await
        .unwrap();

    let user = Uuid::new_v4();
    let created = cart::create_cart(&mut conn, user, product, 1, false, &config.pricing, Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(created.applied_promo_ids, vec![promo.id]);

    sqlx::query("UPDATE promotions SET is_active = FALSE WHERE id = $1")
        .bind(promo.id)
        .execute(&pool)
        .await
        .unwrap();
    assert!(matches!(
        orders.create_order(user, created.id).await,
        Err(AppError::StalePromotions)
    ));
}

#[sqlx::test]
#[ignore]
async fn promoter_coupon_pays_the_promoter(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway);
    let config = test_config();
    let event = seed_event(&pool).await;
    let product = seed_product(&pool, event, dec!(100)).await;
    let product_quota = seed_quota(&pool, product, 5).await;
    let mut conn = pool.acquire().await.unwrap();

    let mut bulk = NewPromotion::new(event, "Promoter bulk", Discount::Percentage(dec!(30)));
    bulk.applicable_user_type = PromoUserType::Promoter;
    bulk.end_user_discount_percentage = Some(dec!(20));
    promotion::create_promotion(&mut conn, bulk).await.unwrap();

    // Promoter buys two coupon slots from their wallet.
    let promoter = Uuid::new_v4();
    let mut locked = wallet::lock_wallet_for_user(&mut conn, promoter).await.unwrap();
    wallet::credit(&mut conn, &mut locked, dec!(1000), None).await.unwrap();
    let bulk_cart = cart::create_cart(&mut conn, promoter, product, 2, true, &config.pricing, Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(bulk_cart.end_user_discount_percentage, Some(dec!(20)));
    cart::change_payment_mode(&mut conn, promoter, bulk_cart.id, PaymentMode::Wallet, &config.pricing)
        .await
        .unwrap();
    let coupon_order = orders.create_order(promoter, bulk_cart.id).await.unwrap();
    assert_eq!(coupon_order.order_type, OrderType::Coupon);
    assert_eq!(coupon_order.status, OrderStatus::Successful);
    assert_eq!(slots_booked(&pool, product_quota).await, 2);
    assert_eq!(ticket_count(&pool, coupon_order.id).await, 0);

    let code = sqlx::query_scalar::<_, String>("SELECT code FROM promotions WHERE owner_id = $1")
        .bind(promoter)
        .fetch_one(&pool)
        .await
        .unwrap();
    let after_purchase = wallet::wallet_for_user(&mut conn, promoter).await.unwrap().balance;

    // An end user redeems it; product quota is not charged twice.
    let fan = Uuid::new_v4();
    let fan_cart = cart::create_cart(&mut conn, fan, product, 1, false, &config.pricing, Duration::minutes(30))
        .await
        .unwrap();
    let priced = cart::apply_coupon(&mut conn, fan, fan_cart.id, Some(code), &config.pricing)
        .await
        .unwrap();
    assert_eq!(priced.discount_amount, dec!(20));

    let order = orders.create_order(fan, fan_cart.id).await.unwrap();
    let payment_id = order.payment_id.clone().unwrap();
    orders
        .confirm_payment(fan, order.id, &FakeGateway::proof_for(&payment_id))
        .await
        .unwrap();

    assert_eq!(slots_booked(&pool, product_quota).await, 2);
    assert_eq!(ticket_count(&pool, order.id).await, 1);
    let promoter_balance = wallet::wallet_for_user(&mut conn, promoter).await.unwrap().balance;
    assert_eq!(promoter_balance, after_purchase + dec!(80));
}

#[sqlx::test]
#[ignore]
async fn crossed_promoter_coupons_paid_from_wallets_both_commit(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let orders = order_service(&pool, gateway);
    let config = test_config();
    let event = seed_event(&pool).await;
    let product = seed_product(&pool, event, dec!(100)).await;
    let mut conn = pool.acquire().await.unwrap();

    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    for (owner, code) in [(alice, "ALICE10"), (bob, "BOB10")] {
        let mut coupon = NewPromotion::new(event, format!("{} coupon", code), Discount::Percentage(dec!(10)));
        coupon.code = Some(code.into());
        coupon.is_listed = false;
        coupon.owner_id = Some(owner);
        coupon.end_user_discount_percentage = Some(dec!(10));
        coupon.product_ids = vec![product];
        promotion::create_promotion(&mut conn, coupon).await.unwrap();

        let mut locked = wallet::lock_wallet_for_user(&mut conn, owner).await.unwrap();
        wallet::credit(&mut conn, &mut locked, dec!(2000), None).await.unwrap();
    }

    const ROUNDS: usize = 10;
    for _ in 0..ROUNDS {
        let mut carts = Vec::new();
        for (buyer, code) in [(alice, "BOB10"), (bob, "ALICE10")] {
            let created = cart::create_cart(&mut conn, buyer, product, 1, false, &config.pricing, Duration::minutes(30))
                .await
                .unwrap();
            cart::apply_coupon(&mut conn, buyer, created.id, Some(code.into()), &config.pricing)
                .await
                .unwrap();
            cart::change_payment_mode(&mut conn, buyer, created.id, PaymentMode::Wallet, &config.pricing)
                .await
                .unwrap();
            carts.push(created.id);
        }

        let (a, b) = tokio::join!(
            orders.create_order(alice, carts[0]),
            orders.create_order(bob, carts[1])
        );
        assert_eq!(a.unwrap().status, OrderStatus::Successful);
        assert_eq!(b.unwrap().status, OrderStatus::Successful);
    }

    // Each round: pays 90 + 10 fee + 18 tax, earns 90 from the other's purchase.
    let expected = dec!(2000) - dec!(28) * Decimal::from(ROUNDS as i64);
    for user in [alice, bob] {
        assert_eq!(wallet::wallet_for_user(&mut conn, user).await.unwrap().balance, expected);
    }
}

#[sqlx::test]
#[ignore]
async fn release_clamps_a_drifted_counter(pool: PgPool) {
    let event = seed_event(&pool).await;
    let product = seed_product(&pool, event, dec!(10)).await;
    let quota_id = seed_quota(&pool, product, 10).await;
    let mut conn = pool.acquire().await.unwrap();

    quota::reserve(&mut conn, &[quota_id], 3).await.unwrap();
    sqlx::query("UPDATE quotas SET slots_booked = 1 WHERE id = $1")
        .bind(quota_id)
        .execute(&pool)
        .await
        .unwrap();

    quota::release(&mut conn, &[quota_id, Uuid::new_v4()], 3).await.unwrap();
    assert_eq!(slots_booked(&pool, quota_id).await, 0);
}
