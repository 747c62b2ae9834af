use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{cart, health_check, order, payout, promotion, wallet, webhook};
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/products/:id/promotions", get(promotion::list_product_promotions))
        .route("/carts", post(cart::create_cart))
        .route("/carts/:id/quantity", patch(cart::change_quantity))
        .route("/carts/:id/coupon", patch(cart::apply_coupon))
        .route("/carts/:id/payment-mode", patch(cart::change_payment_mode))
        .route("/carts/:id/answers", post(cart::save_answer))
        .route("/carts/:id/cancel", post(cart::cancel_cart))
        .route("/carts/:id/checkout", post(cart::checkout))
        .route("/orders/recharge", post(order::create_recharge_order))
        .route("/orders/:id/confirm", post(order::confirm_payment))
        .route("/orders/:id/cancel", post(order::cancel_order))
        .route("/wallet", get(wallet::get_wallet).patch(wallet::update_wallet))
        .route("/payouts/initiate", post(payout::initiate_payout))
        .route("/webhooks/:gateway", post(webhook::receive_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
