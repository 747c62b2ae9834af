use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use chrono::Duration;
use serde::Deserialize;
use uuid::Uuid;

use super::extract::CurrentUser;
use crate::models::cart::PaymentMode;
use crate::services::cart;
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::{created, empty_success, success};

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct CreateCartRequest {
    pub product_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    #[serde(default)]
    pub is_promoter: bool,
}

#[derive(Debug, Deserialize)]
pub struct QuantityRequest {
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct CouponRequest {
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentModeRequest {
    pub payment_mode: PaymentMode,
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub question_id: Uuid,
    pub answer: Option<String>,
}

pub async fn create_cart(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(body): Json<CreateCartRequest>,
) -> AppResult<Response> {
    let mut tx = state.pool.begin().await?;
    let cart = cart::create_cart(
        &mut tx,
        user_id,
        body.product_id,
        body.quantity,
        body.is_promoter,
        &state.config.pricing,
        Duration::minutes(state.config.cart_expiry_minutes),
    )
    .await?;
    tx.commit().await?;
    Ok(created(cart, "Cart created"))
}

pub async fn change_quantity(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(cart_id): Path<Uuid>,
    Json(body): Json<QuantityRequest>,
) -> AppResult<Response> {
    let mut tx = state.pool.begin().await?;
    let cart = cart::change_quantity(&mut tx, user_id, cart_id, body.quantity, &state.config.pricing).await?;
    tx.commit().await?;
    Ok(success(cart, "Quantity updated"))
}

pub async fn apply_coupon(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(cart_id): Path<Uuid>,
    Json(body): Json<CouponRequest>,
) -> AppResult<Response> {
    let mut tx = state.pool.begin().await?;
    let cart = cart::apply_coupon(&mut tx, user_id, cart_id, body.code, &state.config.pricing).await?;
    tx.commit().await?;
    Ok(success(cart, "Coupon updated"))
}

pub async fn change_payment_mode(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(cart_id): Path<Uuid>,
    Json(body): Json<PaymentModeRequest>,
) -> AppResult<Response> {
    let mut tx = state.pool.begin().await?;
    let cart = cart::change_payment_mode(&mut tx, user_id, cart_id, body.payment_mode, &state.config.pricing).await?;
    tx.commit().await?;
    Ok(success(cart, "Payment mode updated"))
}

pub async fn save_answer(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(cart_id): Path<Uuid>,
    Json(body): Json<AnswerRequest>,
) -> AppResult<Response> {
    let mut tx = state.pool.begin().await?;
    let answer = cart::save_answer(&mut tx, user_id, cart_id, body.question_id, body.answer.as_deref()).await?;
    tx.commit().await?;
    Ok(match answer {
        Some(answer) => success(answer, "Answer saved"),
        None => empty_success("Answer cleared"),
    })
}

pub async fn cancel_cart(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(cart_id): Path<Uuid>,
) -> AppResult<Response> {
    let mut tx = state.pool.begin().await?;
    let cart = cart::cancel_cart(&mut tx, user_id, cart_id).await?;
    tx.commit().await?;
    Ok(success(cart, "Cart cancelled"))
}

pub async fn checkout(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(cart_id): Path<Uuid>,
) -> AppResult<Response> {
    let order = state.orders.create_order(user_id, cart_id).await?;
    Ok(created(order, "Order created"))
}
