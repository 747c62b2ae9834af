use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::extract::CurrentUser;
use crate::models::order::Order;
use crate::models::ticket::Ticket;
use crate::services::order;
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::{created, success};

#[derive(Debug, Deserialize)]
pub struct RechargeRequest {
    pub amount: Decimal,
}

/// `payment_info` is passed to the gateway verbatim; objects are re-serialised.
#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub payment_info: Value,
}

#[derive(Serialize)]
struct OrderView {
    #[serde(flatten)]
    order: Order,
    tickets: Vec<Ticket>,
}

pub async fn create_recharge_order(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(body): Json<RechargeRequest>,
) -> AppResult<Response> {
    let order = state.orders.create_recharge_order(user_id, body.amount).await?;
    Ok(created(order, "Recharge order created"))
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<Uuid>,
    Json(body): Json<ConfirmRequest>,
) -> AppResult<Response> {
    let proof = match body.payment_info {
        Value::String(raw) => raw,
        other => other.to_string(),
    };
    let order = state.orders.confirm_payment(user_id, order_id, &proof).await?;

    let mut conn = state.pool.acquire().await?;
    let tickets = order::tickets_for_order(&mut conn, order.id).await?;
    Ok(success(OrderView { order, tickets }, "Payment processed"))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Response> {
    let order = state.orders.cancel_order(user_id, order_id).await?;
    Ok(success(order, "Order cancelled"))
}
