use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::extract::CurrentUser;
use crate::models::payout::WalletPayout;
use crate::models::wallet::{Wallet, WalletTransaction};
use crate::services::{payout, wallet};
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::success;

const RECENT_TRANSACTIONS: i64 = 50;

#[derive(Serialize)]
struct WalletView {
    wallet: Wallet,
    transactions: Vec<WalletTransaction>,
    payouts: Vec<WalletPayout>,
}

pub async fn get_wallet(State(state): State<AppState>, CurrentUser(user_id): CurrentUser) -> AppResult<Response> {
    let mut conn = state.pool.acquire().await?;
    let wallet = wallet::get_or_create_wallet(&mut conn, user_id).await?;
    let transactions = wallet::transactions(&mut conn, wallet.id, RECENT_TRANSACTIONS).await?;
    let payouts = payout::payouts_for_wallet(&mut conn, wallet.id).await?;

    Ok(success(
        WalletView {
            wallet,
            transactions,
            payouts,
        },
        "Wallet retrieved",
    ))
}

#[derive(Debug, Deserialize)]
pub struct UpdateWalletRequest {
    pub can_receive_payments: bool,
}

pub async fn update_wallet(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(body): Json<UpdateWalletRequest>,
) -> AppResult<Response> {
    let mut tx = state.pool.begin().await?;
    let wallet = wallet::set_can_receive_payments(&mut tx, user_id, body.can_receive_payments).await?;
    tx.commit().await?;
    Ok(success(wallet, "Wallet updated"))
}
