use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use super::extract::CurrentUser;
use crate::services::payout::{self, PayoutRecipient};
use crate::state::AppState;
use crate::utils::error::{AppError, AppResult};
use crate::utils::response::created;

#[derive(Debug, Deserialize)]
pub struct InitiatePayoutRequest {
    pub name: String,
    pub phone_number: String,
    pub description: Option<String>,
}

pub async fn initiate_payout(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(body): Json<InitiatePayoutRequest>,
) -> AppResult<Response> {
    if body.name.trim().is_empty() || body.phone_number.trim().is_empty() {
        return Err(AppError::ValidationError(
            "Name and phone number are required for a payout".to_string(),
        ));
    }

    let payout = payout::initiate_payout(
        &state.pool,
        state.orders.gateways(),
        user_id,
        PayoutRecipient {
            name: body.name.trim().to_string(),
            phone_number: body.phone_number.trim().to_string(),
            description: body.description,
        },
    )
    .await?;
    Ok(created(payout, "Payout initiated"))
}
