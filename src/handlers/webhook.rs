use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;

use crate::gateway::RAZORPAY_GATEWAY;
use crate::services::webhook;
use crate::state::AppState;
use crate::utils::error::{AppError, AppResult};
use crate::utils::response::empty_success;

fn signature_header(gateway: &str) -> &'static str {
    match gateway {
        RAZORPAY_GATEWAY => "x-razorpay-signature",
        _ => "x-webhook-signature",
    }
}

/// Raw body is kept as bytes: the signature covers it exactly.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let signature = headers
        .get(signature_header(&gateway))
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidWebhookSignature)?;

    webhook::process_webhook(&state.orders, &gateway, &body, signature).await?;
    Ok(empty_success("Webhook processed"))
}
