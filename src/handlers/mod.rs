use axum::response::Response;
use serde::Serialize;

use crate::utils::response::success;

pub mod cart;
pub mod extract;
pub mod order;
pub mod payout;
pub mod promotion;
pub mod wallet;
pub mod webhook;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "boxoffice-api",
    };

    success(payload, "Health check successful")
}
