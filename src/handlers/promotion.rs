use axum::extract::{Path, State};
use axum::response::Response;
use uuid::Uuid;

use crate::services::{catalog, promotion};
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::success;

/// Public listing. Unlisted promotions (minted promoter coupons) stay hidden.
pub async fn list_product_promotions(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Response> {
    let mut conn = state.pool.acquire().await?;
    let product = catalog::find_product(&mut conn, product_id).await?;
    let promotions = promotion::list_for_product(&mut conn, &product).await?;
    Ok(success(promotions, "Promotions retrieved"))
}
