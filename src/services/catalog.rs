//! Read access to the catalog collaborator (events and products).

use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::event::Event;
use crate::models::product::{CatalogProduct, Product};
use crate::services::quota;
use crate::utils::error::{AppError, AppResult};

pub async fn find_event(conn: &mut PgConnection, event_id: Uuid) -> AppResult<Event> {
    sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
        .bind(event_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {}", event_id)))
}

pub async fn find_product(conn: &mut PgConnection, product_id: Uuid) -> AppResult<Product> {
    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Product {}", product_id)))
}

/// Product, its event and its quota memberships.
pub async fn load_product(conn: &mut PgConnection, product_id: Uuid) -> AppResult<CatalogProduct> {
    let product = find_product(conn, product_id).await?;
    let event = find_event(conn, product.event_id).await?;
    let quota_ids = quota::product_quota_ids(conn, product.id).await?;
    Ok(CatalogProduct {
        product,
        event,
        quota_ids,
    })
}
