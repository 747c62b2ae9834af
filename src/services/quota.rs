//! Quota tracker: atomic reserve / release of capacity counters.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::quota::{self, Quota, Release};
use crate::utils::error::{AppError, AppResult};

fn sorted_unique(ids: &[Uuid]) -> Vec<Uuid> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Locks the quotas in ascending id order. `NO KEY UPDATE` still lets other
/// transactions insert rows referencing them.
async fn lock_quotas(conn: &mut PgConnection, ids: &[Uuid]) -> AppResult<Vec<Quota>> {
    let rows = sqlx::query_as::<_, Quota>(
        "SELECT * FROM quotas WHERE id = ANY($1) ORDER BY id FOR NO KEY UPDATE",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

async fn store_slots(conn: &mut PgConnection, quota: &Quota) -> AppResult<()> {
    sqlx::query("UPDATE quotas SET slots_booked = $2, updated_at = now() WHERE id = $1")
        .bind(quota.id)
        .bind(quota.slots_booked)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Reserves `quantity` slots on every quota or fails with `QuotaExhausted`
/// without touching any of them. Returns the committed ids.
pub async fn reserve(conn: &mut PgConnection, quota_ids: &[Uuid], quantity: i32) -> AppResult<Vec<Uuid>> {
    let ids = sorted_unique(quota_ids);
    if ids.is_empty() {
        return Ok(ids);
    }

    let mut quotas = lock_quotas(conn, &ids).await?;
    if quotas.len() != ids.len() {
        return Err(AppError::NotFound("Quota".to_string()));
    }

    quota::reserve_all(&mut quotas, quantity)?;
    for q in &quotas {
        store_slots(conn, q).await?;
    }

    tracing::debug!(quota_ids = ?ids, quantity, "Quota slots reserved");
    Ok(ids)
}

/// Returns slots. Drifted counters are clamped at zero and logged.
pub async fn release(conn: &mut PgConnection, quota_ids: &[Uuid], quantity: i32) -> AppResult<()> {
    let ids = sorted_unique(quota_ids);
    if ids.is_empty() || quantity <= 0 {
        return Ok(());
    }

    let mut quotas = lock_quotas(conn, &ids).await?;
    if quotas.len() != ids.len() {
        let found: Vec<Uuid> = quotas.iter().map(|q| q.id).collect();
        let missing: Vec<&Uuid> = ids.iter().filter(|id| !found.contains(id)).collect();
        tracing::warn!(missing = ?missing, "Releasing slots for quotas that no longer exist");
    }

    for q in quotas.iter_mut() {
        if let Release::Clamped { booked } = q.release(quantity) {
            tracing::warn!(
                quota_id = %q.id,
                booked,
                requested = quantity,
                "Quota counter out of sync, clamped to zero"
            );
        }
        store_slots(conn, q).await?;
    }
    Ok(())
}

pub async fn create_quota(
    conn: &mut PgConnection,
    name: &str,
    max_count: i32,
    promotion_id: Option<Uuid>,
    product_ids: &[Uuid],
) -> AppResult<Quota> {
    if max_count < 1 {
        return Err(AppError::ValidationError(
            "Quota must have at least one slot".to_string(),
        ));
    }
    let fresh = Quota::new(name, max_count, promotion_id);
    let created = sqlx::query_as::<_, Quota>(
        "INSERT INTO quotas (id, name, max_count, slots_booked, promotion_id)
         VALUES ($1, $2, $3, 0, $4)
         RETURNING *",
    )
    .bind(fresh.id)
    .bind(&fresh.name)
    .bind(fresh.max_count)
    .bind(fresh.promotion_id)
    .fetch_one(&mut *conn)
    .await?;

    for product_id in product_ids {
        sqlx::query("INSERT INTO product_quotas (product_id, quota_id) VALUES ($1, $2)")
            .bind(product_id)
            .bind(created.id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(created)
}

pub async fn product_quota_ids(conn: &mut PgConnection, product_id: Uuid) -> AppResult<Vec<Uuid>> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT quota_id FROM product_quotas WHERE product_id = $1 ORDER BY quota_id",
    )
    .bind(product_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

pub async fn promotion_quota_ids(conn: &mut PgConnection, promotion_ids: &[Uuid]) -> AppResult<Vec<Uuid>> {
    if promotion_ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM quotas WHERE promotion_id = ANY($1) ORDER BY id",
    )
    .bind(promotion_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}
