//! Wallet payouts: debit up front, settle or reverse on the gateway's word.

use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::gateway::{GatewayRegistry, PayoutRequest};
use crate::models::payout::{PayoutFailure, WalletPayout};
use crate::services::wallet::{self, LockedWallet};
use crate::utils::error::{AppError, AppResult};

async fn insert_payout(conn: &mut PgConnection, payout: &WalletPayout) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO wallet_payouts (
            id, wallet_id, amount, status, description, reference_id, payment_gateway,
            debit_transaction_id, payment_link, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(payout.id)
    .bind(payout.wallet_id)
    .bind(payout.amount)
    .bind(payout.status)
    .bind(&payout.description)
    .bind(&payout.reference_id)
    .bind(&payout.payment_gateway)
    .bind(payout.debit_transaction_id)
    .bind(&payout.payment_link)
    .bind(payout.created_at)
    .bind(payout.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn store_status(conn: &mut PgConnection, payout: &WalletPayout) -> AppResult<()> {
    sqlx::query("UPDATE wallet_payouts SET status = $2, payment_link = $3, updated_at = now() WHERE id = $1")
        .bind(payout.id)
        .bind(payout.status)
        .bind(&payout.payment_link)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Debits the locked wallet, then records the pending payout against that
/// debit.
pub async fn create_payout(
    conn: &mut PgConnection,
    wallet: &mut LockedWallet,
    amount: Decimal,
    reference_id: Option<String>,
    payment_gateway: Option<String>,
    payment_link: Option<String>,
    description: Option<String>,
) -> AppResult<WalletPayout> {
    if amount <= Decimal::ZERO {
        return Err(AppError::InvalidAmount);
    }
    let debit = wallet::debit(conn, wallet, amount, description.as_deref()).await?;
    let payout = WalletPayout::pending(
        wallet.id(),
        amount,
        debit.id,
        reference_id,
        payment_gateway,
        payment_link,
        description,
    );
    insert_payout(conn, &payout).await?;

    tracing::info!(payout_id = %payout.id, wallet_id = %payout.wallet_id, amount = %amount, "Payout created");
    Ok(payout)
}

pub async fn lock_payout_by_reference(conn: &mut PgConnection, reference_id: &str, gateway: &str) -> AppResult<WalletPayout> {
    sqlx::query_as::<_, WalletPayout>(
        "SELECT * FROM wallet_payouts WHERE reference_id = $1 AND payment_gateway = $2 FOR UPDATE",
    )
    .bind(reference_id)
    .bind(gateway)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Payout {}", reference_id)))
}

pub async fn complete_payout(conn: &mut PgConnection, reference_id: &str, gateway: &str) -> AppResult<WalletPayout> {
    let mut payout = lock_payout_by_reference(conn, reference_id, gateway).await?;
    payout.complete()?;
    store_status(conn, &payout).await?;
    tracing::info!(payout_id = %payout.id, "Payout completed");
    Ok(payout)
}

async fn lock_payout(conn: &mut PgConnection, payout_id: Uuid) -> AppResult<WalletPayout> {
    sqlx::query_as::<_, WalletPayout>("SELECT * FROM wallet_payouts WHERE id = $1 FOR UPDATE")
        .bind(payout_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Payout {}", payout_id)))
}

async fn fail_locked(conn: &mut PgConnection, payout: &mut WalletPayout) -> AppResult<()> {
    if payout.fail() == PayoutFailure::AlreadyFailed {
        tracing::info!(payout_id = %payout.id, "Payout already failed");
        return Ok(());
    }
    store_status(conn, payout).await?;

    let mut locked = wallet::lock_wallet(conn, payout.wallet_id).await?;
    let description = format!("Failed payout {}", payout.id);
    wallet::credit(conn, &mut locked, payout.amount, Some(&description)).await?;

    tracing::warn!(payout_id = %payout.id, amount = %payout.amount, "Payout failed, amount returned to wallet");
    Ok(())
}

/// Idempotent: the wallet is credited back only on the first failure.
pub async fn fail_payout(conn: &mut PgConnection, reference_id: &str, gateway: &str) -> AppResult<WalletPayout> {
    let mut payout = lock_payout_by_reference(conn, reference_id, gateway).await?;
    fail_locked(conn, &mut payout).await?;
    Ok(payout)
}

/// Recipient details for a payout link.
#[derive(Debug, Clone)]
pub struct PayoutRecipient {
    pub name: String,
    pub phone_number: String,
    pub description: Option<String>,
}

/// Pays the user's whole balance out through the active gateway.
///
/// The debit and a pending payout commit before the gateway is called, so no
/// wallet lock is held across the request and a link is only issued for money
/// already set aside. A gateway error reverses the payout.
pub async fn initiate_payout(
    pool: &PgPool,
    gateways: &GatewayRegistry,
    user_id: Uuid,
    recipient: PayoutRecipient,
) -> AppResult<WalletPayout> {
    let gateway = gateways.active()?;
    let description = recipient
        .description
        .clone()
        .unwrap_or_else(|| "Wallet payout".to_string());

    let mut tx = pool.begin().await?;
    let mut locked = wallet::lock_wallet_for_user(&mut tx, user_id).await?;
    let amount = locked.balance();
    if amount <= Decimal::ZERO {
        return Err(AppError::PayoutNotValid(
            "Wallet has no balance to pay out".to_string(),
        ));
    }
    let pending = create_payout(
        &mut tx,
        &mut locked,
        amount,
        None,
        Some(gateway.name().to_string()),
        None,
        Some(description.clone()),
    )
    .await?;
    tx.commit().await?;

    let request = PayoutRequest {
        amount,
        user_id,
        name: recipient.name,
        phone_number: recipient.phone_number,
        description,
    };
    let response = match gateway.create_payout(&request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(payout_id = %pending.id, error = %e, "Payout link request failed, reversing payout");
            let mut tx = pool.begin().await?;
            let mut payout = lock_payout(&mut tx, pending.id).await?;
            fail_locked(&mut tx, &mut payout).await?;
            tx.commit().await?;
            return Err(e);
        }
    };

    let mut tx = pool.begin().await?;
    let mut payout = lock_payout(&mut tx, pending.id).await?;
    payout.reference_id = Some(response.id);
    payout.payment_link = response.payment_link;
    sqlx::query(
        "UPDATE wallet_payouts SET reference_id = $2, payment_link = $3, updated_at = now() WHERE id = $1",
    )
    .bind(payout.id)
    .bind(&payout.reference_id)
    .bind(&payout.payment_link)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(payout_id = %payout.id, amount = %amount, "Payout link issued");
    Ok(payout)
}

/// Newest first.
pub async fn payouts_for_wallet(conn: &mut PgConnection, wallet_id: Uuid) -> AppResult<Vec<WalletPayout>> {
    let rows = sqlx::query_as::<_, WalletPayout>(
        "SELECT * FROM wallet_payouts WHERE wallet_id = $1 ORDER BY created_at DESC",
    )
    .bind(wallet_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}
