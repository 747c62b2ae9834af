//! Wallet ledger: credit, debit and transfer against row-locked wallets.
//!
//! Every mutating function takes a [`LockedWallet`], which can only be
//! produced by `SELECT ... FOR UPDATE` on the caller's connection. All work
//! therefore happens on the locked copy, inside the caller's transaction.

use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::wallet::{TransactionKind, Wallet, WalletTransaction};
use crate::utils::error::{AppError, AppResult};

/// A wallet row held under `FOR UPDATE` by the current transaction.
#[derive(Debug)]
pub struct LockedWallet(Wallet);

impl LockedWallet {
    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn balance(&self) -> Decimal {
        self.0.balance
    }

    pub fn wallet(&self) -> &Wallet {
        &self.0
    }
}

/// Returns the user's wallet, creating an empty one on first use.
pub async fn get_or_create_wallet(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Wallet> {
    let fresh = Wallet::new(user_id);
    sqlx::query(
        "INSERT INTO wallets (id, user_id, balance, can_receive_payments, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(fresh.id)
    .bind(fresh.user_id)
    .bind(fresh.balance)
    .bind(fresh.can_receive_payments)
    .bind(fresh.created_at)
    .bind(fresh.updated_at)
    .execute(&mut *conn)
    .await?;

    let wallet = sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(wallet)
}

/// Existing wallet only; use [`get_or_create_wallet`] when one should be opened.
pub async fn wallet_for_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Wallet> {
    sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Wallet".to_string()))
}

pub async fn lock_wallet(conn: &mut PgConnection, wallet_id: Uuid) -> AppResult<LockedWallet> {
    sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE id = $1 FOR UPDATE")
        .bind(wallet_id)
        .fetch_optional(&mut *conn)
        .await?
        .map(LockedWallet)
        .ok_or_else(|| AppError::NotFound(format!("Wallet {}", wallet_id)))
}

pub async fn lock_wallet_for_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<LockedWallet> {
    let wallet = get_or_create_wallet(conn, user_id).await?;
    lock_wallet(conn, wallet.id).await
}

/// Locks every listed wallet in ascending id order, the order all
/// multi-wallet operations share. Duplicates are locked once.
pub async fn lock_wallets(conn: &mut PgConnection, wallet_ids: &[Uuid]) -> AppResult<Vec<LockedWallet>> {
    let mut ids = wallet_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    let mut locked = Vec::with_capacity(ids.len());
    for id in ids {
        locked.push(lock_wallet(conn, id).await?);
    }
    Ok(locked)
}

/// [`lock_wallets`] keyed by owner, opening missing wallets first.
pub async fn lock_wallets_for_users(conn: &mut PgConnection, user_ids: &[Uuid]) -> AppResult<Vec<LockedWallet>> {
    let mut wallet_ids = Vec::with_capacity(user_ids.len());
    for user_id in user_ids {
        wallet_ids.push(get_or_create_wallet(conn, *user_id).await?.id);
    }
    lock_wallets(conn, &wallet_ids).await
}

fn take(locked: &mut Vec<LockedWallet>, wallet_id: Uuid) -> Option<LockedWallet> {
    let index = locked.iter().position(|w| w.id() == wallet_id)?;
    Some(locked.swap_remove(index))
}

async fn record(
    conn: &mut PgConnection,
    wallet: &LockedWallet,
    kind: TransactionKind,
    amount: Decimal,
    description: Option<&str>,
) -> AppResult<WalletTransaction> {
    sqlx::query("UPDATE wallets SET balance = $2, updated_at = now() WHERE id = $1")
        .bind(wallet.id())
        .bind(wallet.balance())
        .execute(&mut *conn)
        .await?;

    let transaction = sqlx::query_as::<_, WalletTransaction>(
        "INSERT INTO wallet_transactions (id, wallet_id, amount, kind, description)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(wallet.id())
    .bind(amount)
    .bind(kind)
    .bind(description)
    .fetch_one(&mut *conn)
    .await?;

    tracing::info!(
        wallet_id = %wallet.id(),
        transaction_id = %transaction.id,
        kind = ?kind,
        amount = %amount,
        balance = %wallet.balance(),
        "Wallet transaction recorded"
    );
    Ok(transaction)
}

/// Opts the user's wallet in or out of receiving transfers.
pub async fn set_can_receive_payments(conn: &mut PgConnection, user_id: Uuid, enabled: bool) -> AppResult<Wallet> {
    let locked = lock_wallet_for_user(conn, user_id).await?;
    let wallet = sqlx::query_as::<_, Wallet>(
        "UPDATE wallets SET can_receive_payments = $2, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(locked.id())
    .bind(enabled)
    .fetch_one(&mut *conn)
    .await?;

    tracing::info!(wallet_id = %wallet.id, can_receive_payments = enabled, "Wallet settings updated");
    Ok(wallet)
}

pub async fn credit(
    conn: &mut PgConnection,
    wallet: &mut LockedWallet,
    amount: Decimal,
    description: Option<&str>,
) -> AppResult<WalletTransaction> {
    wallet.0.apply_credit(amount)?;
    record(conn, wallet, TransactionKind::Credit, amount, description).await
}

pub async fn debit(
    conn: &mut PgConnection,
    wallet: &mut LockedWallet,
    amount: Decimal,
    description: Option<&str>,
) -> AppResult<WalletTransaction> {
    wallet.0.apply_debit(amount)?;
    record(conn, wallet, TransactionKind::Debit, amount, description).await
}

/// Locks both wallets in ascending id order, then debits and credits.
pub async fn transfer(
    conn: &mut PgConnection,
    from_wallet_id: Uuid,
    to_wallet_id: Uuid,
    amount: Decimal,
    description: Option<&str>,
) -> AppResult<(WalletTransaction, WalletTransaction)> {
    if amount <= Decimal::ZERO {
        return Err(AppError::InvalidAmount);
    }
    if from_wallet_id == to_wallet_id {
        return Err(AppError::TransferNotAllowed);
    }

    let mut locked = lock_wallets(conn, &[from_wallet_id, to_wallet_id]).await?;
    let (mut from, mut to) = match (take(&mut locked, from_wallet_id), take(&mut locked, to_wallet_id)) {
        (Some(from), Some(to)) => (from, to),
        _ => return Err(AppError::NotFound("Wallet".to_string())),
    };

    if !to.wallet().can_receive_payments {
        return Err(AppError::TransferNotAllowed);
    }

    let debit_txn = debit(conn, &mut from, amount, description).await?;
    let credit_txn = credit(conn, &mut to, amount, description).await?;
    Ok((debit_txn, credit_txn))
}

pub async fn find_transaction(conn: &mut PgConnection, transaction_id: Uuid) -> AppResult<WalletTransaction> {
    sqlx::query_as::<_, WalletTransaction>("SELECT * FROM wallet_transactions WHERE id = $1")
        .bind(transaction_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Wallet transaction {}", transaction_id)))
}

/// Newest first.
pub async fn transactions(conn: &mut PgConnection, wallet_id: Uuid, limit: i64) -> AppResult<Vec<WalletTransaction>> {
    let rows = sqlx::query_as::<_, WalletTransaction>(
        "SELECT * FROM wallet_transactions WHERE wallet_id = $1 ORDER BY created_at DESC LIMIT $2",
    )
    .bind(wallet_id)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}
