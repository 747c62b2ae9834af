//! In-house gateway paying from the purchaser's wallet.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use super::{
    PaymentGateway, PaymentOrder, PaymentOrderStatus, PayoutRequest, PayoutResponse, WebhookPayload,
    WALLET_GATEWAY,
};
use crate::services::wallet;
use crate::utils::error::{AppError, AppResult};

/// Debits happen inside the caller's transaction, so a wallet payment order
/// is always already settled.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalletGateway;

#[async_trait]
impl PaymentGateway for WalletGateway {
    fn name(&self) -> &'static str {
        WALLET_GATEWAY
    }

    fn settles_in_transaction(&self) -> bool {
        true
    }

    async fn create_order(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        amount: Decimal,
        tag: Option<&str>,
    ) -> AppResult<PaymentOrder> {
        let mut locked = wallet::lock_wallet_for_user(conn, user_id).await?;
        let description = format!("Debit for cart #{}", tag.unwrap_or("-"));
        let transaction = wallet::debit(conn, &mut locked, amount, Some(&description)).await?;
        Ok(PaymentOrder {
            id: transaction.id.to_string(),
            amount,
            status: PaymentOrderStatus::Success,
        })
    }

    /// The proof is the debit transaction id the client got back at checkout.
    async fn confirm_payment(&self, client_proof: &str, stored_reference: &str) -> AppResult<bool> {
        Ok(client_proof.trim() == stored_reference)
    }

    async fn refund_payment(&self, conn: &mut PgConnection, reference: &str) -> AppResult<bool> {
        let transaction_id = Uuid::parse_str(reference)
            .map_err(|_| AppError::NotFound(format!("Wallet transaction {}", reference)))?;
        let debit = wallet::find_transaction(conn, transaction_id).await?;
        let mut locked = wallet::lock_wallet(conn, debit.wallet_id).await?;
        let description = format!("Refund for transaction #{}", reference);
        wallet::credit(conn, &mut locked, debit.amount, Some(&description)).await?;
        Ok(true)
    }

    fn get_webhook_details(&self, _raw: &[u8], _signature: &str) -> AppResult<WebhookPayload> {
        Err(AppError::ValidationError(
            "Wallet payments do not send webhooks".to_string(),
        ))
    }

    async fn create_payout(&self, _request: &PayoutRequest) -> AppResult<PayoutResponse> {
        Err(AppError::ValidationError(
            "Payouts cannot be made to a wallet".to_string(),
        ))
    }
}
