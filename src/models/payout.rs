use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payout_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletPayout {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub amount: Decimal,
    pub status: PayoutStatus,
    pub description: Option<String>,
    pub reference_id: Option<String>,
    pub payment_gateway: Option<String>,
    pub debit_transaction_id: Option<Uuid>,
    pub payment_link: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What `fail` did, so the caller knows whether to refund the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutFailure {
    Failed,
    AlreadyFailed,
}

impl WalletPayout {
    pub fn pending(
        wallet_id: Uuid,
        amount: Decimal,
        debit_transaction_id: Uuid,
        reference_id: Option<String>,
        payment_gateway: Option<String>,
        payment_link: Option<String>,
        description: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            amount,
            status: PayoutStatus::Pending,
            description,
            reference_id,
            payment_gateway,
            debit_transaction_id: Some(debit_transaction_id),
            payment_link,
            created_at: now,
            updated_at: now,
        }
    }

    fn set_status(&mut self, status: PayoutStatus) {
        self.status = status;
        if status != PayoutStatus::Pending {
            self.payment_link = None;
        }
    }

    pub fn complete(&mut self) -> AppResult<()> {
        if self.status == PayoutStatus::Failed {
            return Err(AppError::PayoutNotValid(
                "Cannot complete a failed payout".to_string(),
            ));
        }
        self.set_status(PayoutStatus::Completed);
        Ok(())
    }

    pub fn fail(&mut self) -> PayoutFailure {
        if self.status == PayoutStatus::Failed {
            return PayoutFailure::AlreadyFailed;
        }
        self.set_status(PayoutStatus::Failed);
        PayoutFailure::Failed
    }
}
