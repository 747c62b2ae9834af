use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{error, warn};

use crate::utils::response::error as error_response;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Amount must be greater than 0")]
    InvalidAmount,

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Cannot transfer to this wallet")]
    TransferNotAllowed,

    #[error("Not enough quota available")]
    QuotaExhausted,

    #[error("Invalid coupon code")]
    InvalidCoupon,

    #[error("Coupon code cannot be applied to this cart")]
    CouponNotApplicable,

    #[error("Some promotions are no longer valid. Please refresh cart")]
    StalePromotions,

    #[error("Cart is no longer valid")]
    CartNotModifiable,

    #[error("Product is not available for sale")]
    ProductUnavailable,

    #[error("Please answer all required questions")]
    MissingAnswers,

    #[error("Invalid answer: {0}")]
    InvalidAnswer(String),

    #[error("Order is no longer valid")]
    OrderNotValid,

    #[error("Payout cannot move to this state: {0}")]
    PayoutNotValid(String),

    #[error("Recharge amount must be between {min} and {max}")]
    RechargeOutOfBounds { min: Decimal, max: Decimal },

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Webhook signature verification failed")]
    InvalidWebhookSignature,

    #[error("Unrecognized webhook event: {0}")]
    UnrecognizedWebhookEvent(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    /// Caller-correctable failures. Never retried, and the reconciliation path
    /// treats them as "this order cannot be confirmed any more".
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::ValidationError(_)
                | AppError::InvalidAmount
                | AppError::InsufficientBalance
                | AppError::TransferNotAllowed
                | AppError::QuotaExhausted
                | AppError::InvalidCoupon
                | AppError::CouponNotApplicable
                | AppError::StalePromotions
                | AppError::CartNotModifiable
                | AppError::ProductUnavailable
                | AppError::MissingAnswers
                | AppError::InvalidAnswer(_)
                | AppError::OrderNotValid
                | AppError::PayoutNotValid(_)
                | AppError::RechargeOutOfBounds { .. }
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidWebhookSignature | AppError::UnrecognizedWebhookEvent(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::InvalidAmount => "INVALID_AMOUNT",
            AppError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            AppError::TransferNotAllowed => "TRANSFER_NOT_ALLOWED",
            AppError::QuotaExhausted => "QUOTA_EXHAUSTED",
            AppError::InvalidCoupon => "INVALID_COUPON",
            AppError::CouponNotApplicable => "COUPON_NOT_APPLICABLE",
            AppError::StalePromotions => "STALE_PROMOTIONS",
            AppError::CartNotModifiable => "CART_NOT_MODIFIABLE",
            AppError::ProductUnavailable => "PRODUCT_UNAVAILABLE",
            AppError::MissingAnswers => "MISSING_ANSWERS",
            AppError::InvalidAnswer(_) => "INVALID_ANSWER",
            AppError::OrderNotValid => "ORDER_NOT_VALID",
            AppError::PayoutNotValid(_) => "PAYOUT_NOT_VALID",
            AppError::RechargeOutOfBounds { .. } => "RECHARGE_OUT_OF_BOUNDS",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidWebhookSignature => "INVALID_WEBHOOK_SIGNATURE",
            AppError::UnrecognizedWebhookEvent(_) => "UNRECOGNIZED_WEBHOOK_EVENT",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
            AppError::ExternalServiceError(msg) | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            _ => {
                warn!(code = self.code(), message = %self, "Request rejected");
            }
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Do not expose internal details in the API response
        error_response(code, self.public_message(), None, status)
    }
}
