//! Webhook reconciliation. Uses the same locks and state checks as the
//! synchronous confirmation path, so duplicate or racing deliveries settle to
//! the same result.

use crate::gateway::WebhookEvent;
use crate::services::order::{self, OrderService};
use crate::services::payout;
use crate::utils::error::AppResult;

/// Verifies, classifies and applies one webhook delivery for `gateway_name`.
pub async fn process_webhook(
    orders: &OrderService,
    gateway_name: &str,
    raw: &[u8],
    signature: &str,
) -> AppResult<WebhookEvent> {
    let gateway = orders.gateways().get(gateway_name)?;
    let details = gateway.get_webhook_details(raw, signature)?;
    let name = gateway.name();

    let mut tx = orders.pool().begin().await?;
    match &details.event {
        WebhookEvent::PaymentSuccess { payment_id } => {
            let mut order = order::lock_order_by_payment(&mut tx, payment_id, name).await?;
            orders.mark_confirm_or_refund(&mut tx, &mut order).await?;
        }
        WebhookEvent::PaymentFailed { payment_id } => {
            let mut order = order::lock_order_by_payment(&mut tx, payment_id, name).await?;
            orders.mark_payment_failed(&mut tx, &mut order).await?;
        }
        WebhookEvent::PayoutSuccess { payout_id } => {
            payout::complete_payout(&mut tx, payout_id, name).await?;
        }
        WebhookEvent::PayoutFailed { payout_id } => {
            payout::fail_payout(&mut tx, payout_id, name).await?;
        }
        WebhookEvent::NoOp { event } => {
            tracing::debug!(gateway = name, event = %event, "Webhook acknowledged without action");
        }
    }
    tx.commit().await?;

    tracing::info!(gateway = name, event = ?details.event, "Webhook processed");
    Ok(details.event)
}
