use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::order::Order;

/// One admission unit. Cancelled with its order, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Option<Uuid>,
    pub order_id: Uuid,
    pub is_cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// One ticket per purchased unit of the order.
    pub fn for_order(order: &Order) -> Vec<Ticket> {
        let now = Utc::now();
        (0..order.ticket_quantity())
            .map(|_| Ticket {
                id: Uuid::new_v4(),
                user_id: order.user_id,
                product_id: order.product_id,
                order_id: order.id,
                is_cancelled: false,
                created_at: now,
                updated_at: now,
            })
            .collect()
    }
}
