use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Catalog event. Only the sale window matters to checkout.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub sale_start: Option<DateTime<Utc>>,
    pub sale_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Missing bounds are treated as "now", so an event without a window is
    /// always on sale while active.
    pub fn is_sale_active(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        let start = self.sale_start.unwrap_or(now);
        let end = self.sale_end.unwrap_or(now);
        start <= now && now <= end
    }
}
