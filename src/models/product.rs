use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::event::Event;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub sale_start: Option<DateTime<Utc>>,
    pub sale_end: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub tickets_active_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Own window (each bound optional) and the parent event's window.
    pub fn is_sale_active(&self, event: &Event, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        let started = self.sale_start.map_or(true, |start| start <= now);
        let not_ended = self.sale_end.map_or(true, |end| now <= end);
        started && not_ended && event.is_sale_active(now)
    }
}

/// A product together with the catalog data checkout needs from it.
#[derive(Debug, Clone)]
pub struct CatalogProduct {
    pub product: Product,
    pub event: Event,
    pub quota_ids: Vec<Uuid>,
}

impl CatalogProduct {
    pub fn is_sale_active(&self, now: DateTime<Utc>) -> bool {
        self.product.is_sale_active(&self.event, now)
    }
}
