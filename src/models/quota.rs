use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::error::{AppError, AppResult};

/// Capacity counter shared by products, or owned by a single promotion.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Quota {
    pub id: Uuid,
    pub name: String,
    pub max_count: i32,
    pub slots_booked: i32,
    pub promotion_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of returning slots to a quota whose counter may have drifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Released,
    /// Fewer slots were booked than returned; the counter was clamped to zero.
    Clamped { booked: i32 },
}

impl Quota {
    pub fn new(name: impl Into<String>, max_count: i32, promotion_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            max_count,
            slots_booked: 0,
            promotion_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining_slots(&self) -> i32 {
        self.max_count - self.slots_booked
    }

    pub fn is_full(&self) -> bool {
        self.slots_booked >= self.max_count
    }

    pub fn can_reserve(&self, quantity: i32) -> bool {
        self.remaining_slots() >= quantity
    }

    pub fn reserve(&mut self, quantity: i32) -> AppResult<()> {
        if quantity <= 0 {
            return Err(AppError::ValidationError(
                "Quantity must be greater than 0".to_string(),
            ));
        }
        if !self.can_reserve(quantity) {
            return Err(AppError::QuotaExhausted);
        }
        self.slots_booked += quantity;
        Ok(())
    }

    pub fn release(&mut self, quantity: i32) -> Release {
        if self.slots_booked < quantity {
            let booked = self.slots_booked;
            self.slots_booked = 0;
            return Release::Clamped { booked };
        }
        self.slots_booked -= quantity;
        Release::Released
    }
}

/// Reserves `quantity` on every quota or on none of them.
pub fn reserve_all(quotas: &mut [Quota], quantity: i32) -> AppResult<()> {
    if quotas.iter().any(|q| !q.can_reserve(quantity)) {
        return Err(AppError::QuotaExhausted);
    }
    for quota in quotas.iter_mut() {
        quota.reserve(quantity)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reserve_is_all_or_nothing() {
        let mut quotas = vec![Quota::new("floor", 10, None), Quota::new("vip", 1, None)];

        let err = reserve_all(&mut quotas, 2).unwrap_err();
        assert!(matches!(err, AppError::QuotaExhausted));
        assert!(quotas.iter().all(|q| q.slots_booked == 0));

        reserve_all(&mut quotas, 1).unwrap();
        assert_eq!(quotas[0].slots_booked, 1);
        assert!(quotas[1].is_full());
    }

    #[test]
    fn release_clamps_desynchronised_counter() {
        let mut quota = Quota::new("promo", 5, None);
        quota.reserve(2).unwrap();

        assert_eq!(quota.release(1), Release::Released);
        assert_eq!(quota.release(3), Release::Clamped { booked: 1 });
        assert_eq!(quota.slots_booked, 0);
    }

    #[test]
    fn last_slot_goes_to_one_checkout() {
        let mut quota = Quota::new("single", 1, None);
        assert!(quota.reserve(1).is_ok());
        assert!(matches!(quota.reserve(1), Err(AppError::QuotaExhausted)));
        assert_eq!(quota.slots_booked, 1);
    }

    proptest! {
        #[test]
        fn never_oversold(max in 1..50i32, requests in proptest::collection::vec(1..5i32, 0..40)) {
            let mut quota = Quota::new("q", max, None);
            let mut granted = 0;
            for quantity in requests {
                if quota.reserve(quantity).is_ok() {
                    granted += quantity;
                }
                prop_assert!(quota.slots_booked >= 0 && quota.slots_booked <= quota.max_count);
            }
            prop_assert!(granted <= max);
            prop_assert_eq!(granted, quota.slots_booked);
        }
    }
}
