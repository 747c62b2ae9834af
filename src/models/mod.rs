use rust_decimal::{Decimal, RoundingStrategy};

pub mod cart;
pub mod event;
pub mod order;
pub mod payout;
pub mod product;
pub mod promotion;
pub mod question;
pub mod quota;
pub mod ticket;
pub mod wallet;

/// Money is stored with two decimal places.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
