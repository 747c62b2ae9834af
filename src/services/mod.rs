pub mod cart;
pub mod catalog;
pub mod order;
pub mod payout;
pub mod promotion;
pub mod question;
pub mod quota;
pub mod wallet;
pub mod webhook;
