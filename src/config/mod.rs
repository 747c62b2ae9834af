use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

/// Pricing knobs shared by cart pricing and checkout.
#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub platform_fee: Decimal,
    pub tax_rate: Decimal,
    /// Orders whose net price is below this are confirmed without a payment.
    pub min_payable_amount: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            platform_fee: Decimal::new(1000, 2),
            tax_rate: Decimal::new(18, 2),
            min_payable_amount: Decimal::ONE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RazorpayConfig {
    pub api_key: String,
    pub api_secret: String,
    pub webhook_secret: String,
    pub account_number: String,
    pub base_url: String,
    pub payout_expiry_secs: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub max_connections: u32,
    pub pricing: PricingConfig,
    pub min_wallet_recharge: Decimal,
    pub max_wallet_recharge: Decimal,
    pub active_payment_gateway: String,
    pub razorpay: RazorpayConfig,
    pub cart_expiry_minutes: i64,
    pub order_expiry_minutes: i64,
    pub sweep_batch_size: i64,
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = PricingConfig::default();
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/boxoffice".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string()),
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5),
            pricing: PricingConfig {
                platform_fee: parse_or("PLATFORM_FEE", defaults.platform_fee),
                tax_rate: parse_or("TAX_RATE", defaults.tax_rate),
                min_payable_amount: defaults.min_payable_amount,
            },
            min_wallet_recharge: parse_or("MIN_WALLET_RECHARGE", Decimal::from(100)),
            max_wallet_recharge: parse_or("MAX_WALLET_RECHARGE", Decimal::from(10_000)),
            active_payment_gateway: env::var("ACTIVE_PAYMENT_GATEWAY")
                .unwrap_or_else(|_| "razorpay".to_string()),
            razorpay: RazorpayConfig {
                api_key: env::var("RAZORPAY_API_KEY").unwrap_or_default(),
                api_secret: env::var("RAZORPAY_API_SECRET").unwrap_or_default(),
                webhook_secret: env::var("RAZORPAY_WEBHOOK_SECRET").unwrap_or_default(),
                account_number: env::var("RAZORPAY_ACCOUNT_NUMBER").unwrap_or_default(),
                base_url: env::var("RAZORPAY_BASE_URL")
                    .unwrap_or_else(|_| "https://api.razorpay.com/v1".to_string()),
                payout_expiry_secs: env::var("PAYOUT_EXPIRY_IN_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok()),
            },
            cart_expiry_minutes: parse_or("CART_EXPIRY_MINUTES", 30),
            order_expiry_minutes: parse_or("ORDER_EXPIRY_MINUTES", 30),
            sweep_batch_size: parse_or("SWEEP_BATCH_SIZE", 500),
            sweep_interval_secs: parse_or("SWEEP_INTERVAL_SECS", 60),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Config: invalid value for {}: '{}', using default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}
