use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::gateway::GatewayRegistry;
use crate::services::order::OrderService;

/// Shared handles for every request. Gateways are injected here once.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub orders: OrderService,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, gateways: GatewayRegistry) -> Self {
        let config = Arc::new(config);
        let orders = OrderService::new(pool.clone(), config.clone(), Arc::new(gateways));
        Self {
            pool,
            config,
            orders,
        }
    }
}
