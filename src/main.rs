use std::time::Duration;

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use boxoffice_server::config::Config;
use boxoffice_server::gateway::GatewayRegistry;
use boxoffice_server::routes::create_routes;
use boxoffice_server::services::order::OrderService;
use boxoffice_server::state::AppState;

/// Frees expired carts and cancels expired orders on a fixed interval.
fn spawn_expiry_sweep(orders: OrderService, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = orders.clear_expired_carts().await {
                tracing::error!(error = %e, "Cart expiry sweep failed");
            }
            if let Err(e) = orders.clear_expired_orders().await {
                tracing::error!(error = %e, "Order expiry sweep failed");
            }
        }
    });
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("boxoffice_server=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Successfully connected to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations run successfully");

    let gateways = GatewayRegistry::from_config(&config);
    tracing::info!(active_gateway = gateways.active_name(), "Payment gateways ready");

    let sweep_every = Duration::from_secs(config.sweep_interval_secs.max(1));
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(pool, config, gateways);
    spawn_expiry_sweep(state.orders.clone(), sweep_every);

    let app: Router = create_routes(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind address");
    tracing::info!("Server running at http://{}", bind_addr);

    axum::serve(listener, app).await.expect("Server failed");
}
