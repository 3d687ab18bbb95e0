use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handler::{
    get_player_balances, get_rewards_history, get_settlement_status, health_check,
    run_settlement_tick, AppState,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Settlement endpoints
                .route("/settlement/tick", post(run_settlement_tick))
                .route("/polls/:poll_id/settlement", get(get_settlement_status))
                // Ledger endpoints
                .route("/players/:player_id/balances", get(get_player_balances))
                .route(
                    "/players/:player_id/assets/:asset_id/rewards",
                    get(get_rewards_history),
                ),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::very_permissive())
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
