use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::info;

use crate::{
    api::handler::AppState,
    config::Config,
    error::AppResult,
    ledger::repository::LedgerRepository,
    notify::{NoopSink, NotificationSink, WebhookSink},
    polls::repository::PollRepository,
    settlement::{
        engine::{SettlementConfig, SettlementEngine},
        scheduler::SettlementScheduler,
    },
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Database pool
    let pool = initialize_database(&config.database_url).await?;

    // Core repositories
    let ledger = Arc::new(LedgerRepository::new(pool.clone()));
    let polls = Arc::new(PollRepository::new(pool.clone()));

    // Notification sink - delivery is best-effort, so a missing endpoint
    // only downgrades to the noop sink
    let sink: Arc<dyn NotificationSink> = match &config.notify_webhook_url {
        Some(url) => {
            info!("✅ Webhook notification sink configured: {}", url);
            Arc::new(WebhookSink::new(url.clone()))
        }
        None => {
            info!("📭 No notification endpoint configured, notices will be dropped");
            Arc::new(NoopSink)
        }
    };

    // Settlement engine
    let settlement_config = SettlementConfig {
        batch_size: config.batch_size,
        grace_period_secs: config.grace_period_secs,
        liveness_window_secs: config.liveness_window_secs,
        tick_budget_ms: config.tick_budget_ms,
        worker_id: config.worker_id.clone(),
    };
    let engine = Arc::new(SettlementEngine::new(
        polls.clone(),
        ledger.clone(),
        sink,
        settlement_config,
    ));
    info!("✅ Settlement engine initialized (batch size {})", config.batch_size);

    // Background settlement scheduler
    let scheduler = SettlementScheduler::new(engine.clone(), config.tick_interval_secs);
    scheduler.start();
    info!(
        "✅ Settlement scheduler started (every {}s)",
        config.tick_interval_secs
    );

    Ok(AppState {
        ledger,
        polls,
        engine,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| crate::error::AppError::Internal(format!("Migration error: {:?}", e)))?;

    info!("✓ Database initialized");
    Ok(pool)
}
