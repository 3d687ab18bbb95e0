use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::models::*;
use crate::{
    error::{AppError, AppResult},
    ledger::repository::LedgerRepository,
    polls::repository::PollRepository,
    settlement::engine::{SettlementEngine, TickOutcome},
};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerRepository>,
    pub polls: Arc<PollRepository>,
    pub engine: Arc<SettlementEngine>,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Manually run one settlement step - the same idempotent entry point the
/// scheduler ticks. Useful for operators draining a backlog.
/// POST /api/v1/settlement/tick
pub async fn run_settlement_tick(State(state): State<AppState>) -> Json<TickOutcome> {
    info!("🔧 manual settlement tick requested");
    Json(state.engine.process_next_step().await)
}

/// GET /api/v1/polls/:poll_id/settlement
pub async fn get_settlement_status(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
) -> AppResult<Json<SettlementStatusResponse>> {
    let poll = state
        .polls
        .get_poll(poll_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Poll not found: {}", poll_id)))?;

    Ok(Json(SettlementStatusResponse {
        poll_id: poll.id,
        title: poll.title,
        betting_status: poll.betting_status,
        is_settled: poll.is_settled,
        settled_at: poll.settled_at,
        settled_by: poll.settled_by,
        answer_option_ids: poll.answer_option_ids,
        settlement_progress: poll.settlement_progress,
    }))
}

/// GET /api/v1/players/:player_id/balances
pub async fn get_player_balances(
    State(state): State<AppState>,
    Path(player_id): Path<Uuid>,
) -> AppResult<Json<Vec<PlayerBalanceResponse>>> {
    let balances = state.ledger.list_player_balances(player_id).await?;

    Ok(Json(
        balances
            .into_iter()
            .map(|(code, row)| PlayerBalanceResponse {
                asset_id: row.asset_id,
                asset_code: code,
                balance: row.balance,
                status: row.status,
            })
            .collect(),
    ))
}

/// Audit trail for one player+asset, newest entries first
/// GET /api/v1/players/:player_id/assets/:asset_id/rewards
pub async fn get_rewards_history(
    State(state): State<AppState>,
    Path((player_id, asset_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<RewardsHistoryResponse>> {
    let holding = state
        .ledger
        .get_player_asset(player_id, asset_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "No balance for player {} and asset {}",
                player_id, asset_id
            ))
        })?;

    let entries = state
        .ledger
        .get_rewards_history(player_id, asset_id, 100)
        .await?;

    Ok(Json(RewardsHistoryResponse {
        player_id,
        asset_id,
        balance: holding.balance,
        entries,
    }))
}
