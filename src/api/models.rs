use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::ledger::models::{PlayerAssetStatus, RewardsLogEntry};
use crate::polls::models::BettingStatus;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Settlement state of one poll, for operators and support tooling
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementStatusResponse {
    pub poll_id: Uuid,
    pub title: String,
    pub betting_status: BettingStatus,
    pub is_settled: bool,
    pub settled_at: Option<DateTime<Utc>>,
    pub settled_by: Option<String>,
    pub answer_option_ids: Vec<Uuid>,
    /// The raw settlement checkpoint, exactly as persisted
    pub settlement_progress: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerBalanceResponse {
    pub asset_id: Uuid,
    pub asset_code: String,
    pub balance: i64,
    pub status: PlayerAssetStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardsHistoryResponse {
    pub player_id: Uuid,
    pub asset_id: Uuid,
    pub balance: i64,
    pub entries: Vec<RewardsLogEntry>,
}
