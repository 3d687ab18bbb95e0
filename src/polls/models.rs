use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use uuid::Uuid;

use crate::error::{AppResult, SettlementError};
use crate::settlement::progress::SettlementProgress;

/// Poll lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "poll_status", rename_all = "lowercase")]
pub enum PollStatus {
    Active,
    Ended,
}

/// Betting lifecycle status
///
/// open -> settling is the atomic claim performed by the settlement engine;
/// settling -> settled happens only at finalization. A failed phase rolls
/// settling back to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "betting_status", rename_all = "lowercase")]
pub enum BettingStatus {
    Open,
    Settling,
    Settled,
}

/// Poll aggregate root
///
/// INVARIANT: once is_settled is true, answer_option_ids is immutable and no
/// further balance mutation may reference this poll as a payout source.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Poll {
    pub id: Uuid,
    pub title: String,
    pub asset_id: Uuid,
    pub closes_at: DateTime<Utc>,
    pub status: PollStatus,
    pub betting_status: BettingStatus,
    pub is_settled: bool,
    pub settled_at: Option<DateTime<Utc>>,
    pub settled_by: Option<String>,
    pub commission_rate: Decimal,
    pub total_commission: i64,
    pub answer_option_ids: Vec<Uuid>,
    pub settlement_progress: Option<serde_json::Value>,
    pub progress_touched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Poll {
    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        self.closes_at <= now
    }

    /// The independent already-settled guards checked before Prepare touches
    /// anything; any one of them firing means another path got here first.
    pub fn already_settled(&self) -> bool {
        self.is_settled
            || self.settled_at.is_some()
            || self.betting_status == BettingStatus::Settled
            || !self.answer_option_ids.is_empty()
    }

    /// Decode the persisted settlement checkpoint, if any
    pub fn progress(&self) -> AppResult<Option<SettlementProgress>> {
        match &self.settlement_progress {
            None => Ok(None),
            Some(value) => {
                let progress = serde_json::from_value(value.clone()).map_err(|e| {
                    SettlementError::CorruptProgress(format!("poll {}: {}", self.id, e))
                })?;
                Ok(Some(progress))
            }
        }
    }
}

/// Per-option tally - accumulated stake plus raw participation count.
/// The resolver ranks options by bet_count, not stake.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OptionTally {
    pub option_id: Uuid,
    pub label: String,
    pub total_stake: i64,
    pub bet_count: i32,
}

/// Bet record - immutable after creation, read-only input to settlement
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bet {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub option_id: Uuid,
    pub player_id: Uuid,
    pub amount: i64,
    pub placed_at: DateTime<Utc>,
}

/// Row written exactly once per completed settlement, at finalization
#[derive(Debug, Clone)]
pub struct SettlementLogEntry {
    pub poll_id: Uuid,
    pub winning_option_ids: Vec<Uuid>,
    pub is_refund: bool,
    pub total_bet_amount: i64,
    pub total_commission: i64,
    pub payout_pool: i64,
    pub total_payout: i64,
    pub total_winners: i64,
    pub house_edge: Decimal,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub distribution: serde_json::Value,
}
