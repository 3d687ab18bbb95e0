use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SettlementError;

/// Settlement pipeline phase
///
/// Exactly one phase executes per scheduler invocation; the persisted value
/// is what makes the pipeline resumable across invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementPhase {
    Prepare,
    Process,
    Finalize,
    Notify,
    Completed,
}

impl SettlementPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementPhase::Prepare => "prepare",
            SettlementPhase::Process => "process",
            SettlementPhase::Finalize => "finalize",
            SettlementPhase::Notify => "notify",
            SettlementPhase::Completed => "completed",
        }
    }

    /// Valid forward transitions. Phases never skip and never go backwards;
    /// the failure path (rollback to an open poll) is handled outside the
    /// blob, by the poll's betting status.
    pub fn can_advance_to(self, next: SettlementPhase) -> bool {
        matches!(
            (self, next),
            (SettlementPhase::Prepare, SettlementPhase::Process)
                | (SettlementPhase::Process, SettlementPhase::Finalize)
                | (SettlementPhase::Finalize, SettlementPhase::Notify)
                | (SettlementPhase::Notify, SettlementPhase::Completed)
        )
    }
}

/// Durable settlement checkpoint, embedded in the poll record as JSON.
///
/// INVARIANTS: processed_winners <= total_winners, and
/// total_actual_payout <= payout_pool until remainder distribution closes
/// the gap to exactly payout_pool. Never deleted while the poll exists;
/// phase `completed` is the terminal marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementProgress {
    pub phase: SettlementPhase,
    pub total_batches: i64,
    pub current_batch: i64,
    pub total_winners: i64,
    pub processed_winners: i64,
    pub winning_option_ids: Vec<Uuid>,
    pub is_refund: bool,
    pub started_at: DateTime<Utc>,
    pub last_processed_at: DateTime<Utc>,
    pub total_bet_amount: i64,
    pub total_commission: i64,
    pub house_commission_rate: Decimal,
    pub payout_pool: i64,
    pub total_winning_stake: i64,
    pub total_actual_payout: i64,
    pub remaining_amount: i64,
}

impl SettlementProgress {
    pub fn advance(&mut self, next: SettlementPhase) -> Result<(), SettlementError> {
        if !self.phase.can_advance_to(next) {
            return Err(SettlementError::InvalidPhase {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn progress(phase: SettlementPhase) -> SettlementProgress {
        SettlementProgress {
            phase,
            total_batches: 2,
            current_batch: 0,
            total_winners: 3,
            processed_winners: 0,
            winning_option_ids: vec![Uuid::new_v4()],
            is_refund: false,
            started_at: Utc::now(),
            last_processed_at: Utc::now(),
            total_bet_amount: 3000,
            total_commission: 150,
            house_commission_rate: dec!(0.05),
            payout_pool: 2850,
            total_winning_stake: 1000,
            total_actual_payout: 0,
            remaining_amount: 2850,
        }
    }

    #[test]
    fn test_phase_advances_in_order() {
        let mut p = progress(SettlementPhase::Prepare);
        p.advance(SettlementPhase::Process).unwrap();
        p.advance(SettlementPhase::Finalize).unwrap();
        p.advance(SettlementPhase::Notify).unwrap();
        p.advance(SettlementPhase::Completed).unwrap();
        assert_eq!(p.phase, SettlementPhase::Completed);
    }

    #[test]
    fn test_phase_cannot_skip_or_reverse() {
        let mut p = progress(SettlementPhase::Prepare);
        assert!(p.advance(SettlementPhase::Finalize).is_err());
        assert!(p.advance(SettlementPhase::Completed).is_err());

        let mut p = progress(SettlementPhase::Notify);
        assert!(p.advance(SettlementPhase::Process).is_err());

        let mut p = progress(SettlementPhase::Completed);
        assert!(p.advance(SettlementPhase::Prepare).is_err());
    }

    #[test]
    fn test_checkpoint_round_trips_through_json() {
        let p = progress(SettlementPhase::Process);
        let value = serde_json::to_value(&p).unwrap();
        // persisted layout uses camelCase keys and lowercase phase names
        assert_eq!(value["phase"], "process");
        assert_eq!(value["payoutPool"], 2850);
        assert_eq!(value["totalWinningStake"], 1000);

        let decoded: SettlementProgress = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.payout_pool, p.payout_pool);
        assert_eq!(decoded.phase, SettlementPhase::Process);
    }
}
