use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bettor's stake was on a winning option
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinNotice {
    pub player_id: Uuid,
    pub poll_id: Uuid,
    pub poll_title: String,
    pub staked: i64,
    pub won: i64,
}

/// Bettor's stake was on a losing option
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossNotice {
    pub player_id: Uuid,
    pub poll_id: Uuid,
    pub poll_title: String,
    pub staked: i64,
    pub option_label: String,
}

/// Stake returned in full; commission is never deducted on refund
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundNotice {
    pub player_id: Uuid,
    pub poll_id: Uuid,
    pub poll_title: String,
    pub amount: i64,
    pub reason: String,
}

/// Aggregate summary sent once per settlement, to a representative winner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementCompleteNotice {
    pub player_id: Uuid,
    pub poll_id: Uuid,
    pub poll_title: String,
    pub total_winners: i64,
    pub total_payout: i64,
}

/// Envelope for the four outcome event shapes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutcomeNotice {
    Win(WinNotice),
    Loss(LossNotice),
    Refund(RefundNotice),
    SettlementComplete(SettlementCompleteNotice),
}

impl OutcomeNotice {
    pub fn player_id(&self) -> Uuid {
        match self {
            OutcomeNotice::Win(n) => n.player_id,
            OutcomeNotice::Loss(n) => n.player_id,
            OutcomeNotice::Refund(n) => n.player_id,
            OutcomeNotice::SettlementComplete(n) => n.player_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutcomeNotice::Win(_) => "win",
            OutcomeNotice::Loss(_) => "loss",
            OutcomeNotice::Refund(_) => "refund",
            OutcomeNotice::SettlementComplete(_) => "settlement_complete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_envelope_tags() {
        let notice = OutcomeNotice::Win(WinNotice {
            player_id: Uuid::new_v4(),
            poll_id: Uuid::new_v4(),
            poll_title: "Will it rain tomorrow?".to_string(),
            staked: 1000,
            won: 2850,
        });

        let value = serde_json::to_value(&notice).unwrap();
        assert_eq!(value["type"], "win");
        assert_eq!(value["won"], 2850);

        let refund = OutcomeNotice::Refund(RefundNotice {
            player_id: Uuid::new_v4(),
            poll_id: Uuid::new_v4(),
            poll_title: "Cancelled market".to_string(),
            amount: 500,
            reason: "no winning side".to_string(),
        });
        assert_eq!(serde_json::to_value(&refund).unwrap()["type"], "refund");
    }
}
