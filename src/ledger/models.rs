use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use uuid::Uuid;

use crate::error::LedgerError;

/// Asset lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "asset_status", rename_all = "lowercase")]
pub enum AssetStatus {
    Active,
    Inactive,
}

/// Player asset row status - rows are never hard-deleted, they transition here instead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "player_asset_status", rename_all = "lowercase")]
pub enum PlayerAssetStatus {
    Active,
    Inactive,
    Frozen,
    Deleted,
}

impl PlayerAssetStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, PlayerAssetStatus::Active)
    }
}

/// Balance mutation operation
///
/// Closed set: the ledger dispatches on this with an exhaustive match, so a
/// new operation cannot be added without updating the arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetOp {
    Add,
    Subtract,
    Set,
}

/// Balance row - one per (player, asset) pair, created lazily at zero
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlayerAsset {
    pub player_id: Uuid,
    pub asset_id: Uuid,
    pub balance: i64,
    pub status: PlayerAssetStatus,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit row, one per Add/Subtract mutation
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RewardsLogEntry {
    pub id: Uuid,
    pub player_id: Uuid,
    pub asset_id: Uuid,
    pub delta: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reason: String,
    pub poll_id: Option<Uuid>,
    pub bet_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A requested balance mutation
#[derive(Debug, Clone)]
pub struct AssetMutation {
    pub player_id: Uuid,
    pub asset_id: Uuid,
    pub amount: i64,
    pub op: AssetOp,
    pub reason: String,
    pub poll_id: Option<Uuid>,
    pub bet_id: Option<Uuid>,
}

/// Outcome of a successful mutation
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AppliedMutation {
    pub balance_before: i64,
    pub balance_after: i64,
}

/// Pure balance arithmetic for a single mutation.
///
/// Invariants enforced here: amounts are non-negative, Add never wraps,
/// Subtract never takes a balance below zero.
pub fn apply_op(balance: i64, op: AssetOp, amount: i64) -> Result<i64, LedgerError> {
    if amount < 0 {
        return Err(LedgerError::AmountOutOfRange(amount));
    }

    match op {
        AssetOp::Add => balance.checked_add(amount).ok_or(LedgerError::Overflow),
        AssetOp::Subtract => {
            if amount > balance {
                Err(LedgerError::InsufficientBalance {
                    required: amount,
                    available: balance,
                })
            } else {
                Ok(balance - amount)
            }
        }
        AssetOp::Set => Ok(amount),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_subtract() {
        assert_eq!(apply_op(100, AssetOp::Add, 50).unwrap(), 150);
        assert_eq!(apply_op(100, AssetOp::Subtract, 100).unwrap(), 0);
        assert_eq!(apply_op(0, AssetOp::Add, 0).unwrap(), 0);
    }

    #[test]
    fn test_set_assigns_directly() {
        assert_eq!(apply_op(9999, AssetOp::Set, 42).unwrap(), 42);
        assert_eq!(apply_op(0, AssetOp::Set, 0).unwrap(), 0);
    }

    #[test]
    fn test_subtract_below_zero_fails() {
        let err = apply_op(99, AssetOp::Subtract, 100).unwrap_err();
        match err {
            LedgerError::InsufficientBalance { required, available } => {
                assert_eq!(required, 100);
                assert_eq!(available, 99);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_add_overflow_detected() {
        let err = apply_op(i64::MAX, AssetOp::Add, 1).unwrap_err();
        assert!(matches!(err, LedgerError::Overflow));
        // boundary case still succeeds
        assert_eq!(apply_op(i64::MAX - 1, AssetOp::Add, 1).unwrap(), i64::MAX);
    }

    #[test]
    fn test_negative_amount_rejected_for_all_ops() {
        for op in [AssetOp::Add, AssetOp::Subtract, AssetOp::Set] {
            assert!(matches!(
                apply_op(10, op, -1),
                Err(LedgerError::AmountOutOfRange(-1))
            ));
        }
    }
}
