use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use super::models::*;
use crate::error::{AppResult, SettlementError};
use crate::settlement::progress::SettlementProgress;

const POLL_COLUMNS: &str = r#"
    id, title, asset_id, closes_at, status, betting_status, is_settled,
    settled_at, settled_by, commission_rate, total_commission,
    answer_option_ids, settlement_progress, progress_touched_at,
    created_at, updated_at
"#;

/// Poll repository - owns every read and conditional write the settlement
/// state machine performs against the poll aggregate.
pub struct PollRepository {
    pub pool: PgPool,
}

impl PollRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_poll(&self, poll_id: Uuid) -> AppResult<Option<Poll>> {
        let poll = sqlx::query_as::<_, Poll>(&format!(
            "SELECT {POLL_COLUMNS} FROM polls WHERE id = $1"
        ))
        .bind(poll_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(poll)
    }

    // ========== SELECTION / CLAIMING ==========

    /// Atomically claim the next eligible poll for a fresh settlement.
    ///
    /// Single conditional update: only the invocation whose update affects a
    /// row owns the poll for Phase 1. Zero rows means no new work, which is
    /// not an error.
    pub async fn claim_next_eligible(
        &self,
        grace_period: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Poll>> {
        let cutoff = now - grace_period;

        let poll = sqlx::query_as::<_, Poll>(&format!(
            r#"
            UPDATE polls
            SET betting_status = $1, updated_at = NOW()
            WHERE id = (
                SELECT id FROM polls
                WHERE betting_status = $2 AND is_settled = FALSE AND closes_at <= $3
                ORDER BY closes_at ASC
                LIMIT 1
            )
            AND betting_status = $2
            RETURNING {POLL_COLUMNS}
            "#
        ))
        .bind(BettingStatus::Settling)
        .bind(BettingStatus::Open)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        Ok(poll)
    }

    /// Oldest-touched settlement still mid-flight. Finalization flips the
    /// betting status to settled before the notify phase runs, so both
    /// statuses are resumable; the blob's phase decides what happens next.
    /// A settlement stalled past the liveness window comes back through here
    /// too - resuming from the persisted phase is always safe.
    pub async fn find_resumable(&self) -> AppResult<Option<Poll>> {
        let poll = sqlx::query_as::<_, Poll>(&format!(
            r#"
            SELECT {POLL_COLUMNS} FROM polls
            WHERE settlement_progress IS NOT NULL
              AND settlement_progress->>'phase' <> 'completed'
              AND betting_status IN ($1, $2)
            ORDER BY progress_touched_at ASC NULLS FIRST
            LIMIT 1
            "#
        ))
        .bind(BettingStatus::Settling)
        .bind(BettingStatus::Settled)
        .fetch_optional(&self.pool)
        .await?;

        Ok(poll)
    }

    /// Compare-and-set continuation ownership for one tick. Zero rows means
    /// an overlapping invocation got there first.
    pub async fn touch_progress(
        &self,
        poll_id: Uuid,
        observed: Option<DateTime<Utc>>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE polls
            SET progress_touched_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND progress_touched_at IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(poll_id)
        .bind(observed)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// A poll claimed for settlement whose Phase 1 never wrote its first
    /// progress checkpoint (the claiming invocation died). Past the liveness
    /// window it is safe to re-run Prepare from scratch.
    pub async fn find_stale_claim(
        &self,
        liveness_window: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Poll>> {
        let cutoff = now - liveness_window;

        let poll = sqlx::query_as::<_, Poll>(&format!(
            r#"
            SELECT {POLL_COLUMNS} FROM polls
            WHERE betting_status = $1 AND settlement_progress IS NULL AND updated_at <= $2
            ORDER BY updated_at ASC
            LIMIT 1
            "#
        ))
        .bind(BettingStatus::Settling)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        Ok(poll)
    }

    // ========== STATE MACHINE WRITES ==========

    /// Re-read the settlement checkpoint under a row lock.
    ///
    /// The selection CAS only fences a point in time; an overlapping
    /// invocation can still race into the same batch with a stale cursor.
    /// The cursor that counts is the one read here: the second invocation
    /// blocks on the poll row until the first batch transaction commits,
    /// then sees the advanced cursor.
    pub async fn lock_progress(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        poll_id: Uuid,
    ) -> AppResult<SettlementProgress> {
        let value = sqlx::query_scalar::<_, Option<serde_json::Value>>(
            "SELECT settlement_progress FROM polls WHERE id = $1 FOR UPDATE",
        )
        .bind(poll_id)
        .fetch_optional(&mut **tx)
        .await?
        .flatten()
        .ok_or(SettlementError::MissingProgress(poll_id))?;

        serde_json::from_value(value)
            .map_err(|e| SettlementError::CorruptProgress(format!("poll {}: {}", poll_id, e)).into())
    }

    /// Persist the settlement checkpoint. Inside a caller-supplied scope this
    /// commits atomically with the batch it describes.
    pub async fn save_progress(
        &self,
        scope: Option<&mut Transaction<'_, Postgres>>,
        poll_id: Uuid,
        progress: &SettlementProgress,
    ) -> AppResult<()> {
        let value = serde_json::to_value(progress)?;
        let query = sqlx::query(
            r#"
            UPDATE polls
            SET settlement_progress = $2, progress_touched_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(poll_id)
        .bind(value);

        match scope {
            Some(tx) => {
                query.execute(&mut **tx).await?;
            }
            None => {
                query.execute(&self.pool).await?;
            }
        }

        Ok(())
    }

    /// Roll a failed settlement back to open so a later tick retries the
    /// phase from a clean state. The progress blob is kept on purpose: the
    /// batch cursor in it is what makes the replay safe.
    pub async fn rollback_to_open(&self, poll_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE polls
            SET betting_status = $2, updated_at = NOW()
            WHERE id = $1 AND betting_status = $3 AND is_settled = FALSE
            "#,
        )
        .bind(poll_id)
        .bind(BettingStatus::Open)
        .bind(BettingStatus::Settling)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// The Phase 3 point-of-no-return write. Guarded on is_settled so a
    /// racing finalization surfaces as AlreadySettled instead of clobbering.
    pub async fn mark_settled(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        poll_id: Uuid,
        winning_option_ids: &[Uuid],
        settled_by: &str,
        settled_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE polls
            SET status = $2, betting_status = $3, is_settled = TRUE,
                settled_at = $4, settled_by = $5, answer_option_ids = $6,
                updated_at = NOW()
            WHERE id = $1 AND is_settled = FALSE
            "#,
        )
        .bind(poll_id)
        .bind(PollStatus::Ended)
        .bind(BettingStatus::Settled)
        .bind(settled_at)
        .bind(settled_by)
        .bind(winning_option_ids.to_vec())
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SettlementError::AlreadySettled(poll_id).into());
        }

        Ok(())
    }

    /// Repair path: a poll found settled mid-claim gets its betting status
    /// aligned so selection stops picking it up.
    pub async fn mark_betting_settled(&self, poll_id: Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE polls
            SET betting_status = $2, updated_at = NOW()
            WHERE id = $1 AND is_settled = TRUE
            "#,
        )
        .bind(poll_id)
        .bind(BettingStatus::Settled)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_settlement_log(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &SettlementLogEntry,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settlement_log (
                poll_id, winning_option_ids, is_refund, total_bet_amount,
                total_commission, payout_pool, total_payout, total_winners,
                house_edge, started_at, finished_at, distribution
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(entry.poll_id)
        .bind(entry.winning_option_ids.clone())
        .bind(entry.is_refund)
        .bind(entry.total_bet_amount)
        .bind(entry.total_commission)
        .bind(entry.payout_pool)
        .bind(entry.total_payout)
        .bind(entry.total_winners)
        .bind(entry.house_edge)
        .bind(entry.started_at)
        .bind(entry.finished_at)
        .bind(entry.distribution.clone())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    // ========== BET / TALLY READERS ==========

    pub async fn load_tallies(&self, poll_id: Uuid) -> AppResult<Vec<OptionTally>> {
        let tallies = sqlx::query_as::<_, OptionTally>(
            r#"
            SELECT id AS option_id, label, total_stake, bet_count
            FROM poll_options
            WHERE poll_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tallies)
    }

    pub async fn option_labels(&self, poll_id: Uuid) -> AppResult<HashMap<Uuid, String>> {
        let rows = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, label FROM poll_options WHERE poll_id = $1",
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    pub async fn count_bets(&self, poll_id: Uuid) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bets WHERE poll_id = $1")
            .bind(poll_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    pub async fn count_winning_bets(
        &self,
        poll_id: Uuid,
        winning_option_ids: &[Uuid],
    ) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bets WHERE poll_id = $1 AND option_id = ANY($2)",
        )
        .bind(poll_id)
        .bind(winning_option_ids.to_vec())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    pub async fn sum_winning_stakes(
        &self,
        poll_id: Uuid,
        winning_option_ids: &[Uuid],
    ) -> AppResult<i64> {
        let sum: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT
            FROM bets
            WHERE poll_id = $1 AND option_id = ANY($2)
            "#,
        )
        .bind(poll_id)
        .bind(winning_option_ids.to_vec())
        .fetch_one(&self.pool)
        .await?;

        Ok(sum)
    }

    /// One batch of settlement targets at the cursor. Ordering must be stable
    /// across invocations: bets are immutable, so (placed_at, id) never moves.
    pub async fn fetch_bet_batch(
        &self,
        poll_id: Uuid,
        winning_option_ids: Option<&[Uuid]>,
        offset: i64,
        limit: i64,
    ) -> AppResult<Vec<Bet>> {
        let bets = match winning_option_ids {
            Some(ids) => {
                sqlx::query_as::<_, Bet>(
                    r#"
                    SELECT id, poll_id, option_id, player_id, amount, placed_at
                    FROM bets
                    WHERE poll_id = $1 AND option_id = ANY($2)
                    ORDER BY placed_at ASC, id ASC
                    LIMIT $3 OFFSET $4
                    "#,
                )
                .bind(poll_id)
                .bind(ids.to_vec())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Bet>(
                    r#"
                    SELECT id, poll_id, option_id, player_id, amount, placed_at
                    FROM bets
                    WHERE poll_id = $1
                    ORDER BY placed_at ASC, id ASC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(poll_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(bets)
    }

    pub async fn fetch_all_bets(&self, poll_id: Uuid) -> AppResult<Vec<Bet>> {
        let bets = sqlx::query_as::<_, Bet>(
            r#"
            SELECT id, poll_id, option_id, player_id, amount, placed_at
            FROM bets
            WHERE poll_id = $1
            ORDER BY placed_at ASC, id ASC
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(bets)
    }

    /// The remainder recipient: largest stake on the winning side, earliest
    /// placement breaking a stake tie (deterministic across replays).
    pub async fn largest_winning_bet(
        &self,
        poll_id: Uuid,
        winning_option_ids: &[Uuid],
    ) -> AppResult<Option<Bet>> {
        let bet = sqlx::query_as::<_, Bet>(
            r#"
            SELECT id, poll_id, option_id, player_id, amount, placed_at
            FROM bets
            WHERE poll_id = $1 AND option_id = ANY($2)
            ORDER BY amount DESC, placed_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(poll_id)
        .bind(winning_option_ids.to_vec())
        .fetch_optional(&self.pool)
        .await?;

        Ok(bet)
    }
}
