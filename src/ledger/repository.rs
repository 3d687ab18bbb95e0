use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::models::*;
use crate::error::{AppResult, LedgerError};

/// Ledger repository - the source of truth for player balances
///
/// Every mutation goes through `apply_transaction`, which validates, upserts
/// the balance row and appends the audit entry inside one transaction scope.
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin_tx(&self) -> AppResult<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    // ========== BALANCE MUTATION ==========

    /// Apply a validated balance mutation.
    ///
    /// Runs inside the caller-supplied transaction scope when one is given
    /// (the settlement engine composes a whole payout batch this way), else
    /// opens and commits its own. Failures never leave a partial write: the
    /// audit row and the balance update share the same transaction.
    pub async fn apply_transaction(
        &self,
        scope: Option<&mut Transaction<'_, Postgres>>,
        mutation: &AssetMutation,
    ) -> AppResult<AppliedMutation> {
        match scope {
            Some(tx) => self.apply_in_tx(tx, mutation).await,
            None => {
                let mut tx = self.pool.begin().await?;
                let applied = self.apply_in_tx(&mut tx, mutation).await?;
                tx.commit().await?;
                Ok(applied)
            }
        }
    }

    async fn apply_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        mutation: &AssetMutation,
    ) -> AppResult<AppliedMutation> {
        if mutation.amount < 0 {
            return Err(LedgerError::AmountOutOfRange(mutation.amount).into());
        }

        // Target asset must exist and be active
        let asset_status: Option<AssetStatus> =
            sqlx::query_scalar("SELECT status FROM assets WHERE id = $1")
                .bind(mutation.asset_id)
                .fetch_optional(&mut **tx)
                .await?;

        match asset_status {
            None => return Err(LedgerError::AssetNotFound(mutation.asset_id).into()),
            Some(AssetStatus::Inactive) => {
                return Err(LedgerError::AssetInactive(mutation.asset_id).into())
            }
            Some(AssetStatus::Active) => {}
        }

        // Create the balance row at zero if absent, then lock it
        sqlx::query(
            r#"
            INSERT INTO player_assets (player_id, asset_id, balance)
            VALUES ($1, $2, 0)
            ON CONFLICT (player_id, asset_id) DO NOTHING
            "#,
        )
        .bind(mutation.player_id)
        .bind(mutation.asset_id)
        .execute(&mut **tx)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT balance, status FROM player_assets
            WHERE player_id = $1 AND asset_id = $2
            FOR UPDATE
            "#,
        )
        .bind(mutation.player_id)
        .bind(mutation.asset_id)
        .fetch_one(&mut **tx)
        .await?;

        let balance_before: i64 = row.try_get("balance")?;
        let status: PlayerAssetStatus = row.try_get("status")?;

        if !status.is_usable() {
            return Err(LedgerError::AccountNotUsable(status).into());
        }

        let balance_after = apply_op(balance_before, mutation.op, mutation.amount)?;

        sqlx::query(
            r#"
            UPDATE player_assets
            SET balance = $3, updated_at = NOW()
            WHERE player_id = $1 AND asset_id = $2
            "#,
        )
        .bind(mutation.player_id)
        .bind(mutation.asset_id)
        .bind(balance_after)
        .execute(&mut **tx)
        .await?;

        // Audit trail covers Add/Subtract only; Set is an administrative assignment
        if matches!(mutation.op, AssetOp::Add | AssetOp::Subtract) {
            sqlx::query(
                r#"
                INSERT INTO rewards_log (
                    player_id, asset_id, delta, balance_before, balance_after,
                    reason, poll_id, bet_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(mutation.player_id)
            .bind(mutation.asset_id)
            .bind(balance_after - balance_before)
            .bind(balance_before)
            .bind(balance_after)
            .bind(&mutation.reason)
            .bind(mutation.poll_id)
            .bind(mutation.bet_id)
            .execute(&mut **tx)
            .await?;
        }

        Ok(AppliedMutation {
            balance_before,
            balance_after,
        })
    }

    // ========== QUERY SURFACE ==========

    pub async fn get_player_asset(
        &self,
        player_id: Uuid,
        asset_id: Uuid,
    ) -> AppResult<Option<PlayerAsset>> {
        let row = sqlx::query_as::<_, PlayerAsset>(
            r#"
            SELECT player_id, asset_id, balance, status, updated_at
            FROM player_assets
            WHERE player_id = $1 AND asset_id = $2
            "#,
        )
        .bind(player_id)
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// All balances held by a player, joined with the asset code
    pub async fn list_player_balances(
        &self,
        player_id: Uuid,
    ) -> AppResult<Vec<(String, PlayerAsset)>> {
        let rows = sqlx::query(
            r#"
            SELECT a.code, pa.player_id, pa.asset_id, pa.balance, pa.status, pa.updated_at
            FROM player_assets pa
            INNER JOIN assets a ON a.id = pa.asset_id
            WHERE pa.player_id = $1
            ORDER BY a.code
            "#,
        )
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;

        let mut balances = Vec::with_capacity(rows.len());
        for row in rows {
            let code: String = row.try_get("code")?;
            balances.push((
                code,
                PlayerAsset {
                    player_id: row.try_get("player_id")?,
                    asset_id: row.try_get("asset_id")?,
                    balance: row.try_get("balance")?,
                    status: row.try_get("status")?,
                    updated_at: row.try_get("updated_at")?,
                },
            ));
        }

        Ok(balances)
    }

    /// Most recent audit entries for a player+asset, newest first.
    /// The full chain, replayed oldest-first, reconstructs the balance exactly.
    pub async fn get_rewards_history(
        &self,
        player_id: Uuid,
        asset_id: Uuid,
        limit: i64,
    ) -> AppResult<Vec<RewardsLogEntry>> {
        let rows = sqlx::query_as::<_, RewardsLogEntry>(
            r#"
            SELECT id, player_id, asset_id, delta, balance_before, balance_after,
                   reason, poll_id, bet_id, created_at
            FROM rewards_log
            WHERE player_id = $1 AND asset_id = $2
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(player_id)
        .bind(asset_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
