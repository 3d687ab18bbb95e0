use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::progress::{SettlementPhase, SettlementProgress};
use super::resolver::{resolve, Resolution};
use crate::error::{AppError, AppResult, SettlementError};
use crate::ledger::models::{AssetMutation, AssetOp};
use crate::ledger::repository::LedgerRepository;
use crate::notify::{
    LossNotice, NotificationSink, OutcomeNotice, RefundNotice, SettlementCompleteNotice, WinNotice,
};
use crate::polls::models::{Bet, Poll, SettlementLogEntry};
use crate::polls::repository::PollRepository;

/// Settlement engine configuration
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Winners/bettors credited per Phase 2 invocation
    pub batch_size: i64,
    /// How long a poll must be closed before it becomes claimable
    pub grace_period_secs: i64,
    /// Age after which an in-progress settlement counts as abandoned
    pub liveness_window_secs: i64,
    /// Soft wall-clock budget per invocation
    pub tick_budget_ms: u64,
    /// Recorded as settled_by on finalized polls
    pub worker_id: String,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            grace_period_secs: 60,
            liveness_window_secs: 300,
            tick_budget_ms: 5_000,
            worker_id: "settlement-worker-1".to_string(),
        }
    }
}

/// Result of one "process next settlement step" invocation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<SettlementPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_phase: Option<SettlementPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed: bool,
    pub execution_time_ms: u64,
    /// true means "no eligible work was found" - a no-op tick, not an error
    pub silent: bool,
}

impl TickOutcome {
    fn no_work(started: Instant) -> Self {
        Self {
            success: true,
            phase: None,
            next_phase: None,
            message: None,
            error: None,
            completed: false,
            execution_time_ms: started.elapsed().as_millis() as u64,
            silent: true,
        }
    }

    fn step(report: StepReport, started: Instant) -> Self {
        Self {
            success: true,
            phase: Some(report.phase),
            next_phase: report.next,
            message: Some(report.message),
            error: None,
            completed: report.completed,
            execution_time_ms: started.elapsed().as_millis() as u64,
            silent: false,
        }
    }

    fn failure(phase: Option<SettlementPhase>, error: &AppError, started: Instant) -> Self {
        Self {
            success: false,
            phase,
            next_phase: None,
            message: None,
            error: Some(error.to_string()),
            completed: false,
            execution_time_ms: started.elapsed().as_millis() as u64,
            silent: false,
        }
    }
}

/// Internal per-phase result
struct StepReport {
    phase: SettlementPhase,
    next: Option<SettlementPhase>,
    message: String,
    completed: bool,
}

/// The 4-phase settlement state machine.
///
/// Re-entered on every scheduler tick; executes exactly one phase for at most
/// one poll, persists the transition, and returns. Repeated ticks drain all
/// phases to completion. All durable state lives in the poll record - there
/// is no in-memory settlement process to lose.
pub struct SettlementEngine {
    polls: Arc<PollRepository>,
    ledger: Arc<LedgerRepository>,
    sink: Arc<dyn NotificationSink>,
    config: SettlementConfig,
}

impl SettlementEngine {
    pub fn new(
        polls: Arc<PollRepository>,
        ledger: Arc<LedgerRepository>,
        sink: Arc<dyn NotificationSink>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            polls,
            ledger,
            sink,
            config,
        }
    }

    /// The single idempotent entry point invoked on every scheduler tick.
    pub async fn process_next_step(&self) -> TickOutcome {
        let started = Instant::now();
        let now = Utc::now();

        let selected = match self.select_poll(now).await {
            Ok(selected) => selected,
            Err(e) => {
                error!("❌ settlement selection failed: {}", e);
                return TickOutcome::failure(None, &e, started);
            }
        };

        let Some((poll, progress)) = selected else {
            return TickOutcome::no_work(started);
        };

        // Soft budget check between selection and phase execution
        if let Some(outcome) = self.budget_exceeded(None, started) {
            warn!("⏱️ tick budget exhausted before phase ran for poll {}", poll.id);
            return outcome;
        }

        let phase = progress
            .as_ref()
            .map(|p| p.phase)
            .unwrap_or(SettlementPhase::Prepare);

        let result = match phase {
            SettlementPhase::Prepare => self.run_prepare(&poll, now).await,
            // Process re-reads its checkpoint under a row lock; the selection
            // snapshot is only used to route here
            SettlementPhase::Process => self.run_process(&poll, now).await,
            SettlementPhase::Finalize => match progress {
                Some(p) => self.run_finalize(&poll, p, now).await,
                None => Err(SettlementError::MissingProgress(poll.id).into()),
            },
            SettlementPhase::Notify => match progress {
                Some(p) => self.run_notify(&poll, p, now).await,
                None => Err(SettlementError::MissingProgress(poll.id).into()),
            },
            SettlementPhase::Completed => Err(SettlementError::AlreadySettled(poll.id).into()),
        };

        match result {
            Ok(report) => {
                if let Some(outcome) = self.budget_exceeded(Some(&report), started) {
                    warn!(
                        "⏱️ tick budget exceeded after {} phase for poll {}",
                        report.phase.as_str(),
                        poll.id
                    );
                    return outcome;
                }
                info!(
                    "✓ poll {} {} phase done: {}",
                    poll.id,
                    report.phase.as_str(),
                    report.message
                );
                TickOutcome::step(report, started)
            }
            Err(e) => {
                self.handle_phase_failure(&poll, phase, &e).await;
                TickOutcome::failure(Some(phase), &e, started)
            }
        }
    }

    /// Pick at most one poll: an in-flight settlement first, then a claim
    /// that died before its first checkpoint, then a freshly eligible poll.
    async fn select_poll(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Option<(Poll, Option<SettlementProgress>)>> {
        if let Some(poll) = self.polls.find_resumable().await? {
            // Compare-and-set on the touch timestamp: at most one overlapping
            // invocation continues this settlement per tick.
            if !self
                .polls
                .touch_progress(poll.id, poll.progress_touched_at)
                .await?
            {
                return Ok(None);
            }
            let progress = poll
                .progress()?
                .ok_or(SettlementError::MissingProgress(poll.id))?;
            return Ok(Some((poll, Some(progress))));
        }

        if let Some(poll) = self
            .polls
            .find_stale_claim(self.liveness_window(), now)
            .await?
        {
            warn!(
                "⚠️ reclaiming poll {} - claimed but never checkpointed, re-running prepare",
                poll.id
            );
            return Ok(Some((poll, None)));
        }

        if let Some(poll) = self.polls.claim_next_eligible(self.grace_period(), now).await? {
            info!("🎯 claimed poll {} ('{}') for settlement", poll.id, poll.title);
            return Ok(Some((poll, None)));
        }

        Ok(None)
    }

    // ========== PHASE 1: PREPARE ==========

    async fn run_prepare(&self, poll: &Poll, now: DateTime<Utc>) -> AppResult<StepReport> {
        if poll.already_settled() {
            return Err(SettlementError::AlreadySettled(poll.id).into());
        }
        if !poll.is_closed(now) {
            return Err(SettlementError::NotYetClosed(poll.id).into());
        }

        let tallies = self.polls.load_tallies(poll.id).await?;
        let total_bet_amount: i64 = tallies.iter().map(|t| t.total_stake).sum();

        let (is_refund, winning_option_ids, payout_pool, total_winning_stake, total_targets) =
            match resolve(&tallies) {
                Resolution::Refund => {
                    let targets = self.polls.count_bets(poll.id).await?;
                    (true, Vec::new(), total_bet_amount, 0, targets)
                }
                Resolution::Winners(ids) => {
                    let winning_stake = self.polls.sum_winning_stakes(poll.id, &ids).await?;
                    if winning_stake == 0 {
                        // winning side holds no stake; treat as a refund
                        let targets = self.polls.count_bets(poll.id).await?;
                        (true, Vec::new(), total_bet_amount, 0, targets)
                    } else {
                        let pool = (total_bet_amount - poll.total_commission).max(0);
                        let targets = self.polls.count_winning_bets(poll.id, &ids).await?;
                        (false, ids, pool, winning_stake, targets)
                    }
                }
            };

        // A prior checkpoint survives rollback-to-open on purpose: carrying
        // the cursor forward is what makes replaying Prepare safe after a
        // mid-Process failure.
        let prior = poll.progress()?;
        let carried_batch = prior.as_ref().map(|p| p.current_batch).unwrap_or(0);
        let carried_processed = prior.as_ref().map(|p| p.processed_winners).unwrap_or(0);
        let carried_payout = prior.as_ref().map(|p| p.total_actual_payout).unwrap_or(0);
        let started_at = prior.as_ref().map(|p| p.started_at).unwrap_or(now);

        let progress = SettlementProgress {
            phase: SettlementPhase::Process,
            total_batches: ceil_div(total_targets, self.config.batch_size),
            current_batch: carried_batch,
            total_winners: total_targets,
            processed_winners: carried_processed,
            winning_option_ids,
            is_refund,
            started_at,
            last_processed_at: now,
            total_bet_amount,
            total_commission: if is_refund { 0 } else { poll.total_commission },
            house_commission_rate: poll.commission_rate,
            payout_pool,
            total_winning_stake,
            total_actual_payout: carried_payout,
            remaining_amount: payout_pool - carried_payout,
        };

        self.polls.save_progress(None, poll.id, &progress).await?;

        Ok(StepReport {
            phase: SettlementPhase::Prepare,
            next: Some(SettlementPhase::Process),
            message: format!(
                "{} targets over {} batches, pool {} units{}",
                progress.total_winners,
                progress.total_batches,
                progress.payout_pool,
                if is_refund { " (refund)" } else { "" }
            ),
            completed: false,
        })
    }

    // ========== PHASE 2: PROCESS ==========

    async fn run_process(&self, poll: &Poll, now: DateTime<Utc>) -> AppResult<StepReport> {
        // Overlapping invocations serialize on the poll row for the whole
        // batch: the cursor read under the lock is authoritative, and the
        // credits plus the cursor advance commit atomically. A replayed or
        // concurrent tick either sees the whole batch applied (cursor moved
        // past it) or none of it - never a second credit of the same batch.
        let mut tx = self.ledger.begin_tx().await?;
        let mut progress = self.polls.lock_progress(&mut tx, poll.id).await?;

        if progress.phase != SettlementPhase::Process {
            // a concurrent invocation finished this phase while we waited
            // for the lock; nothing was written on this side
            return Ok(StepReport {
                phase: SettlementPhase::Process,
                next: Some(progress.phase),
                message: "batch already applied by a concurrent invocation".to_string(),
                completed: false,
            });
        }

        let winners_filter = if progress.is_refund {
            None
        } else {
            Some(progress.winning_option_ids.as_slice())
        };

        let offset = progress.current_batch * self.config.batch_size;
        let batch = self
            .polls
            .fetch_bet_batch(poll.id, winners_filter, offset, self.config.batch_size)
            .await?;

        if batch.is_empty() {
            return self.close_process_phase(poll, progress, now, tx).await;
        }

        let mut batch_total: i64 = 0;

        for bet in &batch {
            let amount = if progress.is_refund {
                bet.amount
            } else {
                proportional_payout(progress.payout_pool, bet.amount, progress.total_winning_stake)
            };
            let reason = if progress.is_refund {
                format!("Refund for poll '{}'", poll.title)
            } else {
                format!("Payout for poll '{}'", poll.title)
            };

            self.ledger
                .apply_transaction(
                    Some(&mut tx),
                    &AssetMutation {
                        player_id: bet.player_id,
                        asset_id: poll.asset_id,
                        amount,
                        op: AssetOp::Add,
                        reason,
                        poll_id: Some(poll.id),
                        bet_id: Some(bet.id),
                    },
                )
                .await?;

            batch_total += amount;
        }

        progress.current_batch += 1;
        progress.processed_winners += batch.len() as i64;
        progress.total_actual_payout += batch_total;
        progress.remaining_amount = progress.payout_pool - progress.total_actual_payout;
        progress.last_processed_at = now;
        self.polls.save_progress(Some(&mut tx), poll.id, &progress).await?;
        tx.commit().await?;

        info!(
            "💸 poll {} batch {}/{}: {} credits, {} units",
            poll.id,
            progress.current_batch,
            progress.total_batches,
            batch.len(),
            batch_total
        );

        Ok(StepReport {
            phase: SettlementPhase::Process,
            next: Some(SettlementPhase::Process),
            message: format!(
                "batch {}/{} applied ({}/{} targets)",
                progress.current_batch,
                progress.total_batches,
                progress.processed_winners,
                progress.total_winners
            ),
            completed: false,
        })
    }

    /// All targets are processed; close any floor-division gap and hand over
    /// to finalization. Runs inside the caller's locked batch transaction so
    /// the remainder can never be credited twice.
    async fn close_process_phase(
        &self,
        poll: &Poll,
        mut progress: SettlementProgress,
        now: DateTime<Utc>,
        mut tx: sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> AppResult<StepReport> {
        let remaining = progress.payout_pool - progress.total_actual_payout;

        if !progress.is_refund && remaining > 0 {
            let top = self
                .polls
                .largest_winning_bet(poll.id, &progress.winning_option_ids)
                .await?
                .ok_or_else(|| {
                    AppError::Internal(format!("no winning bet found for remainder on poll {}", poll.id))
                })?;

            self.ledger
                .apply_transaction(
                    Some(&mut tx),
                    &AssetMutation {
                        player_id: top.player_id,
                        asset_id: poll.asset_id,
                        amount: remaining,
                        op: AssetOp::Add,
                        reason: format!("Payout remainder for poll '{}'", poll.title),
                        poll_id: Some(poll.id),
                        bet_id: Some(top.id),
                    },
                )
                .await?;

            progress.total_actual_payout += remaining;
            progress.remaining_amount = 0;
            progress.advance(SettlementPhase::Finalize)?;
            progress.last_processed_at = now;
            self.polls.save_progress(Some(&mut tx), poll.id, &progress).await?;
            tx.commit().await?;

            info!(
                "💸 poll {} remainder {} units credited to player {}",
                poll.id, remaining, top.player_id
            );

            return Ok(StepReport {
                phase: SettlementPhase::Process,
                next: Some(SettlementPhase::Finalize),
                message: format!("all batches done, remainder {} credited", remaining),
                completed: false,
            });
        }

        progress.remaining_amount = remaining;
        progress.advance(SettlementPhase::Finalize)?;
        progress.last_processed_at = now;
        self.polls.save_progress(Some(&mut tx), poll.id, &progress).await?;
        tx.commit().await?;

        Ok(StepReport {
            phase: SettlementPhase::Process,
            next: Some(SettlementPhase::Finalize),
            message: format!(
                "all {} targets processed, {} units paid",
                progress.processed_winners, progress.total_actual_payout
            ),
            completed: false,
        })
    }

    // ========== PHASE 3: FINALIZE ==========

    async fn run_finalize(
        &self,
        poll: &Poll,
        mut progress: SettlementProgress,
        now: DateTime<Utc>,
    ) -> AppResult<StepReport> {
        let mut tx = self.ledger.begin_tx().await?;

        self.polls
            .mark_settled(
                &mut tx,
                poll.id,
                &progress.winning_option_ids,
                &self.config.worker_id,
                now,
            )
            .await?;

        let entry = SettlementLogEntry {
            poll_id: poll.id,
            winning_option_ids: progress.winning_option_ids.clone(),
            is_refund: progress.is_refund,
            total_bet_amount: progress.total_bet_amount,
            total_commission: progress.total_commission,
            payout_pool: progress.payout_pool,
            total_payout: progress.total_actual_payout,
            total_winners: progress.total_winners,
            house_edge: house_edge(progress.total_commission, progress.total_bet_amount),
            started_at: progress.started_at,
            finished_at: now,
            distribution: serde_json::json!({
                "totalBatches": progress.total_batches,
                "processedWinners": progress.processed_winners,
                "payoutPool": progress.payout_pool,
                "totalActualPayout": progress.total_actual_payout,
                "totalWinningStake": progress.total_winning_stake,
                "isRefund": progress.is_refund,
            }),
        };
        self.polls.insert_settlement_log(&mut tx, &entry).await?;

        progress.advance(SettlementPhase::Notify)?;
        progress.last_processed_at = now;
        self.polls.save_progress(Some(&mut tx), poll.id, &progress).await?;
        tx.commit().await?;

        info!(
            "🏁 poll {} settled: {} winners, {} units paid out",
            poll.id, progress.total_winners, progress.total_actual_payout
        );

        Ok(StepReport {
            phase: SettlementPhase::Finalize,
            next: Some(SettlementPhase::Notify),
            message: format!(
                "poll settled, {} units paid to {} winners",
                progress.total_actual_payout, progress.total_winners
            ),
            completed: false,
        })
    }

    // ========== PHASE 4: NOTIFY ==========

    async fn run_notify(
        &self,
        poll: &Poll,
        mut progress: SettlementProgress,
        now: DateTime<Utc>,
    ) -> AppResult<StepReport> {
        let bets = self.polls.fetch_all_bets(poll.id).await?;
        let labels = self.polls.option_labels(poll.id).await?;

        let notices = build_outcome_notices(poll.id, &poll.title, &bets, &labels, &progress);
        let total = notices.len();

        let results = join_all(notices.iter().map(|n| self.sink.deliver(n.clone()))).await;

        let mut failed = 0usize;
        for (notice, result) in notices.iter().zip(results) {
            if let Err(e) = result {
                failed += 1;
                warn!(
                    "⚠️ {} notification failed for player {}: {}",
                    notice.kind(),
                    notice.player_id(),
                    e
                );
            }
        }

        // Best-effort only: delivery failures never block completion
        progress.advance(SettlementPhase::Completed)?;
        progress.last_processed_at = now;
        self.polls.save_progress(None, poll.id, &progress).await?;

        info!(
            "📣 poll {} notifications dispatched: {}/{} delivered",
            poll.id,
            total - failed,
            total
        );

        Ok(StepReport {
            phase: SettlementPhase::Notify,
            next: Some(SettlementPhase::Completed),
            message: format!("{}/{} notifications delivered", total - failed, total),
            completed: true,
        })
    }

    // ========== FAILURE / BUDGET HANDLING ==========

    async fn handle_phase_failure(&self, poll: &Poll, phase: SettlementPhase, error: &AppError) {
        if matches!(
            error,
            AppError::Settlement(SettlementError::AlreadySettled(_))
        ) {
            // Another path settled this poll; align the betting status so
            // selection stops picking it up.
            if let Err(repair) = self.polls.mark_betting_settled(poll.id).await {
                error!("failed to repair betting status for poll {}: {}", poll.id, repair);
            }
            return;
        }

        if phase == SettlementPhase::Notify {
            // Settlement is already authoritative; the next tick just
            // retries notification.
            error!(
                "notify phase failed for poll {}: {} (will retry next tick)",
                poll.id, error
            );
            return;
        }

        match self.polls.rollback_to_open(poll.id).await {
            Ok(true) => warn!(
                "↩️ poll {} rolled back to open after {} failure: {}",
                poll.id,
                phase.as_str(),
                error
            ),
            Ok(false) => error!(
                "poll {} could not be rolled back after {} failure: {}",
                poll.id,
                phase.as_str(),
                error
            ),
            Err(rollback_err) => error!(
                "rollback failed for poll {} after {} failure: {}",
                poll.id,
                phase.as_str(),
                rollback_err
            ),
        }

        if phase == SettlementPhase::Finalize {
            error!(
                "🚨 MANUAL REVIEW: finalize failed for poll {} - payouts may already be applied: {}",
                poll.id, error
            );
        }
    }

    fn budget_exceeded(&self, report: Option<&StepReport>, started: Instant) -> Option<TickOutcome> {
        let elapsed = started.elapsed().as_millis() as u64;
        if elapsed <= self.config.tick_budget_ms {
            return None;
        }

        let err: AppError = SettlementError::TimeBudgetExceeded { elapsed_ms: elapsed }.into();
        Some(TickOutcome {
            success: false,
            phase: report.map(|r| r.phase),
            next_phase: report.and_then(|r| r.next),
            message: report.map(|r| r.message.clone()),
            error: Some(err.to_string()),
            completed: report.map(|r| r.completed).unwrap_or(false),
            execution_time_ms: elapsed,
            silent: false,
        })
    }

    fn grace_period(&self) -> Duration {
        Duration::seconds(self.config.grace_period_secs)
    }

    fn liveness_window(&self) -> Duration {
        Duration::seconds(self.config.liveness_window_secs)
    }
}

// ========== PURE SETTLEMENT MATH ==========

/// Floor-division payout share: floor(pool * stake / total_winning_stake).
/// Computed in i128 so pool * stake cannot overflow. Floor, not rounding -
/// the remainder rule reconciles the gap.
pub fn proportional_payout(pool: i64, stake: i64, total_winning_stake: i64) -> i64 {
    if pool <= 0 || stake <= 0 || total_winning_stake <= 0 {
        return 0;
    }
    ((pool as i128 * stake as i128) / total_winning_stake as i128) as i64
}

pub fn ceil_div(total: i64, batch_size: i64) -> i64 {
    if batch_size <= 0 || total <= 0 {
        return 0;
    }
    (total + batch_size - 1) / batch_size
}

/// commission / total bets, as a fraction
pub fn house_edge(total_commission: i64, total_bet_amount: i64) -> Decimal {
    if total_bet_amount <= 0 {
        return Decimal::ZERO;
    }
    Decimal::from(total_commission) / Decimal::from(total_bet_amount)
}

/// Build exactly one outcome notice per bet, plus one aggregate
/// settlement-complete notice to a representative winner.
///
/// Winner payouts are recomputed with the same floor rule Phase 2 used, and
/// the floor-division remainder is assigned to the largest winning bet so
/// each notice matches the amount actually credited.
pub fn build_outcome_notices(
    poll_id: Uuid,
    poll_title: &str,
    bets: &[Bet],
    labels: &HashMap<Uuid, String>,
    progress: &SettlementProgress,
) -> Vec<OutcomeNotice> {
    let mut notices = Vec::with_capacity(bets.len() + 1);

    if progress.is_refund {
        for bet in bets {
            notices.push(OutcomeNotice::Refund(RefundNotice {
                player_id: bet.player_id,
                poll_id,
                poll_title: poll_title.to_string(),
                amount: bet.amount,
                reason: "no winning side - stakes returned in full".to_string(),
            }));
        }
        return notices;
    }

    let winning: HashSet<Uuid> = progress.winning_option_ids.iter().copied().collect();

    let mut payout_sum: i64 = 0;
    let mut largest: Option<(usize, &Bet)> = None;

    for bet in bets {
        if winning.contains(&bet.option_id) {
            let won = proportional_payout(progress.payout_pool, bet.amount, progress.total_winning_stake);
            payout_sum += won;

            let index = notices.len();
            notices.push(OutcomeNotice::Win(WinNotice {
                player_id: bet.player_id,
                poll_id,
                poll_title: poll_title.to_string(),
                staked: bet.amount,
                won,
            }));

            let replace = match largest {
                None => true,
                Some((_, current)) => {
                    bet.amount > current.amount
                        || (bet.amount == current.amount
                            && (bet.placed_at, bet.id) < (current.placed_at, current.id))
                }
            };
            if replace {
                largest = Some((index, bet));
            }
        } else {
            notices.push(OutcomeNotice::Loss(LossNotice {
                player_id: bet.player_id,
                poll_id,
                poll_title: poll_title.to_string(),
                staked: bet.amount,
                option_label: labels.get(&bet.option_id).cloned().unwrap_or_default(),
            }));
        }
    }

    if let Some((index, top)) = largest {
        let remainder = progress.payout_pool - payout_sum;
        if remainder > 0 {
            if let OutcomeNotice::Win(notice) = &mut notices[index] {
                notice.won += remainder;
            }
        }

        notices.push(OutcomeNotice::SettlementComplete(SettlementCompleteNotice {
            player_id: top.player_id,
            poll_id,
            poll_title: poll_title.to_string(),
            total_winners: progress.total_winners,
            total_payout: progress.total_actual_payout,
        }));
    }

    notices
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_payout_scenario_with_commission() {
        // stakes {optA: 1000, optB: 2000}, commission 150, single winner
        // staking 1000 on optA -> floor((3000 - 150) * 1000 / 1000) = 2850
        assert_eq!(proportional_payout(2850, 1000, 1000), 2850);
    }

    #[test]
    fn test_zero_commission_pays_full_pool() {
        assert_eq!(proportional_payout(3000, 1000, 1000), 3000);
    }

    #[test]
    fn test_full_commission_pays_zero() {
        assert_eq!(proportional_payout(0, 1000, 1000), 0);
    }

    #[test]
    fn test_payout_floors_not_rounds() {
        // 100 * 2 / 3 = 66.66... -> 66, never 67
        assert_eq!(proportional_payout(100, 2, 3), 66);
    }

    #[test]
    fn test_payout_survives_large_pools() {
        let pool = i64::MAX / 2;
        let stake = 1_000_000_000;
        let total = 3_000_000_000;
        let payout = proportional_payout(pool, stake, total);
        assert!(payout > 0 && payout <= pool);
    }

    #[test]
    fn test_ceil_div() {
        assert_eq!(ceil_div(0, 50), 0);
        assert_eq!(ceil_div(1, 50), 1);
        assert_eq!(ceil_div(50, 50), 1);
        assert_eq!(ceil_div(51, 50), 2);
        assert_eq!(ceil_div(100, 50), 2);
    }

    #[test]
    fn test_house_edge() {
        assert_eq!(house_edge(150, 3000), dec!(0.05));
        assert_eq!(house_edge(0, 3000), Decimal::ZERO);
        assert_eq!(house_edge(100, 0), Decimal::ZERO);
    }

    fn bet(option_id: Uuid, amount: i64, seq: i64) -> Bet {
        Bet {
            id: Uuid::new_v4(),
            poll_id: Uuid::new_v4(),
            option_id,
            player_id: Uuid::new_v4(),
            amount,
            placed_at: Utc::now() + Duration::seconds(seq),
        }
    }

    fn payout_progress(
        winning: Vec<Uuid>,
        pool: i64,
        total_winning_stake: i64,
        total_winners: i64,
    ) -> SettlementProgress {
        SettlementProgress {
            phase: SettlementPhase::Notify,
            total_batches: 1,
            current_batch: 1,
            total_winners,
            processed_winners: total_winners,
            winning_option_ids: winning,
            is_refund: false,
            started_at: Utc::now(),
            last_processed_at: Utc::now(),
            total_bet_amount: pool,
            total_commission: 0,
            house_commission_rate: dec!(0),
            payout_pool: pool,
            total_winning_stake,
            total_actual_payout: pool,
            remaining_amount: 0,
        }
    }

    #[test]
    fn test_conservation_with_awkward_stakes() {
        // three equal stakes of 111.11 against a pool that does not divide
        // evenly - the remainder must close the gap to exactly the pool
        let option = Uuid::new_v4();
        let bets = vec![bet(option, 11_111, 0), bet(option, 11_111, 1), bet(option, 11_111, 2)];
        let pool = 33_100;
        let progress = payout_progress(vec![option], pool, 33_333, 3);

        let notices = build_outcome_notices(Uuid::new_v4(), "poll", &bets, &HashMap::new(), &progress);

        let won_total: i64 = notices
            .iter()
            .filter_map(|n| match n {
                OutcomeNotice::Win(w) => Some(w.won),
                _ => None,
            })
            .sum();
        assert_eq!(won_total, pool);

        // equal stakes: the earliest-placed bet takes the remainder
        match &notices[0] {
            OutcomeNotice::Win(w) => assert!(w.won > proportional_payout(pool, 11_111, 33_333)),
            other => panic!("unexpected notice: {:?}", other),
        }
    }

    #[test]
    fn test_tie_between_options_splits_pool_proportionally() {
        let opt_a = Uuid::new_v4();
        let opt_b = Uuid::new_v4();
        let bets = vec![bet(opt_a, 1_000, 0), bet(opt_b, 3_000, 1)];
        let pool = 4_000;
        let progress = payout_progress(vec![opt_a, opt_b], pool, 4_000, 2);

        let notices = build_outcome_notices(Uuid::new_v4(), "poll", &bets, &HashMap::new(), &progress);

        let wins: Vec<i64> = notices
            .iter()
            .filter_map(|n| match n {
                OutcomeNotice::Win(w) => Some(w.won),
                _ => None,
            })
            .collect();
        assert_eq!(wins, vec![1_000, 3_000]);
    }

    #[test]
    fn test_refund_notices_return_exact_stakes() {
        let option = Uuid::new_v4();
        let bets = vec![bet(option, 500, 0), bet(option, 1_250, 1), bet(option, 42, 2)];
        let mut progress = payout_progress(vec![], 1_792, 0, 3);
        progress.is_refund = true;

        let notices = build_outcome_notices(Uuid::new_v4(), "poll", &bets, &HashMap::new(), &progress);

        assert_eq!(notices.len(), 3);
        let refunded: i64 = notices
            .iter()
            .map(|n| match n {
                OutcomeNotice::Refund(r) => r.amount,
                other => panic!("unexpected notice: {:?}", other),
            })
            .sum();
        assert_eq!(refunded, 500 + 1_250 + 42);
    }

    #[test]
    fn test_losers_get_loss_notice_and_one_summary_goes_out() {
        let opt_win = Uuid::new_v4();
        let opt_lose = Uuid::new_v4();
        let bets = vec![bet(opt_win, 1_000, 0), bet(opt_lose, 2_000, 1)];
        let mut labels = HashMap::new();
        labels.insert(opt_lose, "No".to_string());
        let progress = payout_progress(vec![opt_win], 2_850, 1_000, 1);

        let notices = build_outcome_notices(Uuid::new_v4(), "poll", &bets, &labels, &progress);

        assert_eq!(notices.len(), 3);
        assert!(matches!(&notices[0], OutcomeNotice::Win(w) if w.won == 2_850));
        assert!(matches!(&notices[1], OutcomeNotice::Loss(l) if l.option_label == "No"));
        assert!(matches!(
            &notices[2],
            OutcomeNotice::SettlementComplete(c) if c.total_payout == 2_850
        ));
    }

    #[test]
    fn test_replay_of_uncommitted_batch_never_double_credits() {
        // simulate phase 2 over 5 winning bets, batch size 2, with a crash
        // before batch 1 commits: the cursor did not advance, so replaying
        // applies batch 1 exactly once and totals still reconcile
        let stakes = [500i64, 1_200, 700, 300, 800];
        let total_winning: i64 = stakes.iter().sum();
        let pool = 3_321i64; // floors leave a 2-unit gap for the remainder rule
        let batch_size = 2usize;

        let mut credited = vec![0i64; stakes.len()];
        let mut cursor = 0usize; // committed batch count
        let mut actual_payout = 0i64;

        let apply_batch = |cursor: &mut usize, actual: &mut i64, credited: &mut Vec<i64>, commit: bool| {
            let start = *cursor * batch_size;
            let batch: Vec<usize> = (start..(start + batch_size).min(stakes.len())).collect();
            if batch.is_empty() {
                return false;
            }
            if commit {
                for i in batch {
                    let paid = proportional_payout(pool, stakes[i], total_winning);
                    credited[i] += paid;
                    *actual += paid;
                }
                *cursor += 1;
            }
            true
        };

        // batch 0 commits, batch 1 crashes (nothing applied, cursor frozen)
        assert!(apply_batch(&mut cursor, &mut actual_payout, &mut credited, true));
        assert!(apply_batch(&mut cursor, &mut actual_payout, &mut credited, false));
        assert_eq!(cursor, 1);

        // replay drains the remaining batches
        while apply_batch(&mut cursor, &mut actual_payout, &mut credited, true) {}

        // remainder to the largest stake (index 1)
        let remainder = pool - actual_payout;
        assert_eq!(remainder, 2);
        credited[1] += remainder;
        actual_payout += remainder;

        assert_eq!(actual_payout, pool);
        for (i, stake) in stakes.iter().enumerate() {
            let base = proportional_payout(pool, *stake, total_winning);
            let expected = if i == 1 { base + remainder } else { base };
            assert_eq!(credited[i], expected, "player {} credited wrong amount", i);
        }
    }
}
