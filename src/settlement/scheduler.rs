// Settlement scheduler - drives the settlement state machine
//
// Each tick invokes exactly one "process next settlement step" call. The
// engine owns poll selection and overlap prevention; the scheduler's only
// job is cadence. A tick that finds no work is logged at debug level so a
// quiet system stays quiet.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

use super::engine::{SettlementEngine, TickOutcome};

pub struct SettlementScheduler {
    engine: Arc<SettlementEngine>,
    tick_interval: Duration,
}

impl SettlementScheduler {
    pub fn new(engine: Arc<SettlementEngine>, tick_interval_secs: u64) -> Self {
        Self {
            engine,
            tick_interval: Duration::from_secs(tick_interval_secs),
        }
    }

    /// Start the scheduler loop (runs in background)
    pub fn start(&self) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let tick_interval = self.tick_interval;

        tokio::spawn(async move {
            info!(
                "⏰ Settlement scheduler started (every {}s)",
                tick_interval.as_secs()
            );
            let mut ticker = interval(tick_interval);

            loop {
                ticker.tick().await;
                let outcome = engine.process_next_step().await;
                log_outcome(&outcome);
            }
        })
    }
}

fn log_outcome(outcome: &TickOutcome) {
    if outcome.silent {
        debug!("settlement tick: no eligible work ({}ms)", outcome.execution_time_ms);
    } else if outcome.success {
        info!(
            "🔄 settlement step {} ({}ms): {}",
            outcome.phase.map(|p| p.as_str()).unwrap_or("?"),
            outcome.execution_time_ms,
            outcome.message.as_deref().unwrap_or("")
        );
    } else {
        error!(
            "❌ settlement step failed ({}ms): {}",
            outcome.execution_time_ms,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
}
