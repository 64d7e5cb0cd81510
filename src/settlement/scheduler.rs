// Sweep scheduler - drives the reconciliation and settlement sweeps
//
// - Fixed period per task, first tick fires immediately
// - A sweep that overruns its period makes the next ticks be skipped, never queued
// - Each sweep gets a deadline and the process shutdown token
// - Cancelling the token stops the timer; an in-flight sweep runs to completion

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-sweep budget handed to a [`Sweep`]
#[derive(Debug, Clone)]
pub struct SweepContext {
    pub deadline: Instant,
    pub shutdown: CancellationToken,
}

impl SweepContext {
    pub fn new(budget: Duration, shutdown: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + budget,
            shutdown,
        }
    }

    /// Whether new work should no longer be started
    pub fn should_stop(&self) -> bool {
        self.shutdown.is_cancelled() || Instant::now() >= self.deadline
    }
}

/// A periodic background task
#[async_trait]
pub trait Sweep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn sweep(&self, ctx: SweepContext);
}

#[derive(Debug, Clone, Copy)]
pub struct SweepSchedule {
    pub period: Duration,
    pub budget: Duration,
}

impl SweepSchedule {
    pub fn new(period_secs: u64, budget_secs: u64) -> Self {
        Self {
            period: Duration::from_secs(period_secs.max(1)),
            budget: Duration::from_secs(budget_secs.max(1)),
        }
    }
}

/// Start the periodic loop for `task` (runs in background)
pub fn spawn_periodic(
    task: Arc<dyn Sweep>,
    schedule: SweepSchedule,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = task.name();
        let mut ticker = interval(schedule.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "⏰ {} scheduler started (every {:?}, budget {:?})",
            name, schedule.period, schedule.budget
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            task.sweep(SweepContext::new(schedule.budget, shutdown.clone()))
                .await;
            let elapsed = started.elapsed();

            if elapsed > schedule.period {
                warn!(
                    "{} sweep took {:?}, longer than its {:?} period; overlapping ticks skipped",
                    name, elapsed, schedule.period
                );
            } else {
                debug!("{} sweep finished in {:?}", name, elapsed);
            }
        }

        info!("🛑 {} scheduler stopped", name);
    })
}
