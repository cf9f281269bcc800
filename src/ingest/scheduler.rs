// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::ingest::Pipeline;

#[derive(Clone, Copy, Debug)]
pub struct IngestSchedulerCfg {
    pub interval_secs: u64,
    /// Run immediately on start instead of waiting one interval.
    pub run_at_start: bool,
}

/// Spawn the periodic ingest loop. Ticks that find a run already in progress
/// (e.g. one triggered from chat) are skipped, never queued.
pub fn spawn_scheduler(
    cfg: IngestSchedulerCfg,
    pipeline: Arc<Pipeline>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(cfg.interval_secs.max(1));
        let start = if cfg.run_at_start {
            tokio::time::Instant::now()
        } else {
            tokio::time::Instant::now() + period
        };
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(target: "ingest", "scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {}
            }

            match pipeline.try_run(&cancel).await {
                Some(report) => tracing::debug!(
                    target: "ingest",
                    delivered = report.delivered,
                    failed = report.failed,
                    "scheduled run done"
                ),
                None => tracing::info!(target: "ingest", "previous run still in progress, tick skipped"),
            }
        }
    })
}
