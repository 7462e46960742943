//! Periodic sync loop.
//!
//! Runs one sync mode on a fixed interval. The first run starts immediately;
//! a run that overshoots the interval causes the missed ticks to be skipped
//! rather than replayed. Ctrl-C is honored between runs, never during one.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::server::HealthState;
use crate::sync::{SyncEngine, SyncMode};

/// Run `mode` every `every` until Ctrl-C. Returns the number of completed runs.
///
/// `limit` caps products per run, as in a one-off product sync.
pub async fn run_scheduled(
    engine: &mut SyncEngine,
    mode: SyncMode,
    limit: Option<usize>,
    every: Duration,
    health: Arc<HealthState>,
) -> u64 {
    run_until(engine, mode, limit, every, health, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Scheduler loop that stops when `shutdown` resolves.
pub async fn run_until<F>(
    engine: &mut SyncEngine,
    mode: SyncMode,
    limit: Option<usize>,
    every: Duration,
    health: Arc<HealthState>,
    shutdown: F,
) -> u64
where
    F: std::future::Future<Output = ()>,
{
    let every = every.max(Duration::from_secs(1));
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    health.set_scheduler_running(true);
    info!("Scheduler started: {} sync every {:?}", mode, every);

    let mut runs = 0u64;
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping scheduler");
                break;
            }
            _ = ticker.tick() => {}
        }

        let results = engine.run_mode(mode, limit).await;
        for (name, result) in &results {
            info!("Scheduled {} sync: {}", name, result);
        }
        health.record_sync(Utc::now(), engine.ai_reachable());
        runs += 1;
    }

    health.set_scheduler_running(false);
    info!("Scheduler stopped after {} runs", runs);
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_every_interval() {
        let mut engine = SyncEngine::from_config(&Config::default(), true).unwrap();
        let health = Arc::new(HealthState::new(true));

        let runs = run_until(
            &mut engine,
            SyncMode::Full,
            None,
            Duration::from_secs(60),
            health.clone(),
            tokio::time::sleep(Duration::from_secs(150)),
        )
        .await;

        // t = 0, 60, 120
        assert_eq!(runs, 3);
        assert!(!health.scheduler_running());
        assert!(health.last_sync_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_shutdown_stops_before_first_run() {
        let mut engine = SyncEngine::from_config(&Config::default(), true).unwrap();
        let health = Arc::new(HealthState::new(true));

        let runs = run_until(
            &mut engine,
            SyncMode::Inventory,
            None,
            Duration::from_secs(60),
            health.clone(),
            std::future::ready(()),
        )
        .await;

        assert_eq!(runs, 0);
        assert!(!health.scheduler_running());
    }
}
