//! Periodic aggregate stats emission

use refraction_lifecycle::Lifecycle;
use refraction_stats::GlobalStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Log and reset `global` every `interval` until `lifecycle` ends.
///
/// The first line is emitted one full interval after spawning.
pub fn spawn_stats_reporter(
    global: Arc<GlobalStats>,
    interval: Duration,
    lifecycle: Arc<dyn Lifecycle>,
) -> JoinHandle<()> {
    let period = interval.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = lifecycle.done() => break,
                _ = ticker.tick() => {
                    global.print_and_reset();
                }
            }
        }

        debug!("Stats reporter stopped");
    })
}
