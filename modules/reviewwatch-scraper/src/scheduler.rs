use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::orchestrator::Orchestrator;

/// Start the scrape interval loop. The first tick fires immediately, so a run
/// is requested at startup and then once per `period`.
///
/// The loop goes through `Orchestrator::start_run` like any other caller and
/// never waits for a run to finish. If a run is still active when a tick
/// fires, that tick is skipped.
pub fn spawn_scrape_interval(orchestrator: Orchestrator, period: Duration) -> JoinHandle<()> {
    info!(period_minutes = period.as_secs() / 60, "Starting scrape interval loop");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let outcome = orchestrator.start_run().await;
            if outcome.accepted {
                info!(run_id = %outcome.run_id, "Scrape interval: run started");
            } else {
                info!(run_id = %outcome.run_id, "Scrape interval: already running, skipping");
            }
        }
    })
}
