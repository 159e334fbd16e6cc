//! One scrape run: a sequential pass over every configured location.
//!
//! Fetch failures never escape a run. Each location ends either merged into
//! the snapshot store or recorded as a failure in the run's error summary,
//! and the run moves on to the next location.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use reviewwatch_common::{
    Config, FetchedReviews, Location, RunError, RunErrorKind, RunProgress, ScrapeStatus,
};

use crate::fetcher::{FetchError, ReviewFetcher};
use crate::store::SnapshotStore;

/// Timeouts, retry budget and pacing for a run.
#[derive(Debug, Clone)]
pub struct RunPolicy {
    /// Bound on a single fetch attempt. Hitting it counts as a transient failure.
    pub fetch_timeout: Duration,
    /// Extra attempts after a transient failure. Definitive failures are never retried.
    pub max_retries: u32,
    /// Backoff before retry n (0-based) is `retry_base * 3^n`.
    pub retry_base: Duration,
    /// Pause between consecutive locations.
    pub location_pause: Duration,
    /// Safety net for the whole run; exceeding it fails the run.
    pub run_timeout: Duration,
}

impl RunPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            max_retries: config.fetch_max_retries,
            retry_base: Duration::from_secs(config.fetch_retry_base_secs),
            location_pause: Duration::from_secs(config.location_pause_secs),
            run_timeout: Duration::from_secs(config.run_timeout_minutes * 60),
        }
    }
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(90),
            max_retries: 2,
            retry_base: Duration::from_secs(3),
            location_pause: Duration::from_secs(3),
            run_timeout: Duration::from_secs(60 * 60),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Write handle on the live RunProgress for one run. Updates are whole-value
/// swaps and are ignored once the run is no longer the live running one.
#[derive(Clone)]
pub struct ProgressTracker {
    cell: Arc<ArcSwap<RunProgress>>,
    run_id: Uuid,
}

impl ProgressTracker {
    pub(crate) fn new(cell: Arc<ArcSwap<RunProgress>>, run_id: Uuid) -> Self {
        Self { cell, run_id }
    }

    fn update(&self, mut f: impl FnMut(&mut RunProgress)) {
        self.cell.rcu(|current| {
            if current.run_id != Some(self.run_id) || !current.is_running() {
                return Arc::clone(current);
            }
            let mut next = RunProgress::clone(current);
            f(&mut next);
            Arc::new(next)
        });
    }

    pub fn begin_location(&self, location_id: &str) {
        self.update(|p| p.current_location_id = Some(location_id.to_string()));
    }

    pub fn finish_location(&self, failure: Option<&RunError>) {
        self.update(|p| {
            p.locations_done = (p.locations_done + 1).min(p.locations_total);
            p.current_location_id = None;
            if let Some(failure) = failure {
                p.error_summary.push(failure.clone());
            }
        });
    }
}

// ---------------------------------------------------------------------------
// JobRun
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RunReport {
    pub succeeded: usize,
    pub failures: Vec<RunError>,
}

pub struct JobRun {
    run_id: Uuid,
    locations: Vec<Location>,
    fetcher: Arc<dyn ReviewFetcher>,
    store: Arc<SnapshotStore>,
    progress: ProgressTracker,
    policy: RunPolicy,
}

impl JobRun {
    pub fn new(
        run_id: Uuid,
        locations: Vec<Location>,
        fetcher: Arc<dyn ReviewFetcher>,
        store: Arc<SnapshotStore>,
        progress: ProgressTracker,
        policy: RunPolicy,
    ) -> Self {
        Self {
            run_id,
            locations,
            fetcher,
            store,
            progress,
            policy,
        }
    }

    pub async fn execute(self) -> RunReport {
        info!(
            run_id = %self.run_id,
            locations = self.locations.len(),
            fetcher = self.fetcher.name(),
            "Scrape run starting"
        );

        let mut report = RunReport::default();
        for (i, location) in self.locations.iter().enumerate() {
            if i > 0 && !self.policy.location_pause.is_zero() {
                tokio::time::sleep(self.policy.location_pause).await;
            }

            self.progress.begin_location(&location.id);
            match self.scrape_location(location).await {
                Ok(()) => {
                    report.succeeded += 1;
                    self.progress.finish_location(None);
                }
                Err(failure) => {
                    self.progress.finish_location(Some(&failure));
                    report.failures.push(failure);
                }
            }
        }

        info!(
            run_id = %self.run_id,
            succeeded = report.succeeded,
            failed = report.failures.len(),
            "Scrape run finished"
        );
        report
    }

    async fn scrape_location(&self, location: &Location) -> Result<(), RunError> {
        let fetched = match fetch_with_retries(Arc::clone(&self.fetcher), location, &self.policy).await {
            Ok(fetched) => fetched,
            Err(e) => {
                let (status, kind) = match e {
                    FetchError::Transient(_) => (ScrapeStatus::FailedTemporary, RunErrorKind::Transient),
                    FetchError::Definitive(_) => (ScrapeStatus::FailedDefinitive, RunErrorKind::Definitive),
                    FetchError::Panicked(_) => (ScrapeStatus::FailedTemporary, RunErrorKind::Panicked),
                };
                warn!(location = location.id.as_str(), error = %e, "Location scrape failed");
                self.record_failure(&location.id, status).await;
                return Err(RunError::for_location(&location.id, kind, e.to_string()));
            }
        };

        let fetched_count = fetched.reviews.len();
        match self.store.merge(&location.id, fetched, Utc::now()).await {
            Ok(snapshot) => {
                info!(
                    location = location.id.as_str(),
                    fetched = fetched_count,
                    review_count = snapshot.review_count,
                    "Location scraped"
                );
                Ok(())
            }
            Err(e) => {
                error!(location = location.id.as_str(), error = %e, "Failed to store snapshot");
                self.record_failure(&location.id, ScrapeStatus::FailedTemporary).await;
                Err(RunError::for_location(&location.id, RunErrorKind::Storage, e.to_string()))
            }
        }
    }

    async fn record_failure(&self, location_id: &str, status: ScrapeStatus) {
        if let Err(e) = self.store.mark_failed(location_id, status).await {
            warn!(location = location_id, error = %e, "Failed to record scrape status");
        }
    }
}

/// Fetch one location, retrying transient failures with exponential backoff.
/// Each attempt runs in its own task bounded by `policy.fetch_timeout`, so a
/// panicking fetcher fails only this location.
pub async fn fetch_with_retries(
    fetcher: Arc<dyn ReviewFetcher>,
    location: &Location,
    policy: &RunPolicy,
) -> Result<FetchedReviews, FetchError> {
    let attempts = policy.max_retries.saturating_add(1);
    let mut attempt = 0u32;
    loop {
        let mut task = {
            let fetcher = Arc::clone(&fetcher);
            let location = location.clone();
            tokio::spawn(async move { fetcher.fetch(&location).await })
        };
        let in_flight = AbortOnDrop(task.abort_handle());

        let result = match tokio::time::timeout(policy.fetch_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => {
                Err(FetchError::Panicked(panic_message(join_err.into_panic())))
            }
            Ok(Err(_)) => Err(FetchError::Transient("fetch task was cancelled".to_string())),
            Err(_) => Err(FetchError::Transient(format!(
                "fetch timed out after {:?}",
                policy.fetch_timeout
            ))),
        };
        drop(in_flight);

        match result {
            Ok(fetched) => return Ok(fetched),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                let backoff = retry_backoff(policy.retry_base, attempt);
                warn!(
                    location = location.id.as_str(),
                    attempt = attempt + 1,
                    backoff_secs = backoff.as_secs(),
                    error = %e,
                    "Fetch failed, retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Stops an in-flight attempt on timeout, or when the run itself is aborted.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// `base * 3^attempt`, saturating at `Duration::MAX`.
fn retry_backoff(base: Duration, attempt: u32) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    3u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
