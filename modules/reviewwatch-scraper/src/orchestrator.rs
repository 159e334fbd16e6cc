//! Orchestrator: the single entry point for starting and observing scrape runs.
//!
//! At most one run is active at a time. The guard is an atomic slot holding the
//! active run's id: `start_run` claims it with a compare-and-swap, and the
//! supervisor task clears it after writing the run's terminal state. A start
//! request that finds the slot taken is rejected with the active id; nothing
//! is queued.
//!
//! Each accepted run executes in its own task, wrapped by a supervisor task
//! that enforces the overall run timeout and turns a panic or timeout into a
//! `failed` RunProgress. Nothing a run does can reach the callers of
//! `start_run` or `get_status`.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use reviewwatch_common::{LocationSource, RunError, RunErrorKind, RunProgress, RunState};

use crate::fetcher::ReviewFetcher;
use crate::job::{panic_message, JobRun, ProgressTracker, RunPolicy, RunReport};
use crate::run_log::RunLog;
use crate::store::SnapshotStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub accepted: bool,
    pub run_id: Uuid,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    active: ArcSwapOption<Uuid>,
    progress: Arc<ArcSwap<RunProgress>>,
    store: Arc<SnapshotStore>,
    fetcher: Arc<dyn ReviewFetcher>,
    locations: Arc<dyn LocationSource>,
    policy: RunPolicy,
    run_log: Option<RunLog>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// When a run log is given, the most recent logged run becomes the initial status.
    pub fn new(
        store: Arc<SnapshotStore>,
        fetcher: Arc<dyn ReviewFetcher>,
        locations: Arc<dyn LocationSource>,
        policy: RunPolicy,
        run_log: Option<RunLog>,
    ) -> Self {
        let initial = match run_log.as_ref().map(RunLog::latest) {
            Some(Ok(Some(last))) if last.state.is_terminal() => {
                info!(run_id = ?last.run_id, state = %last.state, "Restored last run status");
                last
            }
            Some(Err(e)) => {
                warn!(error = %e, "Failed to read run log, starting with empty status");
                RunProgress::never_run()
            }
            _ => RunProgress::never_run(),
        };

        Self {
            inner: Arc::new(Inner {
                active: ArcSwapOption::empty(),
                progress: Arc::new(ArcSwap::from_pointee(initial)),
                store,
                fetcher,
                locations,
                policy,
                run_log,
                supervisor: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.inner.store
    }

    pub fn locations(&self) -> &Arc<dyn LocationSource> {
        &self.inner.locations
    }

    /// Start a run unless one is already active.
    ///
    /// Returns as soon as the run is launched. A run whose location
    /// configuration cannot be read is still accepted; it fails immediately.
    pub async fn start_run(&self) -> StartOutcome {
        let run_id = Uuid::new_v4();
        let existing = {
            let previous = self
                .inner
                .active
                .compare_and_swap(&None::<Arc<Uuid>>, Some(Arc::new(run_id)));
            previous.as_deref().copied()
        };
        if let Some(existing) = existing {
            info!(run_id = %existing, "Scrape run already in progress, rejecting start");
            return StartOutcome {
                accepted: false,
                run_id: existing,
            };
        }

        // Visible as running from the moment the guard is claimed; the
        // location count is filled in once the configuration is loaded.
        let started_at = Utc::now();
        self.inner
            .progress
            .store(Arc::new(RunProgress::started(run_id, 0, started_at)));

        // Launch in its own task so a caller that goes away mid-start (e.g. a
        // dropped HTTP request) cannot leave the guard claimed with no run behind it.
        let inner = Arc::clone(&self.inner);
        if let Err(e) = tokio::spawn(inner.launch(run_id, started_at)).await {
            error!(run_id = %run_id, error = %e, "Run launch crashed");
            let failed = RunProgress {
                state: RunState::Failed,
                finished_at: Some(Utc::now()),
                error_summary: vec![RunError::for_run(RunErrorKind::Panicked, e.to_string())],
                ..RunProgress::started(run_id, 0, started_at)
            };
            self.inner.finish(failed).await;
        }

        StartOutcome {
            accepted: true,
            run_id,
        }
    }

    /// Current or most recent run, by value.
    pub fn get_status(&self) -> RunProgress {
        RunProgress::clone(&self.inner.progress.load())
    }

    pub fn is_running(&self) -> bool {
        self.inner.active.load().is_some()
    }

    /// Wait for the currently supervised run, if any, to reach its terminal state.
    pub async fn wait_idle(&self) {
        let handle = self
            .inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Run supervisor did not finish cleanly");
            }
        }
    }
}

impl Inner {
    /// Load the current locations and spawn the supervised run. Called with the guard held.
    async fn launch(self: Arc<Self>, run_id: Uuid, started_at: DateTime<Utc>) {
        let locations = match self.locations.load().await {
            Ok(locations) => locations,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Cannot load locations, run failed");
                let failed = RunProgress {
                    state: RunState::Failed,
                    finished_at: Some(Utc::now()),
                    error_summary: vec![RunError::for_run(RunErrorKind::Configuration, e.to_string())],
                    ..RunProgress::started(run_id, 0, started_at)
                };
                self.finish(failed).await;
                return;
            }
        };

        info!(run_id = %run_id, locations = locations.len(), "Scrape run accepted");
        self.progress
            .store(Arc::new(RunProgress::started(run_id, locations.len(), started_at)));

        let job = JobRun::new(
            run_id,
            locations,
            Arc::clone(&self.fetcher),
            Arc::clone(&self.store),
            ProgressTracker::new(Arc::clone(&self.progress), run_id),
            self.policy.clone(),
        );
        // Spawn under the lock so a later run's handle cannot be overwritten by this one.
        let mut slot = self.supervisor.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(tokio::spawn(supervise(Arc::clone(&self), run_id, job)));
    }

    /// Publish a terminal RunProgress, log it, then release the guard.
    /// The guard is released last so a new run can never be overwritten by
    /// the previous run's terminal state.
    async fn finish(&self, terminal: RunProgress) {
        self.progress.store(Arc::new(terminal.clone()));

        if let Some(log) = &self.run_log {
            if let Err(e) = log.record(&terminal).await {
                warn!(error = %e, "Failed to save run log");
            }
        }

        info!(
            run_id = ?terminal.run_id,
            state = %terminal.state,
            locations_done = terminal.locations_done,
            locations_total = terminal.locations_total,
            errors = terminal.error_summary.len(),
            "Scrape run finished"
        );
        self.active.store(None);
    }
}

async fn supervise(inner: Arc<Inner>, run_id: Uuid, job: JobRun) {
    let run_timeout = inner.policy.run_timeout;
    let mut task = tokio::spawn(job.execute());

    let (state, run_errors) = match tokio::time::timeout(run_timeout, &mut task).await {
        Ok(Ok(report)) => (terminal_state(&report), Vec::new()),
        Ok(Err(join_err)) => {
            let message = if join_err.is_panic() {
                format!("run panicked: {}", panic_message(join_err.into_panic()))
            } else {
                "run task was cancelled".to_string()
            };
            error!(run_id = %run_id, error = message.as_str(), "Scrape run crashed");
            (
                RunState::Failed,
                vec![RunError::for_run(RunErrorKind::Panicked, message)],
            )
        }
        Err(_) => {
            task.abort();
            // Wait for the abort to land so the stopped run cannot write progress afterwards.
            let _ = task.await;
            error!(run_id = %run_id, timeout = ?run_timeout, "Scrape run timed out");
            (
                RunState::Failed,
                vec![RunError::for_run(
                    RunErrorKind::Timeout,
                    format!("run exceeded overall timeout of {run_timeout:?}"),
                )],
            )
        }
    };

    let mut terminal = RunProgress::clone(&inner.progress.load());
    if terminal.run_id != Some(run_id) {
        // Only the guard holder writes live progress.
        error!(run_id = %run_id, live = ?terminal.run_id, "Live progress belongs to another run");
        terminal = RunProgress::started(run_id, 0, Utc::now());
    }
    terminal.state = state;
    terminal.finished_at = Some(Utc::now());
    terminal.current_location_id = None;
    terminal.error_summary.extend(run_errors);

    inner.finish(terminal).await;
}

fn terminal_state(report: &RunReport) -> RunState {
    if report.failures.is_empty() {
        RunState::Completed
    } else {
        RunState::CompletedWithErrors
    }
}
