//! Orchestrator behavior end to end: overlap rejection, failure isolation,
//! supervision, and persistence across a restart.
//!
//! Everything runs against MockFetcher and in-memory or temp-dir stores:
//! no network, no browser.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use reviewwatch_common::{RunErrorKind, RunState, ScrapeStatus};
use reviewwatch_scraper::job::RunPolicy;
use reviewwatch_scraper::run_log::RunLog;
use reviewwatch_scraper::testing::{
    fast_policy, review, BrokenLocations, GatedLocations, MockFetcher, StaticLocations,
};
use reviewwatch_scraper::{Orchestrator, SnapshotStore};

fn orchestrator(fetcher: Arc<MockFetcher>, ids: &[&str], store: Arc<SnapshotStore>) -> Orchestrator {
    Orchestrator::new(
        store,
        fetcher,
        Arc::new(StaticLocations::of(ids)),
        fast_policy(),
        None,
    )
}

// ---------------------------------------------------------------------------
// Status before anything ran
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_before_first_run_is_never_run() {
    let orch = orchestrator(Arc::new(MockFetcher::new()), &["a"], Arc::new(SnapshotStore::in_memory()));
    let status = orch.get_status();
    assert_eq!(status.state, RunState::NeverRun);
    assert_eq!(status.run_id, None);
    assert!(!orch.is_running());
}

// ---------------------------------------------------------------------------
// Overlap rejection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_start_while_running_is_rejected_with_first_run_id() {
    let gate = Arc::new(Semaphore::new(0));
    let fetcher = Arc::new(
        MockFetcher::new()
            .on_reviews("a", vec![review("r1", 5)])
            .with_gate(gate.clone()),
    );
    let orch = orchestrator(fetcher, &["a"], Arc::new(SnapshotStore::in_memory()));

    let first = orch.start_run().await;
    let second = orch.start_run().await;

    assert!(first.accepted);
    assert!(!second.accepted);
    assert_eq!(second.run_id, first.run_id);

    let status = orch.get_status();
    assert_eq!(status.state, RunState::Running);
    assert_eq!(status.run_id, Some(first.run_id));
    assert_eq!(status.locations_total, 1);

    gate.add_permits(1);
    orch.wait_idle().await;

    let status = orch.get_status();
    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.run_id, Some(first.run_id));
    assert!(status.finished_at.is_some());
}

#[tokio::test]
async fn concurrent_starts_accept_exactly_one() {
    let gate = Arc::new(Semaphore::new(0));
    let fetcher = Arc::new(
        MockFetcher::new()
            .on_reviews("a", vec![review("r1", 5)])
            .with_gate(gate.clone()),
    );
    let orch = orchestrator(fetcher, &["a"], Arc::new(SnapshotStore::in_memory()));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let orch = orch.clone();
        handles.push(tokio::spawn(async move { orch.start_run().await }));
    }
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    let accepted: Vec<_> = outcomes.iter().filter(|o| o.accepted).collect();
    assert_eq!(accepted.len(), 1);
    let run_id = accepted[0].run_id;
    assert!(outcomes.iter().all(|o| o.run_id == run_id));

    gate.add_permits(1);
    orch.wait_idle().await;
    assert_eq!(orch.get_status().state, RunState::Completed);
}

#[tokio::test]
async fn run_is_visible_while_locations_load() {
    let gate = Arc::new(Semaphore::new(0));
    let orch = Orchestrator::new(
        Arc::new(SnapshotStore::in_memory()),
        Arc::new(MockFetcher::new().on_reviews("a", vec![review("r1", 5)])),
        Arc::new(GatedLocations::of(&["a"], gate.clone())),
        fast_policy(),
        None,
    );

    let first = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.start_run().await })
    };
    while !orch.is_running() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let rejected = orch.start_run().await;
    assert!(!rejected.accepted);
    let status = orch.get_status();
    assert_eq!(status.state, RunState::Running);
    assert_eq!(status.run_id, Some(rejected.run_id));

    gate.add_permits(1);
    let accepted = first.await.unwrap();
    assert!(accepted.accepted);
    assert_eq!(accepted.run_id, rejected.run_id);

    orch.wait_idle().await;
    let status = orch.get_status();
    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.locations_total, 1);
    assert_eq!(status.locations_done, 1);
}

#[tokio::test]
async fn new_run_can_start_after_previous_finished() {
    let fetcher = Arc::new(MockFetcher::new().on_reviews("a", vec![review("r1", 5)]));
    let orch = orchestrator(fetcher.clone(), &["a"], Arc::new(SnapshotStore::in_memory()));

    let first = orch.start_run().await;
    orch.wait_idle().await;
    let second = orch.start_run().await;
    orch.wait_idle().await;

    assert!(first.accepted && second.accepted);
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(orch.get_status().run_id, Some(second.run_id));
    assert_eq!(fetcher.calls("a"), 2);
}

// ---------------------------------------------------------------------------
// Partial failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_location_does_not_abort_run_or_lose_data() {
    let store = Arc::new(SnapshotStore::in_memory());

    // Seed L2 with data from an earlier good run.
    let seed = Arc::new(MockFetcher::new().on_reviews("l2", vec![review("old1", 4), review("old2", 2)]));
    let seeding = orchestrator(seed, &["l2"], store.clone());
    seeding.start_run().await;
    seeding.wait_idle().await;
    let l2_before = store.get("l2").unwrap();

    let fetcher = Arc::new(
        MockFetcher::new()
            .on_reviews("l1", vec![review("a", 5), review("b", 4)])
            .on_transient("l2")
            .on_reviews("l3", vec![review("c", 3)]),
    );
    let orch = orchestrator(fetcher.clone(), &["l1", "l2", "l3"], store.clone());
    orch.start_run().await;
    orch.wait_idle().await;

    let status = orch.get_status();
    assert_eq!(status.state, RunState::CompletedWithErrors);
    assert_eq!(status.locations_done, 3);
    assert_eq!(status.locations_total, 3);
    assert_eq!(status.error_summary.len(), 1);
    assert_eq!(status.error_summary[0].location_id.as_deref(), Some("l2"));
    assert_eq!(status.error_summary[0].kind, RunErrorKind::Transient);
    assert_eq!(fetcher.calls("l2"), 3);

    assert_eq!(store.get("l1").unwrap().review_count, 2);
    assert_eq!(store.get("l3").unwrap().review_count, 1);

    let l2_after = store.get("l2").unwrap();
    assert_eq!(l2_after.last_scrape_status, ScrapeStatus::FailedTemporary);
    assert_eq!(l2_after.reviews, l2_before.reviews);
    assert_eq!(l2_after.average_rating, l2_before.average_rating);
    assert_eq!(l2_after.review_count, l2_before.review_count);
    assert_eq!(l2_after.last_scraped_at, l2_before.last_scraped_at);
}

#[tokio::test]
async fn progress_is_monotonic_and_complete_at_the_end() {
    let fetcher = Arc::new(
        MockFetcher::new()
            .on_reviews("a", vec![review("r1", 5)])
            .on_reviews("b", vec![review("r2", 4)])
            .on_reviews("c", vec![review("r3", 3)])
            .with_delay(Duration::from_millis(25)),
    );
    let orch = orchestrator(fetcher, &["a", "b", "c"], Arc::new(SnapshotStore::in_memory()));

    let run = orch.start_run().await;
    let mut observed = Vec::new();
    loop {
        let status = orch.get_status();
        assert_eq!(status.run_id, Some(run.run_id));
        assert!(status.locations_done <= status.locations_total);
        observed.push(status.locations_done);
        if status.state.is_terminal() {
            assert_eq!(status.locations_done, status.locations_total);
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert!(observed.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {observed:?}");
    assert_eq!(orch.get_status().state, RunState::Completed);
}

// ---------------------------------------------------------------------------
// Supervision
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreadable_configuration_fails_the_run_and_releases_the_guard() {
    let orch = Orchestrator::new(
        Arc::new(SnapshotStore::in_memory()),
        Arc::new(MockFetcher::new()),
        Arc::new(BrokenLocations),
        fast_policy(),
        None,
    );

    let first = orch.start_run().await;
    assert!(first.accepted);

    let status = orch.get_status();
    assert_eq!(status.state, RunState::Failed);
    assert_eq!(status.run_id, Some(first.run_id));
    assert_eq!(status.error_summary.len(), 1);
    assert_eq!(status.error_summary[0].kind, RunErrorKind::Configuration);
    assert_eq!(status.error_summary[0].location_id, None);
    assert!(!orch.is_running());

    let second = orch.start_run().await;
    assert!(second.accepted);
    assert_ne!(second.run_id, first.run_id);
}

#[tokio::test]
async fn fetcher_panic_fails_only_its_location() {
    let store = Arc::new(SnapshotStore::in_memory());
    let fetcher = Arc::new(
        MockFetcher::new()
            .on_reviews("a", vec![review("r1", 5)])
            .on_panic("b")
            .on_reviews("c", vec![review("r2", 3)]),
    );
    let orch = orchestrator(fetcher, &["a", "b", "c"], store.clone());

    orch.start_run().await;
    orch.wait_idle().await;

    let status = orch.get_status();
    assert_eq!(status.state, RunState::CompletedWithErrors);
    assert_eq!(status.locations_done, 3);
    assert_eq!(status.error_summary.len(), 1);
    let failure = &status.error_summary[0];
    assert_eq!(failure.location_id.as_deref(), Some("b"));
    assert_eq!(failure.kind, RunErrorKind::Panicked);
    assert!(failure.message.contains("scripted panic"));
    assert!(!orch.is_running());

    assert_eq!(store.get("a").unwrap().review_count, 1);
    assert_eq!(store.get("b").unwrap().last_scrape_status, ScrapeStatus::FailedTemporary);
    assert_eq!(store.get("c").unwrap().review_count, 1);
}

#[tokio::test]
async fn run_timeout_fails_the_run_and_releases_the_guard() {
    let fetcher = Arc::new(MockFetcher::new().on_hang("a"));
    let orch = Orchestrator::new(
        Arc::new(SnapshotStore::in_memory()),
        fetcher,
        Arc::new(StaticLocations::of(&["a"])),
        RunPolicy {
            fetch_timeout: Duration::from_secs(60),
            run_timeout: Duration::from_millis(100),
            ..fast_policy()
        },
        None,
    );

    orch.start_run().await;
    orch.wait_idle().await;

    let status = orch.get_status();
    assert_eq!(status.state, RunState::Failed);
    assert_eq!(status.error_summary.len(), 1);
    assert_eq!(status.error_summary[0].kind, RunErrorKind::Timeout);
    assert_eq!(status.current_location_id, None);
    assert!(!orch.is_running());
    assert!(orch.start_run().await.accepted);
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn snapshots_and_last_status_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let snapshots_path = dir.path().join("snapshots.json");
    let runs_dir = dir.path().join("scrape-runs");

    let fetcher = Arc::new(
        MockFetcher::new()
            .on_reviews("a", vec![review("r1", 5), review("r2", 3)])
            .on_reviews("b", vec![review("r3", 1)]),
    );
    let orch = Orchestrator::new(
        Arc::new(SnapshotStore::open(&snapshots_path).unwrap()),
        fetcher,
        Arc::new(StaticLocations::of(&["a", "b"])),
        fast_policy(),
        Some(RunLog::new(&runs_dir)),
    );
    orch.start_run().await;
    orch.wait_idle().await;
    let before = orch.store().get_all();
    let status_before = orch.get_status();
    assert_eq!(status_before.state, RunState::Completed);

    // "Restart": fresh store and orchestrator over the same directory.
    let restarted = Orchestrator::new(
        Arc::new(SnapshotStore::open(&snapshots_path).unwrap()),
        Arc::new(MockFetcher::new()),
        Arc::new(StaticLocations::of(&["a", "b"])),
        fast_policy(),
        Some(RunLog::new(&runs_dir)),
    );

    assert_eq!(*restarted.store().get_all(), *before);
    assert_eq!(restarted.get_status(), status_before);
    assert!(!restarted.is_running());
}
