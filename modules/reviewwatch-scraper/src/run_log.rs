//! Scrape run log: one JSON file per finished run.
//!
//! Each terminal RunProgress is written to `{dir}/{run_id}.json`. On startup
//! the most recent entry restores the status endpoint's view of the last run.

use std::path::PathBuf;

use tracing::{info, warn};

use reviewwatch_common::error::Result;
use reviewwatch_common::{ReviewWatchError, RunProgress};

pub struct RunLog {
    dir: PathBuf,
}

impl RunLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write a finished run to disk. Returns the file path on success.
    pub async fn record(&self, progress: &RunProgress) -> Result<PathBuf> {
        let run_id = progress
            .run_id
            .ok_or_else(|| ReviewWatchError::Storage("cannot log a run without an id".to_string()))?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{run_id}.json"));
        let json = serde_json::to_vec_pretty(progress)?;
        tokio::fs::write(&path, json).await?;

        info!(path = %path.display(), state = %progress.state, "Run log saved");
        Ok(path)
    }

    /// The most recently finished run on disk, if any. Unreadable entries are skipped.
    pub fn latest(&self) -> Result<Option<RunProgress>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut latest: Option<RunProgress> = None;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(ReviewWatchError::from)
                .and_then(|raw| Ok(serde_json::from_str::<RunProgress>(&raw)?));
            let progress = match parsed {
                Ok(p) => p,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable run log");
                    continue;
                }
            };
            let newer = match &latest {
                None => true,
                Some(best) => progress.finished_at > best.finished_at,
            };
            if newer {
                latest = Some(progress);
            }
        }
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use reviewwatch_common::RunState;
    use uuid::Uuid;

    fn finished(minutes_ago: i64, state: RunState) -> RunProgress {
        let now = Utc::now();
        RunProgress {
            state,
            finished_at: Some(now - Duration::minutes(minutes_ago)),
            ..RunProgress::started(Uuid::new_v4(), 2, now - Duration::hours(1))
        }
    }

    #[tokio::test]
    async fn latest_picks_most_recently_finished_run() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::new(dir.path().join("scrape-runs"));

        log.record(&finished(30, RunState::Failed)).await.unwrap();
        let newest = finished(5, RunState::Completed);
        log.record(&newest).await.unwrap();
        log.record(&finished(60, RunState::CompletedWithErrors)).await.unwrap();
        std::fs::write(dir.path().join("scrape-runs").join("junk.json"), "nope").unwrap();

        assert_eq!(log.latest().unwrap(), Some(newest));
    }

    #[test]
    fn missing_directory_means_no_runs() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::new(dir.path().join("absent"));
        assert_eq!(log.latest().unwrap(), None);
    }

    #[tokio::test]
    async fn never_run_progress_is_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::new(dir.path());
        assert!(log.record(&RunProgress::never_run()).await.is_err());
    }
}
