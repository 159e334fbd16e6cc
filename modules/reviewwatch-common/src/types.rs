use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// --- Locations ---

/// A business listing whose reviews are tracked. Loaded from configuration and
/// never mutated by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "name")]
    pub display_name: String,
    /// Optional cluster, e.g. all branches of one chain.
    #[serde(default)]
    pub group: Option<String>,
    /// Where the fetcher finds this listing (a maps URL for the browserless fetcher).
    #[serde(alias = "google_maps_url")]
    pub source_reference: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

// --- Reviews ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Unique within one location.
    pub review_id: String,
    /// 1 to 5 stars.
    pub rating: u8,
    pub author: String,
    #[serde(default)]
    pub text: String,
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub responded: bool,
}

impl Review {
    pub fn has_valid_rating(&self) -> bool {
        (1..=5).contains(&self.rating)
    }
}

/// Everything one successful fetch returned for a location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchedReviews {
    pub reviews: Vec<Review>,
    /// Listing-level rating the source advertises, if it showed one.
    pub provider_rating: Option<f64>,
    /// Listing-level review total the source advertises, if it showed one.
    pub provider_review_count: Option<u32>,
}

// --- Snapshots ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    NeverScraped,
    Ok,
    /// Retries exhausted; data from the last successful scrape is kept.
    FailedTemporary,
    /// The source reported the listing as gone; data from the last successful scrape is kept.
    FailedDefinitive,
}

impl std::fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeStatus::NeverScraped => write!(f, "never_scraped"),
            ScrapeStatus::Ok => write!(f, "ok"),
            ScrapeStatus::FailedTemporary => write!(f, "failed_temporary"),
            ScrapeStatus::FailedDefinitive => write!(f, "failed_definitive"),
        }
    }
}

/// Latest known review data and summary stats for one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSnapshot {
    pub location_id: String,
    /// Unique by `review_id`, newest first.
    pub reviews: Vec<Review>,
    /// Arithmetic mean of all review ratings, unrounded. `None` with no reviews.
    pub average_rating: Option<f64>,
    pub review_count: usize,
    #[serde(default)]
    pub provider_rating: Option<f64>,
    #[serde(default)]
    pub provider_review_count: Option<u32>,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub last_scrape_status: ScrapeStatus,
}

impl LocationSnapshot {
    pub fn empty(location_id: impl Into<String>) -> Self {
        Self {
            location_id: location_id.into(),
            reviews: Vec::new(),
            average_rating: None,
            review_count: 0,
            provider_rating: None,
            provider_review_count: None,
            last_scraped_at: None,
            last_scrape_status: ScrapeStatus::NeverScraped,
        }
    }
}

// --- Runs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NeverRun,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::CompletedWithErrors | RunState::Failed
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::NeverRun => write!(f, "never_run"),
            RunState::Running => write!(f, "running"),
            RunState::Completed => write!(f, "completed"),
            RunState::CompletedWithErrors => write!(f, "completed_with_errors"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    Transient,
    Definitive,
    Storage,
    Configuration,
    Timeout,
    Panicked,
}

/// One entry of a run's error summary. `location_id` is absent for errors
/// that hit the run as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub location_id: Option<String>,
    pub kind: RunErrorKind,
    pub message: String,
}

impl RunError {
    pub fn for_location(location_id: &str, kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            location_id: Some(location_id.to_string()),
            kind,
            message: message.into(),
        }
    }

    pub fn for_run(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            location_id: None,
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub run_id: Option<Uuid>,
    pub state: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub locations_total: usize,
    pub locations_done: usize,
    pub current_location_id: Option<String>,
    pub error_summary: Vec<RunError>,
}

impl RunProgress {
    pub fn never_run() -> Self {
        Self {
            run_id: None,
            state: RunState::NeverRun,
            started_at: None,
            finished_at: None,
            locations_total: 0,
            locations_done: 0,
            current_location_id: None,
            error_summary: Vec::new(),
        }
    }

    pub fn started(run_id: Uuid, locations_total: usize, now: DateTime<Utc>) -> Self {
        Self {
            run_id: Some(run_id),
            state: RunState::Running,
            started_at: Some(now),
            finished_at: None,
            locations_total,
            locations_done: 0,
            current_location_id: None,
            error_summary: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }
}

impl Default for RunProgress {
    fn default() -> Self {
        Self::never_run()
    }
}
