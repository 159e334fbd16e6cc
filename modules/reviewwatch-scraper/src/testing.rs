// Test mocks for the scrape orchestration.
//
// - MockFetcher (ReviewFetcher): scripted per-location responses, call counting,
//   optional gate so a test can hold a run open while it inspects status.
// - StaticLocations / GatedLocations / BrokenLocations (LocationSource).
//
// Plus small constructors for Location and Review.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use reviewwatch_common::error::Result;
use reviewwatch_common::{FetchedReviews, Location, LocationSource, Review, ReviewWatchError};

use crate::fetcher::{FetchError, ReviewFetcher};
use crate::job::RunPolicy;

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

pub fn location(id: &str) -> Location {
    Location {
        id: id.to_string(),
        display_name: format!("Location {id}"),
        group: None,
        source_reference: format!("https://maps.example/{id}"),
    }
}

pub fn review(id: &str, rating: u8) -> Review {
    Review {
        review_id: id.to_string(),
        rating,
        author: format!("author-{id}"),
        text: format!("review text {id}"),
        posted_at: None,
        responded: false,
    }
}

/// Run policy with no waiting anywhere, for tests.
pub fn fast_policy() -> RunPolicy {
    RunPolicy {
        fetch_timeout: Duration::from_secs(5),
        max_retries: 2,
        retry_base: Duration::ZERO,
        location_pause: Duration::ZERO,
        run_timeout: Duration::from_secs(30),
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum MockResponse {
    Reviews(FetchedReviews),
    Transient,
    Definitive,
    /// Never returns; exercises timeouts.
    Hang,
    Panic,
}

/// Scripted fetcher. Each location has a queue of responses consumed one per
/// attempt; the last response repeats. Unregistered locations fail transiently.
pub struct MockFetcher {
    scripts: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    calls: Mutex<HashMap<String, u32>>,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            gate: None,
        }
    }

    pub fn on_sequence(self, location_id: &str, responses: Vec<MockResponse>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(location_id.to_string(), responses.into());
        self
    }

    pub fn on_reviews(self, location_id: &str, reviews: Vec<Review>) -> Self {
        let fetched = FetchedReviews {
            reviews,
            provider_rating: None,
            provider_review_count: None,
        };
        self.on_sequence(location_id, vec![MockResponse::Reviews(fetched)])
    }

    pub fn on_transient(self, location_id: &str) -> Self {
        self.on_sequence(location_id, vec![MockResponse::Transient])
    }

    pub fn on_definitive(self, location_id: &str) -> Self {
        self.on_sequence(location_id, vec![MockResponse::Definitive])
    }

    pub fn on_hang(self, location_id: &str) -> Self {
        self.on_sequence(location_id, vec![MockResponse::Hang])
    }

    pub fn on_panic(self, location_id: &str) -> Self {
        self.on_sequence(location_id, vec![MockResponse::Panic])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every fetch waits for a permit from `gate` before answering.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self, location_id: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(location_id)
            .copied()
            .unwrap_or(0)
    }

    fn next_response(&self, location_id: &str) -> Option<MockResponse> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(location_id.to_string())
            .or_default() += 1;

        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.get_mut(location_id)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReviewFetcher for MockFetcher {
    async fn fetch(&self, location: &Location) -> std::result::Result<FetchedReviews, FetchError> {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.next_response(&location.id) {
            Some(MockResponse::Reviews(fetched)) => Ok(fetched),
            Some(MockResponse::Transient) => Err(FetchError::Transient(format!(
                "MockFetcher: connection reset for {}",
                location.id
            ))),
            Some(MockResponse::Definitive) => Err(FetchError::Definitive(format!(
                "MockFetcher: listing {} not found",
                location.id
            ))),
            Some(MockResponse::Hang) => std::future::pending().await,
            Some(MockResponse::Panic) => panic!("MockFetcher: scripted panic for {}", location.id),
            None => Err(FetchError::Transient(format!(
                "MockFetcher: no response registered for {}",
                location.id
            ))),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Location sources
// ---------------------------------------------------------------------------

pub struct StaticLocations(pub Vec<Location>);

impl StaticLocations {
    pub fn of(ids: &[&str]) -> Self {
        Self(ids.iter().map(|id| location(id)).collect())
    }
}

#[async_trait]
impl LocationSource for StaticLocations {
    async fn load(&self) -> Result<Vec<Location>> {
        Ok(self.0.clone())
    }
}

/// Answers only after taking a permit from `gate`, so a test can hold a run
/// while its configuration is still loading.
pub struct GatedLocations {
    locations: Vec<Location>,
    gate: Arc<Semaphore>,
}

impl GatedLocations {
    pub fn of(ids: &[&str], gate: Arc<Semaphore>) -> Self {
        Self {
            locations: ids.iter().map(|id| location(id)).collect(),
            gate,
        }
    }
}

#[async_trait]
impl LocationSource for GatedLocations {
    async fn load(&self) -> Result<Vec<Location>> {
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        Ok(self.locations.clone())
    }
}

pub struct BrokenLocations;

#[async_trait]
impl LocationSource for BrokenLocations {
    async fn load(&self) -> Result<Vec<Location>> {
        Err(ReviewWatchError::Config(
            "cannot read location configuration: permission denied".to_string(),
        ))
    }
}
