//! Snapshot store: latest review data per location.
//!
//! Reads are lock-free: `get_all()` hands out the current map behind an `Arc`
//! and every update swaps in a whole new map, so a reader never sees a
//! half-applied merge. Writers are serialized by `write_lock`. When a path is
//! configured, each update is persisted (temp file + rename) before it becomes
//! visible in memory.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use reviewwatch_common::error::Result;
use reviewwatch_common::{FetchedReviews, LocationSnapshot, ReviewWatchError, Review, ScrapeStatus};

pub type SnapshotMap = BTreeMap<String, LocationSnapshot>;

pub struct SnapshotStore {
    current: ArcSwap<SnapshotMap>,
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            current: ArcSwap::from_pointee(SnapshotMap::new()),
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Open the store persisted at `path`. A missing file means an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                ReviewWatchError::Storage(format!("cannot read {}: {e}", path.display()))
            })?;
            serde_json::from_str::<SnapshotMap>(&raw).map_err(|e| {
                ReviewWatchError::Storage(format!("corrupt snapshot file {}: {e}", path.display()))
            })?
        } else {
            SnapshotMap::new()
        };

        info!(
            path = %path.display(),
            locations = map.len(),
            "Snapshot store opened"
        );

        Ok(Self {
            current: ArcSwap::from_pointee(map),
            path: Some(path),
            write_lock: Mutex::new(()),
        })
    }

    /// Latest committed state of every location.
    pub fn get_all(&self) -> Arc<SnapshotMap> {
        self.current.load_full()
    }

    pub fn get(&self, location_id: &str) -> Option<LocationSnapshot> {
        self.current.load().get(location_id).cloned()
    }

    /// Fold a successful fetch into the location's snapshot and commit it.
    pub async fn merge(
        &self,
        location_id: &str,
        fetched: FetchedReviews,
        now: DateTime<Utc>,
    ) -> Result<LocationSnapshot> {
        let _guard = self.write_lock.lock().await;

        let current = self.current.load_full();
        let merged = merge_snapshot(current.get(location_id), location_id, fetched, now);

        let mut next = SnapshotMap::clone(&current);
        next.insert(location_id.to_string(), merged.clone());
        self.commit(next).await?;

        debug!(
            location = location_id,
            review_count = merged.review_count,
            "Snapshot merged"
        );
        Ok(merged)
    }

    /// Record a failed scrape. Review data and stats are left exactly as they were.
    pub async fn mark_failed(&self, location_id: &str, status: ScrapeStatus) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let current = self.current.load_full();
        let mut snapshot = current
            .get(location_id)
            .cloned()
            .unwrap_or_else(|| LocationSnapshot::empty(location_id));
        snapshot.last_scrape_status = status;

        let mut next = SnapshotMap::clone(&current);
        next.insert(location_id.to_string(), snapshot);
        self.commit(next).await
    }

    async fn commit(&self, next: SnapshotMap) -> Result<()> {
        if let Some(path) = &self.path {
            persist(path, &next).await?;
        }
        self.current.store(Arc::new(next));
        Ok(())
    }
}

async fn persist(path: &Path, map: &SnapshotMap) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(map)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await.map_err(|e| {
        ReviewWatchError::Storage(format!("cannot write {}: {e}", tmp.display()))
    })?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| {
        ReviewWatchError::Storage(format!("cannot replace {}: {e}", path.display()))
    })?;
    Ok(())
}

/// Union `fetched` into `previous` by `review_id` and recompute stats.
///
/// A review seen again replaces the stored copy (ratings get edited, owners
/// respond). Reviews outside 1..=5 stars are dropped. The average is the
/// unrounded arithmetic mean over every stored review; `responded` plays no
/// part in it.
pub fn merge_snapshot(
    previous: Option<&LocationSnapshot>,
    location_id: &str,
    fetched: FetchedReviews,
    now: DateTime<Utc>,
) -> LocationSnapshot {
    let mut by_id: HashMap<String, Review> = previous
        .map(|s| {
            s.reviews
                .iter()
                .map(|r| (r.review_id.clone(), r.clone()))
                .collect()
        })
        .unwrap_or_default();

    let mut dropped = 0usize;
    for review in fetched.reviews {
        if !review.has_valid_rating() || review.review_id.is_empty() {
            dropped += 1;
            continue;
        }
        by_id.insert(review.review_id.clone(), review);
    }
    if dropped > 0 {
        warn!(location = location_id, dropped, "Dropped malformed reviews");
    }

    let mut reviews: Vec<Review> = by_id.into_values().collect();
    // Newest first; undated reviews last; ties broken by id for a stable order.
    reviews.sort_by(|a, b| {
        b.posted_at
            .cmp(&a.posted_at)
            .then_with(|| a.review_id.cmp(&b.review_id))
    });

    let review_count = reviews.len();
    let average_rating = if review_count == 0 {
        None
    } else {
        let sum: u64 = reviews.iter().map(|r| u64::from(r.rating)).sum();
        Some(sum as f64 / review_count as f64)
    };

    let last_scraped_at = match previous.and_then(|s| s.last_scraped_at) {
        Some(prev) if prev > now => Some(prev),
        _ => Some(now),
    };

    LocationSnapshot {
        location_id: location_id.to_string(),
        reviews,
        average_rating,
        review_count,
        provider_rating: fetched
            .provider_rating
            .or_else(|| previous.and_then(|s| s.provider_rating)),
        provider_review_count: fetched
            .provider_review_count
            .or_else(|| previous.and_then(|s| s.provider_review_count)),
        last_scraped_at,
        last_scrape_status: ScrapeStatus::Ok,
    }
}
