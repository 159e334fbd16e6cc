//! Dashboard aggregate over configured locations and their snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use reviewwatch_common::{Location, LocationSnapshot, Review, ScrapeStatus};

use crate::store::SnapshotMap;

const RECENT_PER_LOCATION: usize = 5;
const RECENT_LIMIT: usize = 20;
const NEEDS_RESPONSE_LIMIT: usize = 20;
const NEEDS_RESPONSE_MAX_RATING: u8 = 3;
const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_locations: usize,
    pub total_reviews: usize,
    /// Mean of the per-location averages, rounded to 2 decimals.
    pub average_rating: Option<f64>,
    pub rating_distribution: BTreeMap<String, usize>,
    pub locations: Vec<LocationSummary>,
    pub recent_reviews: Vec<ReviewEntry>,
    pub needs_response: Vec<ReviewEntry>,
    pub scraped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct LocationSummary {
    pub id: String,
    pub name: String,
    pub group: Option<String>,
    pub average_rating: Option<f64>,
    pub review_count: usize,
    pub provider_rating: Option<f64>,
    pub last_scrape_status: ScrapeStatus,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ReviewEntry {
    pub location_id: String,
    pub location_name: String,
    #[serde(flatten)]
    pub review: Review,
}

/// Every configured location appears in the summary, scraped or not.
/// Snapshots of locations no longer configured are ignored.
pub fn dashboard_stats(locations: &[Location], snapshots: &SnapshotMap) -> DashboardStats {
    let mut stats = DashboardStats {
        total_locations: locations.len(),
        total_reviews: 0,
        average_rating: None,
        rating_distribution: (1..=5).map(|r: u8| (r.to_string(), 0)).collect(),
        locations: Vec::with_capacity(locations.len()),
        recent_reviews: Vec::new(),
        needs_response: Vec::new(),
        scraped_at: None,
    };

    let mut averages = Vec::new();
    for location in locations {
        let snapshot = snapshots.get(&location.id);
        let reviews = snapshot.map(|s| s.reviews.as_slice()).unwrap_or_default();

        stats.total_reviews += reviews.len();
        if let Some(avg) = snapshot.and_then(|s| s.average_rating) {
            averages.push(avg);
        }
        if let Some(at) = snapshot.and_then(|s| s.last_scraped_at) {
            stats.scraped_at = stats.scraped_at.max(Some(at));
        }

        for review in reviews {
            if let Some(count) = stats.rating_distribution.get_mut(&review.rating.to_string()) {
                *count += 1;
            }
            if !review.responded && review.rating <= NEEDS_RESPONSE_MAX_RATING {
                stats.needs_response.push(entry(location, excerpt(review)));
            }
        }
        stats.recent_reviews.extend(
            reviews
                .iter()
                .take(RECENT_PER_LOCATION)
                .map(|r| entry(location, r.clone())),
        );

        stats.locations.push(summary(location, snapshot));
    }

    stats.average_rating = if averages.is_empty() {
        None
    } else {
        let mean = averages.iter().sum::<f64>() / averages.len() as f64;
        Some((mean * 100.0).round() / 100.0)
    };
    stats.recent_reviews.truncate(RECENT_LIMIT);
    stats.needs_response.truncate(NEEDS_RESPONSE_LIMIT);
    stats
}

fn summary(location: &Location, snapshot: Option<&LocationSnapshot>) -> LocationSummary {
    LocationSummary {
        id: location.id.clone(),
        name: location.display_name.clone(),
        group: location.group.clone(),
        average_rating: snapshot.and_then(|s| s.average_rating),
        review_count: snapshot.map(|s| s.review_count).unwrap_or(0),
        provider_rating: snapshot.and_then(|s| s.provider_rating),
        last_scrape_status: snapshot
            .map(|s| s.last_scrape_status)
            .unwrap_or(ScrapeStatus::NeverScraped),
        url: location.source_reference.clone(),
    }
}

fn entry(location: &Location, review: Review) -> ReviewEntry {
    ReviewEntry {
        location_id: location.id.clone(),
        location_name: location.display_name.clone(),
        review,
    }
}

fn excerpt(review: &Review) -> Review {
    Review {
        text: review.text.chars().take(EXCERPT_CHARS).collect(),
        ..review.clone()
    }
}
