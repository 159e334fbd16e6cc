//! Review fetcher backed by Browserless.
//!
//! The listing page is rendered remotely and review blocks are picked out of
//! the resulting HTML by their `data-review-id` markers. Extraction is
//! best-effort: a block without a readable star rating is skipped.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use browserless_client::{BrowserlessClient, BrowserlessError};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use tracing::{info, warn};

use reviewwatch_common::{FetchedReviews, Location, Review};

use crate::fetcher::{FetchError, ReviewFetcher};

/// Reviews kept per fetch; the page lazily loads more than anyone reads.
const MAX_REVIEWS: usize = 50;

static RE_REVIEW_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-review-id="([^"]+)""#).unwrap());
static RE_AUTHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"class="d4r55[^"]*"[^>]*>\s*([^<]+?)\s*<"#).unwrap());
static RE_STARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)aria-label="\s*([1-5])\s+stars?"#).unwrap());
static RE_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"class="wiI7pd[^"]*"[^>]*>([^<]*)<"#).unwrap());
static RE_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"class="rsqaWe[^"]*"[^>]*>\s*([^<]+?)\s*<"#).unwrap());
static RE_OWNER_RESPONSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)class="CDe7pd|response from the owner"#).unwrap());
static RE_LISTING_RATING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\d[.,]\d)\s*stars"#).unwrap());
static RE_LISTING_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)(\d[\d,]*)\s+reviews"#).unwrap());
static RE_RELATIVE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^(?:edited\s+)?(a|an|\d+)\s+(minute|hour|day|week|month|year)s?\s+ago$"#)
        .unwrap()
});

pub struct BrowserlessReviewFetcher {
    client: BrowserlessClient,
}

impl BrowserlessReviewFetcher {
    pub fn new(client: BrowserlessClient) -> Self {
        info!(base_url = client.base_url(), "Using BrowserlessReviewFetcher");
        Self { client }
    }
}

#[async_trait]
impl ReviewFetcher for BrowserlessReviewFetcher {
    async fn fetch(&self, location: &Location) -> Result<FetchedReviews, FetchError> {
        let url = location.source_reference.as_str();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(FetchError::Definitive(format!(
                "source reference is not an http(s) URL: {url}"
            )));
        }

        info!(location = location.id.as_str(), url, "Loading listing");
        let html = self.client.content(url).await.map_err(classify)?;
        if html.trim().is_empty() {
            return Err(FetchError::Transient("renderer returned an empty DOM".to_string()));
        }

        let fetched = parse_listing(&html, Utc::now());
        if fetched.reviews.is_empty() {
            warn!(location = location.id.as_str(), "No review blocks found on listing page");
        }
        info!(
            location = location.id.as_str(),
            reviews = fetched.reviews.len(),
            provider_rating = ?fetched.provider_rating,
            provider_review_count = ?fetched.provider_review_count,
            "Extracted reviews"
        );
        Ok(fetched)
    }

    fn name(&self) -> &str {
        "browserless"
    }
}

fn classify(err: BrowserlessError) -> FetchError {
    if err.is_not_found() {
        FetchError::Definitive(format!("listing no longer exists: {err}"))
    } else if err.is_retryable() {
        FetchError::Transient(err.to_string())
    } else {
        FetchError::Definitive(err.to_string())
    }
}

/// Extract listing totals and review blocks from rendered listing HTML.
pub fn parse_listing(html: &str, now: DateTime<Utc>) -> FetchedReviews {
    let provider_rating = RE_LISTING_RATING
        .captures(html)
        .and_then(|c| c[1].replace(',', ".").parse::<f64>().ok());
    let provider_review_count = RE_LISTING_COUNT
        .captures(html)
        .and_then(|c| c[1].replace(',', "").parse::<u32>().ok());

    // A review's id is repeated on nested elements (buttons, photos). Each
    // block runs from the first marker of an id to the next marker of a
    // different id.
    let mut blocks: Vec<(String, usize, usize)> = Vec::new();
    for cap in RE_REVIEW_ID.captures_iter(html) {
        let (Some(whole), Some(id)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        if let Some(last) = blocks.last_mut() {
            if last.0 == id.as_str() {
                continue;
            }
            last.2 = whole.start();
        }
        blocks.push((id.as_str().to_string(), whole.start(), html.len()));
    }

    let mut seen = HashSet::new();
    let mut reviews = Vec::new();
    for (id, start, end) in blocks {
        if reviews.len() >= MAX_REVIEWS {
            break;
        }
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(review) = parse_review_block(&id, &html[start..end], now) {
            reviews.push(review);
        }
    }

    FetchedReviews {
        reviews,
        provider_rating,
        provider_review_count,
    }
}

fn parse_review_block(id: &str, block: &str, now: DateTime<Utc>) -> Option<Review> {
    let rating = RE_STARS.captures(block)?[1].parse::<u8>().ok()?;
    let author = RE_AUTHOR
        .captures(block)
        .map(|c| decode_entities(c[1].lines().next().unwrap_or_default().trim()));
    let text = RE_TEXT
        .captures(block)
        .map(|c| decode_entities(c[1].trim()))
        .unwrap_or_default();

    if author.is_none() && text.is_empty() {
        return None;
    }

    Some(Review {
        review_id: id.to_string(),
        rating,
        author: author.unwrap_or_else(|| "Anonymous".to_string()),
        text,
        posted_at: RE_DATE
            .captures(block)
            .and_then(|c| parse_relative_date(&c[1], now)),
        responded: RE_OWNER_RESPONSE.is_match(block),
    })
}

/// "3 weeks ago" -> now - 21 days. Months count as 30 days, years as 365.
pub fn parse_relative_date(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let cap = RE_RELATIVE_DATE.captures(raw.trim())?;
    let amount: i64 = match cap[1].to_ascii_lowercase().as_str() {
        "a" | "an" => 1,
        n => n.parse().ok()?,
    };
    // Scraped text is untrusted; out-of-range amounts yield None.
    let span = match cap[2].to_ascii_lowercase().as_str() {
        "minute" => Duration::try_minutes(amount)?,
        "hour" => Duration::try_hours(amount)?,
        "day" => Duration::try_days(amount)?,
        "week" => Duration::try_weeks(amount)?,
        "month" => Duration::try_days(amount.checked_mul(30)?)?,
        "year" => Duration::try_days(amount.checked_mul(365)?)?,
        _ => return None,
    };
    now.checked_sub_signed(span)
}

fn decode_entities(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
