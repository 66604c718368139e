//! News provider contract and its Google News RSS binding.
//!
//! Provider failures are ordinary input to the pipeline: callers treat an
//! error as zero articles and move on. Nothing here retries.

mod error;
mod google_rss;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sentra_core::Article;

pub use error::NewsError;
pub use google_rss::{parse_rss_items, GoogleNewsRss};

/// The publish-time window articles must fall in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewsWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl NewsWindow {
    /// The `hours` leading up to `now`.
    #[must_use]
    pub fn trailing_hours(hours: u32, now: DateTime<Utc>) -> Self {
        Self {
            start: now - Duration::hours(i64::from(hours)),
            end: now,
        }
    }

    /// Articles without a publish date are kept.
    #[must_use]
    pub fn admits(&self, article: &Article) -> bool {
        article
            .published_at
            .is_none_or(|at| at >= self.start && at <= self.end)
    }
}

#[async_trait]
pub trait NewsProvider: Send + Sync {
    /// Fetch recent articles about `symbol` published inside `window`.
    ///
    /// # Errors
    ///
    /// Returns [`NewsError`] when the provider cannot be reached or answers
    /// with something unparseable.
    async fn fetch_articles(
        &self,
        symbol: &str,
        window: NewsWindow,
    ) -> Result<Vec<Article>, NewsError>;
}
