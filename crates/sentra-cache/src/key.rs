//! Cache keys: `(namespace, symbol, time_bucket)`.

use std::fmt;

use chrono::{DateTime, Duration, DurationRound, Utc};

/// Data kind cached, each with its own bucket width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Fetched articles; intraday, 15-minute buckets.
    News,
    /// Per-symbol model results; intraday, 15-minute buckets.
    Analysis,
    /// End-of-day artifacts; one bucket per UTC day.
    Report,
}

impl Namespace {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::News => "news",
            Namespace::Analysis => "analysis",
            Namespace::Report => "report",
        }
    }

    #[must_use]
    pub fn bucket_width(self) -> Duration {
        match self {
            Namespace::News | Namespace::Analysis => Duration::minutes(15),
            Namespace::Report => Duration::days(1),
        }
    }

    /// Label of the bucket containing `at`: the bucket start in UTC.
    #[must_use]
    pub fn bucket_label(self, at: DateTime<Utc>) -> String {
        let start = at.duration_trunc(self.bucket_width()).unwrap_or(at);
        match self {
            Namespace::News | Namespace::Analysis => start.format("%Y%m%dT%H%M").to_string(),
            Namespace::Report => start.format("%Y%m%d").to_string(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: Namespace,
    symbol: String,
    bucket: String,
}

impl CacheKey {
    /// Key for `symbol` in the bucket of `namespace` that contains `at`.
    #[must_use]
    pub fn new(namespace: Namespace, symbol: &str, at: DateTime<Utc>) -> Self {
        Self {
            namespace,
            symbol: symbol.to_ascii_uppercase(),
            bucket: namespace.bucket_label(at),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.symbol, self.bucket)
    }
}
