//! Google News RSS provider.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use sentra_core::Article;
use sha2::{Digest, Sha256};

use crate::{NewsError, NewsProvider, NewsWindow};

const DEFAULT_BASE_URL: &str = "https://news.google.com";
const MAX_ARTICLES: usize = 25;
const FALLBACK_SOURCE: &str = "google_news";

/// Searches Google News for `"{SYMBOL} stock"` and returns up to 25
/// articles inside the requested window.
#[derive(Debug, Clone)]
pub struct GoogleNewsRss {
    client: Client,
    base_url: String,
}

impl GoogleNewsRss {
    /// # Errors
    ///
    /// Returns [`NewsError::Http`] if the underlying `reqwest::Client` cannot
    /// be constructed.
    pub fn new() -> Result<Self, NewsError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Creates a provider with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`NewsError::Http`] if the underlying `reqwest::Client` cannot
    /// be constructed.
    pub fn with_base_url(base_url: &str) -> Result<Self, NewsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("sentra/0.1 (sentiment-reports)")
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn search_url(&self, symbol: &str) -> String {
        let query = format!("{symbol} stock");
        let encoded = utf8_percent_encode(&query, NON_ALPHANUMERIC).to_string();
        format!(
            "{}/rss/search?q={encoded}&hl=en-US&gl=US&ceid=US:en",
            self.base_url
        )
    }
}

#[async_trait]
impl NewsProvider for GoogleNewsRss {
    async fn fetch_articles(
        &self,
        symbol: &str,
        window: NewsWindow,
    ) -> Result<Vec<Article>, NewsError> {
        let response = self.client.get(self.search_url(symbol)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NewsError::Status(status.as_u16()));
        }
        let body = response.text().await?;

        let articles: Vec<Article> = parse_rss_items(&body)?
            .into_iter()
            .filter(|article| window.admits(article))
            .take(MAX_ARTICLES)
            .collect();

        tracing::debug!(symbol, count = articles.len(), "fetched news articles");
        Ok(articles)
    }
}

#[derive(Default)]
struct ItemFields {
    title: String,
    link: String,
    description: String,
    pub_date: String,
    source: String,
}

impl ItemFields {
    fn into_article(self) -> Option<Article> {
        if self.title.is_empty() || self.link.is_empty() {
            return None;
        }
        let published_at = DateTime::parse_from_rfc2822(self.pub_date.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
        let source = if self.source.is_empty() {
            FALLBACK_SOURCE.to_string()
        } else {
            self.source
        };
        Some(Article {
            title: self.title,
            url: self.link,
            summary: self.description,
            published_at,
            source,
        })
    }

    fn set(&mut self, tag: &str, text: String) {
        match tag {
            "title" => self.title = text,
            "link" => self.link = text,
            "description" => self.description = strip_html(&text),
            "pubDate" => self.pub_date = text,
            "source" => self.source = text,
            _ => {}
        }
    }
}

/// Parse an RSS feed body into articles, dropping repeated links.
///
/// Items missing a title or link are skipped.
///
/// # Errors
///
/// Returns [`NewsError::Xml`] if the XML is malformed.
pub fn parse_rss_items(xml: &str) -> Result<Vec<Article>, NewsError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut articles = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut current: Option<ItemFields> = None;
    let mut current_tag = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = std::str::from_utf8(e.name().as_ref())
                    .unwrap_or("")
                    .to_string();
                if name == "item" {
                    current = Some(ItemFields::default());
                }
                current_tag = name;
            }
            Ok(Event::End(e)) => {
                let raw = e.name();
                let name = std::str::from_utf8(raw.as_ref()).unwrap_or("");
                if name == "item" {
                    if let Some(article) = current.take().and_then(ItemFields::into_article) {
                        if seen.insert(article_id(&article.url)) {
                            articles.push(article);
                        }
                    }
                }
                current_tag.clear();
            }
            Ok(Event::Text(e)) => {
                if let Some(fields) = current.as_mut() {
                    let text = e.unescape().unwrap_or_default().into_owned();
                    fields.set(&current_tag, text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(fields) = current.as_mut() {
                    let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                    fields.set(&current_tag, text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(NewsError::Xml(e)),
            _ => {}
        }
    }

    Ok(articles)
}

/// Stable identifier for an article: hex SHA-256 of its URL.
fn article_id(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.trim().as_bytes()))
}

/// Strip HTML tags from a string and normalize whitespace.
fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>"AAPL stock" - Google News</title>
    <item>
      <title>Apple shares climb after earnings beat</title>
      <link>https://example.com/aapl-beat</link>
      <pubDate>Mon, 02 Mar 2026 14:05:00 GMT</pubDate>
      <description><![CDATA[<a href="https://example.com/aapl-beat">Apple shares climb</a>&nbsp;<font>Example Wire</font>]]></description>
      <source url="https://example.com">Example Wire</source>
    </item>
    <item>
      <title>Apple shares climb after earnings beat</title>
      <link>https://example.com/aapl-beat</link>
      <description>duplicate</description>
    </item>
    <item>
      <title>Analysts weigh iPhone demand</title>
      <link>https://example.com/iphone</link>
      <description>Mixed signals from suppliers.</description>
    </item>
    <item>
      <title>No link here</title>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_items_and_drops_duplicates() {
        let articles = parse_rss_items(SAMPLE_RSS).expect("should parse valid RSS");
        assert_eq!(articles.len(), 2, "got {articles:?}");

        let first = &articles[0];
        assert_eq!(first.title, "Apple shares climb after earnings beat");
        assert_eq!(first.source, "Example Wire");
        assert_eq!(
            first.published_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 14, 5, 0).unwrap())
        );
        assert!(!first.summary.contains('<'));

        let second = &articles[1];
        assert_eq!(second.source, FALLBACK_SOURCE);
        assert!(second.published_at.is_none());
        assert_eq!(second.summary, "Mixed signals from suppliers.");
    }

    #[test]
    fn empty_feed_returns_empty_vec() {
        let xml = r#"<?xml version="1.0"?><rss version="2.0"><channel></channel></rss>"#;
        let articles = parse_rss_items(xml).expect("should parse empty RSS");
        assert!(articles.is_empty());
    }

    #[test]
    fn malformed_xml_yields_no_articles_or_error() {
        let xml = "<rss><channel><item><title>Unclosed";
        match parse_rss_items(xml) {
            Ok(articles) => assert!(articles.is_empty()),
            Err(NewsError::Xml(_)) => {}
            Err(e) => panic!("unexpected error type: {e}"),
        }
    }

    #[test]
    fn search_url_encodes_query() {
        let provider = GoogleNewsRss::with_base_url("http://localhost:9999/").unwrap();
        assert_eq!(
            provider.search_url("BRK.B"),
            "http://localhost:9999/rss/search?q=BRK%2EB%20stock&hl=en-US&gl=US&ceid=US:en"
        );
    }

    #[test]
    fn article_id_is_stable_hex() {
        let id = article_id("https://example.com/a");
        assert_eq!(id.len(), 64);
        assert_eq!(id, article_id(" https://example.com/a "));
    }
}
