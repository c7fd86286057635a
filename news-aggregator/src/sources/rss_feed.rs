use crate::fetcher::Fetcher;
use crate::parser::FeedParser;
use crate::traits::PullFeed;
use crate::types::{AggregatorError, RawArticle, Result, SourceCursor};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Generic RSS/Atom feed source
pub struct RssFeedSource {
    pub name: String,
    pub url: String,
    fetcher: Arc<Fetcher>,
}

impl RssFeedSource {
    pub fn new(name: String, url: String, fetcher: Arc<Fetcher>) -> Result<Self> {
        let parsed = Url::parse(&url)?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host().is_none() {
            return Err(AggregatorError::Config(format!(
                "Source {} has an unsupported feed url: {}",
                name, url
            )));
        }

        Ok(Self { name, url, fetcher })
    }
}

#[async_trait]
impl PullFeed for RssFeedSource {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn poll(&self, cursor: Option<&SourceCursor>) -> Result<Vec<RawArticle>> {
        info!("Polling RSS feed {}: {}", self.name, self.url);

        let fetched_at = Utc::now();
        let content = self.fetcher.fetch_text(&self.url).await?;
        let parsed_feed = FeedParser::parse_feed(&content, fetched_at)?;

        let mut entries = parsed_feed.entries;
        let offered = entries.len();
        entries.retain(|entry| entry.is_within(cursor));

        info!(
            "Feed {} offered {} entries, {} at or after the cursor",
            self.name,
            offered,
            entries.len()
        );
        Ok(entries)
    }
}
