use crate::fetcher::Fetcher;
use crate::sources::RssFeedSource;
use crate::traits::PullFeed;
use crate::types::{RawArticle, Result, SourceCursor};
use async_trait::async_trait;
use std::sync::Arc;

const RNZ_FEED_BASE: &str = "https://www.rnz.co.nz/rss";

/// Radio New Zealand feeds, one source per news section
pub struct RnzFeedSource {
    inner: RssFeedSource,
}

impl RnzFeedSource {
    /// `section` is the feed's file stem, e.g. `national` for `national.xml`
    pub fn section(section: &str, fetcher: Arc<Fetcher>) -> Result<Self> {
        let name = format!("rnz_{}", section);
        let url = Self::section_url(section);
        Self::with_url(name, url, fetcher)
    }

    pub fn with_url(name: String, url: String, fetcher: Arc<Fetcher>) -> Result<Self> {
        Ok(Self {
            inner: RssFeedSource::new(name, url, fetcher)?,
        })
    }

    pub fn section_url(section: &str) -> String {
        format!("{}/{}.xml", RNZ_FEED_BASE, section)
    }

    pub fn national(fetcher: Arc<Fetcher>) -> Result<Self> {
        Self::section("national", fetcher)
    }

    pub fn world(fetcher: Arc<Fetcher>) -> Result<Self> {
        Self::section("world", fetcher)
    }

    pub fn business(fetcher: Arc<Fetcher>) -> Result<Self> {
        Self::section("business", fetcher)
    }

    pub fn political(fetcher: Arc<Fetcher>) -> Result<Self> {
        Self::section("political", fetcher)
    }

    pub fn sport(fetcher: Arc<Fetcher>) -> Result<Self> {
        Self::section("sport", fetcher)
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }
}

#[async_trait]
impl PullFeed for RnzFeedSource {
    fn source_name(&self) -> &str {
        self.inner.source_name()
    }

    async fn poll(&self, cursor: Option<&SourceCursor>) -> Result<Vec<RawArticle>> {
        // Delegate to the inner RSS feed source
        self.inner.poll(cursor).await
    }
}
