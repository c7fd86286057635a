pub mod rnz_feed;
pub mod rss_feed;

pub use rnz_feed::RnzFeedSource;
pub use rss_feed::RssFeedSource;

use crate::config::{SourceConfig, SourceKind};
use crate::fetcher::Fetcher;
use crate::traits::PullFeed;
use crate::types::{AggregatorError, RawArticle, Result, SourceCursor};
use async_trait::async_trait;
use std::sync::Arc;

/// The closed set of source variants, dispatched by configured kind.
pub enum FeedSource {
    Rss(RssFeedSource),
    Rnz(RnzFeedSource),
}

impl FeedSource {
    pub fn from_config(config: &SourceConfig, fetcher: Arc<Fetcher>) -> Result<Self> {
        match config.kind {
            SourceKind::Rss => {
                let url = config.url.clone().ok_or_else(|| {
                    AggregatorError::Config(format!("Source {} needs a url", config.name))
                })?;
                Ok(FeedSource::Rss(RssFeedSource::new(config.name.clone(), url, fetcher)?))
            }
            SourceKind::Rnz => {
                let source = match &config.url {
                    Some(url) => RnzFeedSource::with_url(config.name.clone(), url.clone(), fetcher)?,
                    None => {
                        let section = config.name.strip_prefix("rnz_").ok_or_else(|| {
                            AggregatorError::Config(format!(
                                "RNZ source {} needs a url or a name of the form rnz_<section>",
                                config.name
                            ))
                        })?;
                        RnzFeedSource::section(section, fetcher)?
                    }
                };
                Ok(FeedSource::Rnz(source))
            }
        }
    }
}

#[async_trait]
impl PullFeed for FeedSource {
    fn source_name(&self) -> &str {
        match self {
            FeedSource::Rss(source) => source.source_name(),
            FeedSource::Rnz(source) => source.source_name(),
        }
    }

    async fn poll(&self, cursor: Option<&SourceCursor>) -> Result<Vec<RawArticle>> {
        match self {
            FeedSource::Rss(source) => source.poll(cursor).await,
            FeedSource::Rnz(source) => source.poll(cursor).await,
        }
    }
}
