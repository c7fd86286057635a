use crate::extractor::ContentExtractor;
use crate::store::ArticleStore;
use crate::traits::HtmlFetch;
use crate::types::{AggregatorError, Article, Result, RunReport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(180);

/// Fills in `extracted_text` for articles that lack it. Articles that fail
/// keep no text and stay eligible, behind those not yet tried.
pub struct ContentPipeline {
    store: ArticleStore,
    fetcher: Arc<dyn HtmlFetch>,
    extractor: ContentExtractor,
    fetch_timeout: Duration,
}

impl ContentPipeline {
    pub fn new(store: ArticleStore, fetcher: Arc<dyn HtmlFetch>) -> Result<Self> {
        Ok(Self {
            store,
            fetcher,
            extractor: ContentExtractor::new()?,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        })
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Extracts up to `limit` articles, oldest fetch first.
    pub async fn run(&self, limit: Option<usize>) -> Result<RunReport> {
        let mut report = RunReport::start();
        let run_id = report.run_id;

        let articles = self.store.list_unextracted(limit).await?;
        info!("[{}] Extracting content for {} articles", run_id, articles.len());

        for article in articles {
            match self.extract_into_store(&article).await {
                Ok(chars) => {
                    debug!("[{}] Article {}: {} chars extracted", run_id, article.id, chars);
                    report.record_success();
                }
                Err(e) if e.is_fatal() => {
                    error!("[{}] Store failure during extraction: {}", run_id, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("[{}] Extraction failed for article {} ({}): {}", run_id, article.id, article.url, e);
                    self.store.record_extraction_failure(article.id, &e.to_string()).await?;
                    report.record_failure(article.id.to_string(), &e);
                }
            }
        }

        let report = report.finish();
        info!(
            "[{}] Extraction finished: {} succeeded, {} failed",
            run_id,
            report.succeeded,
            report.failed.len()
        );
        Ok(report)
    }

    /// Extracts a single article by id, whether or not it already has text.
    pub async fn extract_article(&self, id: i64) -> Result<Article> {
        let article = self
            .store
            .get_article(id)
            .await?
            .ok_or(AggregatorError::ArticleNotFound { id })?;

        self.extract_into_store(&article).await?;

        self.store
            .get_article(id)
            .await?
            .ok_or(AggregatorError::ArticleNotFound { id })
    }

    async fn extract_into_store(&self, article: &Article) -> Result<usize> {
        let html = match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch_html(&article.url)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AggregatorError::Timeout {
                    operation: format!("Fetching {}", article.url),
                    seconds: self.fetch_timeout.as_secs(),
                })
            }
        };

        let text = self.extractor.extract(&html)?;
        self.store.save_extracted_text(article.id, &text).await?;
        Ok(text.len())
    }
}
