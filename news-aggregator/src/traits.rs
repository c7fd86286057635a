use crate::types::{RawArticle, Result, SourceCursor};
use async_trait::async_trait;

/// A named source of recent articles (RSS feed, scraper, ...).
#[async_trait]
pub trait PullFeed: Send + Sync {
    /// Name the source's cursor is stored under, e.g. `rnz_national`
    fn source_name(&self) -> &str;

    /// Entries the source currently offers. Implementations may use the cursor
    /// to skip older entries; the ingester applies the bound either way.
    async fn poll(&self, cursor: Option<&SourceCursor>) -> Result<Vec<RawArticle>>;
}

/// Fetches the raw markup behind an article URL.
#[async_trait]
pub trait HtmlFetch: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<String>;
}

/// What the analysis step sends to the provider for one article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub article_id: i64,
    pub headline: String,
    pub body: Option<String>,
}

impl AnalysisRequest {
    pub fn article_text(&self) -> String {
        let mut text = format!("Headline: {}\n\n", self.headline);
        match &self.body {
            Some(body) => text.push_str(&format!("Content: {}", body)),
            None => text.push_str("Content: [No content available - analyze headline only]"),
        }
        text
    }
}

/// An LLM provider constrained to answer with the analysis schema.
///
/// The response is returned as loosely-typed JSON; checking it against the
/// schema is the analysis engine's job.
#[async_trait]
pub trait StructuredAnalyzer: Send + Sync {
    fn provider_name(&self) -> &str;

    async fn analyze(&self, request: &AnalysisRequest) -> Result<serde_json::Value>;
}
