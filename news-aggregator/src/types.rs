use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
// Use the interfaces crate for the shared data model
pub use interfaces::defs::{
    AnalysisResult, AnalysisState, Article, ArticleCandidate, ArticleFilter, Classification,
    KeyFact, RawArticle, SourceCursor,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub min_host_interval_ms: u64,
    pub max_body_size_mb: usize,
    pub max_redirects: usize,
    /// Upper bound on one whole poll or page fetch, retries included
    pub operation_timeout_seconds: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (compatible; NewsAggregator/1.0)".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 2,
            min_host_interval_ms: 1000,
            max_body_size_mb: 10,
            max_redirects: 5,
            operation_timeout_seconds: 180,
        }
    }
}

/// Outcome of `upsert_article`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Refreshed,
    Unchanged,
}

impl UpsertOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted)
    }
}

/// Coarse failure category carried on a run report, one per error family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SourceFetch,
    Extraction,
    Fetch,
    AnalysisProvider,
    Validation,
    Conflict,
    Timeout,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFailure {
    pub key: String,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSkip {
    pub key: String,
    pub reason: String,
}

/// Per-source counters for an ingestion run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceTally {
    pub source: String,
    pub polled: usize,
    pub new: usize,
    pub refreshed: usize,
    pub unchanged: usize,
}

/// Summary of one ingestion, extraction or analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub succeeded: usize,
    pub failed: Vec<ItemFailure>,
    pub skipped: Vec<ItemSkip>,
    pub sources: Vec<SourceTally>,
}

impl RunReport {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            succeeded: 0,
            failed: Vec::new(),
            skipped: Vec::new(),
            sources: Vec::new(),
        }
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, key: impl Into<String>, error: &AggregatorError) {
        self.failed.push(ItemFailure {
            key: key.into(),
            kind: error.kind(),
            reason: error.to_string(),
        });
    }

    pub fn record_skip(&mut self, key: impl Into<String>, reason: impl Into<String>) {
        self.skipped.push(ItemSkip {
            key: key.into(),
            reason: reason.into(),
        });
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("Source {source_name} failed: {reason}")]
    SourceFetch { source_name: String, reason: String },

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Fetch error for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Analysis provider error: {0}")]
    AnalysisProvider(String),

    #[error("Rate limited by analysis provider (retry after {retry_after_seconds:?}s)")]
    RateLimited { retry_after_seconds: Option<u64> },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Article {id} already has an analysis")]
    Conflict { id: i64 },

    #[error("Article {id} is being analyzed by another worker")]
    Claimed { id: i64 },

    #[error("Article not found: {id}")]
    ArticleNotFound { id: i64 },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AggregatorError {
    /// Store-connectivity failures end the whole run; everything else is per item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AggregatorError::Database(_) | AggregatorError::Migration(_))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            AggregatorError::SourceFetch { .. } | AggregatorError::Parse(_) => FailureKind::SourceFetch,
            AggregatorError::Extraction(_) => FailureKind::Extraction,
            AggregatorError::Fetch { .. } | AggregatorError::Http(_) | AggregatorError::InvalidUrl(_) => {
                FailureKind::Fetch
            }
            AggregatorError::AnalysisProvider(_) | AggregatorError::RateLimited { .. } => {
                FailureKind::AnalysisProvider
            }
            AggregatorError::Validation(_) | AggregatorError::Serialization(_) => FailureKind::Validation,
            AggregatorError::Conflict { .. } | AggregatorError::Claimed { .. } => FailureKind::Conflict,
            AggregatorError::Timeout { .. } => FailureKind::Timeout,
            _ => FailureKind::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
