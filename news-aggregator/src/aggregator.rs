use crate::store::ArticleStore;
use crate::traits::PullFeed;
use crate::types::{AggregatorError, Result, RunReport, SourceTally, UpsertOutcome};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(180);

/// Polls every configured source and upserts what it finds. One source
/// failing never stops the others; only store failures end the run.
pub struct Ingester {
    store: ArticleStore,
    sources: Vec<Box<dyn PullFeed>>,
    poll_timeout: Duration,
}

impl Ingester {
    pub fn new(store: ArticleStore, sources: Vec<Box<dyn PullFeed>>) -> Self {
        Self {
            store,
            sources,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.source_name()).collect()
    }

    pub async fn run(&self) -> Result<RunReport> {
        self.run_filtered(None).await
    }

    /// Ingests a single named source.
    pub async fn run_source(&self, source_name: &str) -> Result<RunReport> {
        if !self.sources.iter().any(|s| s.source_name() == source_name) {
            return Err(AggregatorError::Config(format!("Unknown source: {}", source_name)));
        }
        self.run_filtered(Some(source_name)).await
    }

    async fn run_filtered(&self, only: Option<&str>) -> Result<RunReport> {
        let mut report = RunReport::start();
        let run_id = report.run_id;

        let selected: Vec<&dyn PullFeed> = self
            .sources
            .iter()
            .map(|s| s.as_ref())
            .filter(|s| only.map_or(true, |name| s.source_name() == name))
            .collect();

        info!("[{}] Ingesting {} sources", run_id, selected.len());

        for source in selected {
            let name = source.source_name().to_string();

            match self.ingest_source(source, run_id).await {
                Ok(tally) => {
                    report.record_success();
                    report.sources.push(tally);
                }
                Err(e) if e.is_fatal() => {
                    error!("[{}] Store failure while ingesting {}: {}", run_id, name, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("[{}] Source {} failed, cursor left in place: {}", run_id, name, e);
                    report.record_failure(name, &e);
                }
            }
        }

        let report = report.finish();
        let new_articles: usize = report.sources.iter().map(|t| t.new).sum();
        info!(
            "[{}] Ingestion finished: {} sources ok, {} failed, {} new articles",
            run_id,
            report.succeeded,
            report.failed.len(),
            new_articles
        );
        Ok(report)
    }

    /// Polls one source, then upserts its entries oldest first. The cursor
    /// moves past an entry only once that entry is stored.
    pub async fn ingest_source(&self, source: &dyn PullFeed, run_id: Uuid) -> Result<SourceTally> {
        let name = source.source_name();
        let cursor = self.store.get_cursor(name).await?;
        let polled_at = Utc::now();

        debug!(
            "[{}] Polling {} from {:?}",
            run_id,
            name,
            cursor.as_ref().and_then(|c| c.last_seen_published_at)
        );

        let mut entries = match tokio::time::timeout(self.poll_timeout, source.poll(cursor.as_ref())).await {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                return Err(match e {
                    AggregatorError::SourceFetch { .. } => e,
                    e if e.is_fatal() => e,
                    e => AggregatorError::SourceFetch {
                        source_name: name.to_string(),
                        reason: e.to_string(),
                    },
                })
            }
            Err(_) => {
                return Err(AggregatorError::Timeout {
                    operation: format!("Polling {}", name),
                    seconds: self.poll_timeout.as_secs(),
                })
            }
        };

        let polled = entries.len();
        entries.retain(|entry| entry.is_within(cursor.as_ref()));
        entries.sort_by_key(|entry| entry.published_at);

        let mut tally = SourceTally {
            source: name.to_string(),
            polled,
            ..Default::default()
        };

        if entries.is_empty() {
            self.store.advance_cursor(name, polled_at, None).await?;
        }

        for entry in entries {
            let cursor_time = entry.cursor_time();
            let candidate = entry.into_candidate(name, polled_at);
            let (article, outcome) = self.store.upsert_article(&candidate).await?;

            match outcome {
                UpsertOutcome::Inserted => tally.new += 1,
                UpsertOutcome::Refreshed => tally.refreshed += 1,
                UpsertOutcome::Unchanged => tally.unchanged += 1,
            }
            debug!("[{}] {} -> article {} ({:?})", run_id, article.url, article.id, outcome);

            self.store.advance_cursor(name, polled_at, cursor_time).await?;
        }

        info!(
            "[{}] Source {}: {} polled, {} new, {} refreshed, {} unchanged",
            run_id, name, tally.polled, tally.new, tally.refreshed, tally.unchanged
        );
        Ok(tally)
    }
}
