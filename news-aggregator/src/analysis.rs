use crate::config::AnalysisConfig;
use crate::store::ArticleStore;
use crate::traits::{AnalysisRequest, StructuredAnalyzer};
use crate::types::{
    AggregatorError, AnalysisResult, Article, Classification, KeyFact, Result, RunReport,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_IMPORTANCE: i64 = 5;

/// Selection and behaviour for one analysis run.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub limit: Option<usize>,
    /// Process only this article, whatever its state
    pub article_id: Option<i64>,
    pub overwrite: bool,
}

/// Drives articles through `unanalyzed -> analyzing -> analyzed`.
///
/// Every attempt holds a per-article claim in the store, so runs with
/// `concurrency > 1` or several processes never analyze one article twice
/// at the same time.
pub struct AnalysisEngine {
    store: ArticleStore,
    analyzer: Arc<dyn StructuredAnalyzer>,
    claim_ttl: chrono::Duration,
    concurrency: usize,
    call_timeout: Duration,
}

impl AnalysisEngine {
    pub fn new(store: ArticleStore, analyzer: Arc<dyn StructuredAnalyzer>, config: &AnalysisConfig) -> Self {
        Self {
            store,
            analyzer,
            claim_ttl: chrono::Duration::seconds(config.claim_ttl_seconds as i64),
            concurrency: config.concurrency.max(1),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Unanalyzed articles oldest fetch first, or exactly the requested one.
    pub async fn select_candidates(&self, limit: Option<usize>, article_id: Option<i64>) -> Result<Vec<Article>> {
        match article_id {
            Some(id) => {
                let article = self
                    .store
                    .get_article(id)
                    .await?
                    .ok_or(AggregatorError::ArticleNotFound { id })?;
                Ok(vec![article])
            }
            None => self.store.list_unanalyzed(limit).await,
        }
    }

    /// Asks the provider about one article and validates the answer. Nothing
    /// is written to the store.
    pub async fn analyze(&self, article: &Article) -> Result<AnalysisResult> {
        let request = AnalysisRequest {
            article_id: article.id,
            headline: article.headline.clone(),
            body: article.body_text().map(str::to_string),
        };

        let response = match tokio::time::timeout(self.call_timeout, self.analyzer.analyze(&request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AggregatorError::Timeout {
                    operation: format!("Analysis of article {}", article.id),
                    seconds: self.call_timeout.as_secs(),
                })
            }
        };

        validate(&response, Utc::now())
    }

    /// Claims, analyzes and stores one article. An existing analysis is a
    /// `Conflict` unless `overwrite` is set, and the provider is not called.
    /// A result that arrives after the claim was taken over is dropped as
    /// `Claimed`.
    pub async fn process_article(&self, id: i64, overwrite: bool) -> Result<Article> {
        let article = self
            .store
            .get_article(id)
            .await?
            .ok_or(AggregatorError::ArticleNotFound { id })?;

        if article.is_analyzed() && !overwrite {
            return Err(AggregatorError::Conflict { id });
        }

        let token = self.store.claim_for_analysis(id, overwrite, self.claim_ttl).await?;

        let outcome = match self.analyze(&article).await {
            Ok(analysis) => self.store.complete_claim(id, token, &analysis).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(saved) => Ok(saved),
            Err(e) if e.is_fatal() => Err(e),
            Err(e @ AggregatorError::Claimed { .. }) => {
                warn!("Claim on article {} expired before the analysis was stored; result discarded", id);
                Err(e)
            }
            Err(e) => {
                self.store.release_claim(id, token, Some(&e.to_string())).await?;
                Err(e)
            }
        }
    }

    pub async fn run(&self, options: ProcessOptions) -> Result<RunReport> {
        let mut report = RunReport::start();
        let run_id = report.run_id;

        let candidates = match self.select_candidates(options.limit, options.article_id).await {
            Ok(candidates) => candidates,
            Err(AggregatorError::ArticleNotFound { id }) => {
                warn!("[{}] Article {} not found", run_id, id);
                report.record_failure(id.to_string(), &AggregatorError::ArticleNotFound { id });
                return Ok(report.finish());
            }
            Err(e) => return Err(e),
        };

        info!(
            "[{}] Analyzing {} articles with {} (concurrency {})",
            run_id,
            candidates.len(),
            self.analyzer.provider_name(),
            self.concurrency
        );

        let overwrite = options.overwrite;
        let mut results = stream::iter(candidates)
            .map(|article| async move {
                let result = self.process_article(article.id, overwrite).await;
                (article, result)
            })
            .buffer_unordered(self.concurrency);

        while let Some((article, result)) = results.next().await {
            let key = article.id.to_string();
            match result {
                Ok(saved) => {
                    if let Some(analysis) = &saved.analysis {
                        info!(
                            "[{}] Article {} analyzed: relevance {}, PR {}%, {}",
                            run_id, saved.id, analysis.relevance_score, analysis.pr_probability, analysis.classification
                        );
                    }
                    report.record_success();
                }
                Err(AggregatorError::Conflict { .. }) => {
                    debug!("[{}] Article {} already analyzed, skipping", run_id, article.id);
                    report.record_skip(key, "already analyzed; pass overwrite to replace");
                }
                Err(AggregatorError::Claimed { .. }) => {
                    debug!("[{}] Article {} is claimed elsewhere, skipping", run_id, article.id);
                    report.record_skip(key, "claimed by another worker");
                }
                Err(e) if e.is_fatal() => {
                    error!("[{}] Store failure during analysis: {}", run_id, e);
                    return Err(e);
                }
                Err(e @ AggregatorError::Validation(_)) => {
                    warn!(
                        "[{}] Provider response for article {} does not match the analysis schema (possible schema drift): {}",
                        run_id, article.id, e
                    );
                    report.record_failure(key, &e);
                }
                Err(e) => {
                    warn!("[{}] Analysis failed for article {}: {}", run_id, article.id, e);
                    report.record_failure(key, &e);
                }
            }
        }

        let report = report.finish();
        info!(
            "[{}] Analysis finished: {} succeeded, {} failed, {} skipped",
            run_id,
            report.succeeded,
            report.failed.len(),
            report.skipped.len()
        );
        Ok(report)
    }
}

/// Checks a provider response against the analysis shape.
///
/// Out-of-range scores are clamped and noted in `reasoning`; a missing
/// importance becomes 5. An unknown classification, a non-integer score or
/// a missing required field is a `Validation` error.
pub fn validate(response: &Value, processed_at: DateTime<Utc>) -> Result<AnalysisResult> {
    let object = response
        .as_object()
        .ok_or_else(|| AggregatorError::Validation("Response is not a JSON object".to_string()))?;

    let mut notes = Vec::new();

    let relevance_score = clamp_score(integer_field(object, "relevance_score")?, "relevance_score", 10, &mut notes);
    let pr_probability = clamp_score(integer_field(object, "pr_probability")?, "pr_probability", 100, &mut notes);

    let classification = match object
        .get("classification")
        .or_else(|| object.get("content_classification"))
    {
        Some(Value::String(raw)) => Classification::from_str(raw.trim())
            .map_err(|_| AggregatorError::Validation(format!("Unknown classification: {}", raw)))?,
        Some(other) => {
            return Err(AggregatorError::Validation(format!(
                "classification must be a string, got {}",
                other
            )))
        }
        None => return Err(AggregatorError::Validation("Missing field: classification".to_string())),
    };

    let key_facts = match object.get("key_facts") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(entries)) => entries
            .iter()
            .enumerate()
            .map(|(i, entry)| key_fact(i, entry, &mut notes))
            .collect::<Result<Vec<_>>>()?,
        Some(other) => {
            return Err(AggregatorError::Validation(format!(
                "key_facts must be an array, got {}",
                other
            )))
        }
    };

    let summary = string_field(object, "summary")?;
    let mut reasoning = string_field(object, "reasoning")?;

    if !notes.is_empty() {
        let annotation = notes.join(" ");
        reasoning = if reasoning.is_empty() {
            annotation
        } else {
            format!("{} {}", reasoning, annotation)
        };
    }

    Ok(AnalysisResult {
        key_facts,
        relevance_score,
        pr_probability,
        classification,
        summary,
        reasoning,
        processed_at,
    })
}

fn integer_field(object: &Map<String, Value>, name: &str) -> Result<i64> {
    match object.get(name) {
        Some(value) => value
            .as_i64()
            .ok_or_else(|| AggregatorError::Validation(format!("{} must be an integer, got {}", name, value))),
        None => Err(AggregatorError::Validation(format!("Missing field: {}", name))),
    }
}

fn string_field(object: &Map<String, Value>, name: &str) -> Result<String> {
    match object.get(name) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(other) => Err(AggregatorError::Validation(format!(
            "{} must be a string, got {}",
            name, other
        ))),
    }
}

fn clamp_score(value: i64, name: &str, max: i64, notes: &mut Vec<String>) -> u8 {
    let clamped = value.clamp(0, max);
    if clamped != value {
        notes.push(format!("[clamped {} from {} to {}]", name, value, clamped));
    }
    clamped as u8
}

fn key_fact(index: usize, entry: &Value, notes: &mut Vec<String>) -> Result<KeyFact> {
    let object = entry
        .as_object()
        .ok_or_else(|| AggregatorError::Validation(format!("key_facts[{}] is not an object", index)))?;

    let fact = match object.get("fact") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => {
            return Err(AggregatorError::Validation(format!(
                "key_facts[{}] has no fact text",
                index
            )))
        }
    };

    let importance = match object.get("importance") {
        None | Some(Value::Null) => DEFAULT_IMPORTANCE,
        Some(value) => value.as_i64().ok_or_else(|| {
            AggregatorError::Validation(format!(
                "key_facts[{}].importance must be an integer, got {}",
                index, value
            ))
        })?,
    };
    let importance = clamp_score(importance, &format!("key_facts[{}].importance", index), 10, notes);

    Ok(KeyFact { fact, importance })
}
