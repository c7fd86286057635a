use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One entry as a source reports it, before the store has seen it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawArticle {
    pub url: String,
    pub headline: String,
    pub published_at: DateTime<Utc>,
    pub summary_content: Option<String>,
    /// False when the source gave no date and `published_at` is the fetch time.
    /// Undated entries never bound or move a cursor.
    #[serde(default = "dated_default")]
    pub dated: bool,
}

fn dated_default() -> bool {
    true
}

impl RawArticle {
    /// True when the entry is not older than the cursor's high-water mark.
    /// Entries sharing the high-water timestamp are kept, as are undated
    /// entries; the store dedups them.
    pub fn is_within(&self, cursor: Option<&SourceCursor>) -> bool {
        if !self.dated {
            return true;
        }
        match cursor.and_then(|c| c.last_seen_published_at) {
            Some(seen) => self.published_at >= seen,
            None => true,
        }
    }

    /// The timestamp this entry may advance a cursor to, if any.
    pub fn cursor_time(&self) -> Option<DateTime<Utc>> {
        self.dated.then_some(self.published_at)
    }

    pub fn into_candidate(self, source: &str, fetched_at: DateTime<Utc>) -> ArticleCandidate {
        ArticleCandidate {
            url: self.url,
            source: source.to_string(),
            headline: self.headline,
            published_at: self.published_at,
            fetched_at,
            summary_content: self.summary_content,
        }
    }
}

/// The pre-analysis shape handed to `upsert_article`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleCandidate {
    pub url: String,
    pub source: String,
    pub headline: String,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub summary_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub url: String,
    pub source: String,
    pub headline: String,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub summary_content: Option<String>,
    pub extracted_text: Option<String>,
    pub analysis: Option<AnalysisResult>,
    pub analysis_state: AnalysisState,
    /// Reason the last analysis attempt failed
    pub last_error: Option<String>,
    /// Reason the last page download or extraction failed
    pub extraction_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Article {
    pub fn is_analyzed(&self) -> bool {
        self.analysis.is_some()
    }

    /// Body text to analyze: extracted text when present, else the feed summary.
    pub fn body_text(&self) -> Option<&str> {
        [self.extracted_text.as_deref(), self.summary_content.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|text| !text.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    #[serde(alias = "headline-only")]
    HeadlineOnly,
    Clickthrough,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::HeadlineOnly => "headline_only",
            Classification::Clickthrough => "clickthrough",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "headline_only" | "headline-only" => Ok(Classification::HeadlineOnly),
            "clickthrough" => Ok(Classification::Clickthrough),
            other => Err(UnknownVariant {
                kind: "classification",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFact {
    pub fact: String,
    pub importance: u8,
}

/// Validated output of the analysis step, embedded in an `Article`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub key_facts: Vec<KeyFact>,
    pub relevance_score: u8,
    pub pr_probability: u8,
    pub classification: Classification,
    pub summary: String,
    pub reasoning: String,
    pub processed_at: DateTime<Utc>,
}

/// `failed` is not a stored state: a failed attempt goes back to `Unanalyzed`
/// with `last_error` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    Unanalyzed,
    Analyzing,
    Analyzed,
}

impl AnalysisState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisState::Unanalyzed => "unanalyzed",
            AnalysisState::Analyzing => "analyzing",
            AnalysisState::Analyzed => "analyzed",
        }
    }
}

impl fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unanalyzed" => Ok(AnalysisState::Unanalyzed),
            "analyzing" => Ok(AnalysisState::Analyzing),
            "analyzed" => Ok(AnalysisState::Analyzed),
            other => Err(UnknownVariant {
                kind: "analysis state",
                value: other.to_string(),
            }),
        }
    }
}

/// High-water mark for incremental polling of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCursor {
    pub source_name: String,
    pub last_polled_at: DateTime<Utc>,
    pub last_seen_published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleFilter {
    pub source: Option<String>,
    pub limit: Option<usize>,
    pub unanalyzed_only: bool,
    pub unextracted_only: bool,
}

impl ArticleFilter {
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn unanalyzed_only(mut self) -> Self {
        self.unanalyzed_only = true;
        self
    }

    pub fn unextracted_only(mut self) -> Self {
        self.unextracted_only = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}
