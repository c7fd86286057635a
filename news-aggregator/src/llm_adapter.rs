use crate::config::LlmConfig;
use crate::traits::{AnalysisRequest, StructuredAnalyzer};
use crate::types::{AggregatorError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are an expert news analyst specializing in New Zealand media. \
You provide objective, structured analysis of news articles.";

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    strict: bool,
    schema: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// JSON schema the provider is held to. Range checks are left to the
/// analysis engine, which clamps rather than rejects.
pub fn analysis_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "key_facts": {
                "type": "array",
                "description": "Key facts and statistics from the article",
                "items": {
                    "type": "object",
                    "properties": {
                        "fact": { "type": "string" },
                        "importance": { "type": "integer", "description": "Importance score from 1-10" }
                    },
                    "required": ["fact", "importance"],
                    "additionalProperties": false
                }
            },
            "relevance_score": {
                "type": "integer",
                "description": "Relevance score for New Zealand news interests (0-10)"
            },
            "pr_probability": {
                "type": "integer",
                "description": "Probability (0-100) that this was planted by PR/communications"
            },
            "classification": {
                "type": "string",
                "enum": ["headline_only", "clickthrough"]
            },
            "summary": { "type": "string", "description": "Brief one-sentence summary" },
            "reasoning": { "type": "string", "description": "Brief explanation of the PR probability assessment" }
        },
        "required": ["key_facts", "relevance_score", "pr_probability", "classification", "summary", "reasoning"],
        "additionalProperties": false
    })
}

pub fn user_prompt(article_text: &str) -> String {
    format!(
        r#"Analyze this New Zealand news article and provide structured analysis.

{}

Please provide:
1. Key facts and statistics with importance scores (1-10)
2. Relevance score (0-10) for general New Zealand news interests
3. PR probability (0-100) - likelihood this was planted by PR/communications teams. Consider:
   - Generic corporate announcements
   - Overly promotional language
   - Lack of critical perspective
   - Focus on company/organization success without context
4. Content classification:
   - "headline_only" if the headline alone conveys the key information
   - "clickthrough" if the full article is needed for understanding
5. A brief one-sentence summary
6. Brief reasoning for PR probability assessment"#,
        article_text
    )
}

/// Chat-completions client with strict structured output.
pub struct OpenAiAnalyzer {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_input_chars: usize,
}

impl OpenAiAnalyzer {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AggregatorError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_input_chars: config.max_input_chars,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| AggregatorError::Config(format!("Invalid API key header: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn build_request(&self, request: &AnalysisRequest) -> ChatRequest {
        let truncated = AnalysisRequest {
            body: request
                .body
                .as_deref()
                .map(|body| truncate_chars(body, self.max_input_chars)),
            ..request.clone()
        };

        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                WireMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                WireMessage {
                    role: "user",
                    content: user_prompt(&truncated.article_text()),
                },
            ],
            temperature: if self.model.starts_with("gpt-5") { None } else { Some(0.0) },
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "article_analysis",
                    strict: true,
                    schema: analysis_schema(),
                },
            },
        }
    }
}

#[async_trait]
impl StructuredAnalyzer for OpenAiAnalyzer {
    fn provider_name(&self) -> &str {
        &self.model
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<Value> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!("Requesting analysis of article {} from {}", request.article_id, self.model);

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&self.build_request(request))
            .send()
            .await
            .map_err(|e| AggregatorError::AnalysisProvider(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_seconds = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(AggregatorError::RateLimited { retry_after_seconds });
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AggregatorError::AnalysisProvider(format!(
                "OpenAI API error ({}): {}",
                status, error_text
            )));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| AggregatorError::Validation(format!("Unreadable provider response: {}", e)))?;

        let message = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| AggregatorError::Validation("Provider returned no choices".to_string()))?;

        if let Some(refusal) = message.refusal {
            return Err(AggregatorError::AnalysisProvider(format!("Model refused: {}", refusal)));
        }

        let content = message
            .content
            .ok_or_else(|| AggregatorError::Validation("Provider returned an empty message".to_string()))?;

        serde_json::from_str(&content)
            .map_err(|e| AggregatorError::Validation(format!("Response is not valid JSON: {}", e)))
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone)]
enum MockBehaviour {
    Respond(Value),
    Fail(String),
    RateLimit(Option<u64>),
}

/// Canned analyzer for development and tests; counts how often it was asked.
pub struct MockAnalyzer {
    behaviour: MockBehaviour,
    response_delay: Duration,
    calls: AtomicUsize,
}

impl MockAnalyzer {
    pub fn returning(response: Value) -> Self {
        Self::with_behaviour(MockBehaviour::Respond(response))
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_behaviour(MockBehaviour::Fail(message.into()))
    }

    pub fn rate_limited(retry_after_seconds: Option<u64>) -> Self {
        Self::with_behaviour(MockBehaviour::RateLimit(retry_after_seconds))
    }

    fn with_behaviour(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            response_delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StructuredAnalyzer for MockAnalyzer {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn analyze(&self, _request: &AnalysisRequest) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.response_delay.is_zero() {
            tokio::time::sleep(self.response_delay).await;
        }

        match &self.behaviour {
            MockBehaviour::Respond(value) => Ok(value.clone()),
            MockBehaviour::Fail(message) => Err(AggregatorError::AnalysisProvider(message.clone())),
            MockBehaviour::RateLimit(retry_after_seconds) => Err(AggregatorError::RateLimited {
                retry_after_seconds: *retry_after_seconds,
            }),
        }
    }
}
