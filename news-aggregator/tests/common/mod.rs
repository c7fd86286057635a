#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use news_aggregator::{
    AggregatorError, AnalysisRequest, AnalysisResult, ArticleCandidate, Classification, HtmlFetch, KeyFact,
    PullFeed, RawArticle, Result, SourceCursor, StructuredAnalyzer,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("valid RFC 3339 timestamp")
        .with_timezone(&Utc)
}

pub fn raw(url: &str, headline: &str, published_at: &str) -> RawArticle {
    RawArticle {
        url: url.to_string(),
        headline: headline.to_string(),
        published_at: ts(published_at),
        summary_content: None,
        dated: true,
    }
}

/// An entry the source gave no date for; `fetched_at` stands in.
pub fn undated(url: &str, headline: &str, fetched_at: &str) -> RawArticle {
    RawArticle {
        dated: false,
        ..raw(url, headline, fetched_at)
    }
}

pub fn candidate(url: &str, source: &str, published_at: &str) -> ArticleCandidate {
    raw(url, &format!("Headline for {}", url), published_at).into_candidate(source, ts("2024-06-01T00:00:00Z"))
}

pub fn analysis(relevance_score: u8, classification: Classification) -> AnalysisResult {
    AnalysisResult {
        key_facts: vec![KeyFact {
            fact: "Something happened".to_string(),
            importance: 7,
        }],
        relevance_score,
        pr_probability: 20,
        classification,
        summary: "A summary.".to_string(),
        reasoning: "Plain reporting.".to_string(),
        processed_at: ts("2024-06-01T12:00:00Z"),
    }
}

pub fn analysis_response(relevance_score: i64, pr_probability: i64, classification: &str) -> Value {
    json!({
        "key_facts": [
            { "fact": "Council approved the budget", "importance": 8 },
            { "fact": "Rates rise 6%" }
        ],
        "relevance_score": relevance_score,
        "pr_probability": pr_probability,
        "classification": classification,
        "summary": "The council approved its budget.",
        "reasoning": "Sourced reporting with named officials."
    })
}

/// Feed double that always offers the same entries.
pub struct StaticFeed {
    pub name: String,
    pub entries: Mutex<Vec<RawArticle>>,
    pub polls: AtomicUsize,
}

impl StaticFeed {
    pub fn new(name: &str, entries: Vec<RawArticle>) -> Self {
        Self {
            name: name.to_string(),
            entries: Mutex::new(entries),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn set_entries(&self, entries: Vec<RawArticle>) {
        *self.entries.lock().expect("entries lock") = entries;
    }
}

#[async_trait]
impl PullFeed for StaticFeed {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn poll(&self, _cursor: Option<&SourceCursor>) -> Result<Vec<RawArticle>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.lock().expect("entries lock").clone())
    }
}

/// `StaticFeed` behind an `Arc`, so a test can keep a handle to it.
pub struct SharedFeed(pub std::sync::Arc<StaticFeed>);

#[async_trait]
impl PullFeed for SharedFeed {
    fn source_name(&self) -> &str {
        self.0.source_name()
    }

    async fn poll(&self, cursor: Option<&SourceCursor>) -> Result<Vec<RawArticle>> {
        self.0.poll(cursor).await
    }
}

pub struct FailingFeed {
    pub name: String,
}

#[async_trait]
impl PullFeed for FailingFeed {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn poll(&self, _cursor: Option<&SourceCursor>) -> Result<Vec<RawArticle>> {
        Err(AggregatorError::Fetch {
            url: format!("https://{}.example/rss", self.name),
            reason: "HTTP 503: Service Unavailable".to_string(),
        })
    }
}

pub struct SlowFeed {
    pub name: String,
    pub delay: Duration,
}

#[async_trait]
impl PullFeed for SlowFeed {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn poll(&self, _cursor: Option<&SourceCursor>) -> Result<Vec<RawArticle>> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }
}

/// Serves canned pages; unknown URLs fail like a 404.
#[derive(Default)]
pub struct StaticHtml {
    pub pages: HashMap<String, String>,
}

impl StaticHtml {
    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }
}

#[async_trait]
impl HtmlFetch for StaticHtml {
    async fn fetch_html(&self, url: &str) -> Result<String> {
        self.pages.get(url).cloned().ok_or_else(|| AggregatorError::Fetch {
            url: url.to_string(),
            reason: "HTTP 404: Not Found".to_string(),
        })
    }
}

/// Answers with a fixed response and keeps every request it saw.
pub struct RecordingAnalyzer {
    pub response: Value,
    pub requests: Mutex<Vec<AnalysisRequest>>,
}

impl RecordingAnalyzer {
    pub fn new(response: Value) -> Self {
        Self {
            response,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl StructuredAnalyzer for RecordingAnalyzer {
    fn provider_name(&self) -> &str {
        "recording"
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<Value> {
        self.requests.lock().expect("requests lock").push(request.clone());
        Ok(self.response.clone())
    }
}

/// One scripted HTTP reply.
#[derive(Debug, Clone)]
pub struct Canned {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl Canned {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string()).header("Content-Type", "application/json")
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn to_wire(&self) -> String {
        let reason = reqwest::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("Unknown");

        let mut wire = format!(
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.status,
            reason,
            self.body.len()
        );
        for (name, value) in &self.headers {
            wire.push_str(&format!("{}: {}\r\n", name, value));
        }
        wire.push_str("\r\n");
        wire.push_str(&self.body);
        wire
    }
}

/// A loopback HTTP server that answers each connection with the next canned
/// reply, repeating the last one once the script runs out.
pub struct CannedServer {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<String>>>,
}

impl CannedServer {
    pub async fn start(script: Vec<Canned>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let hits = Arc::new(AtomicUsize::new(0));
        let bodies = Arc::new(Mutex::new(Vec::new()));

        let (served, seen) = (hits.clone(), bodies.clone());
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let n = served.fetch_add(1, Ordering::SeqCst);
                if let Ok(body) = read_request_body(&mut stream).await {
                    seen.lock().expect("bodies lock").push(body);
                }
                if let Some(reply) = script.get(n).or(script.last()) {
                    let _ = stream.write_all(reply.to_wire().as_bytes()).await;
                    let _ = stream.shutdown().await;
                }
            }
        });

        Ok(Self {
            base_url,
            hits,
            bodies,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn request_bodies(&self) -> Vec<String> {
        self.bodies.lock().expect("bodies lock").clone()
    }
}

async fn read_request_body(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break end;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(String::new());
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let body_start = head_end + 4;
    while buf.len() < body_start + length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body_end = (body_start + length).min(buf.len());
    Ok(String::from_utf8_lossy(&buf[body_start..body_end]).to_string())
}
