use crate::traits::HtmlFetch;
use crate::types::{AggregatorError, FetchConfig, Result};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

/// HTTP access for feeds and article pages: retries with backoff, a per-host
/// politeness interval and a body size limit.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    rate_limiter: Arc<RwLock<HashMap<String, Instant>>>,
}

enum Attempt {
    Retry(String),
    GiveUp(String),
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            rate_limiter: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// GET `url` and return the body as text. Transport errors and 5xx are
    /// retried; other non-success statuses fail at once.
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        self.apply_rate_limit(url).await?;

        let delay = Duration::from_secs(self.config.retry_delay_seconds);
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: delay,
            initial_interval: delay,
            max_interval: delay * 32,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut last_error = String::from("no attempt made");

        for attempt in 0..=self.config.max_retries {
            match self.try_fetch(url).await {
                Ok(body) => {
                    info!("Fetched {} ({} bytes)", url, body.len());
                    return Ok(body);
                }
                Err(Attempt::GiveUp(reason)) => {
                    warn!("Giving up on {}: {}", url, reason);
                    return Err(AggregatorError::Fetch {
                        url: url.to_string(),
                        reason,
                    });
                }
                Err(Attempt::Retry(reason)) => {
                    last_error = reason;

                    if attempt < self.config.max_retries {
                        if let Some(wait) = backoff.next_backoff() {
                            warn!(
                                "Attempt {} failed for {}, retrying in {:?}: {}",
                                attempt + 1,
                                url,
                                wait,
                                last_error
                            );
                            tokio::time::sleep(wait).await;
                            continue;
                        }
                    }
                    break;
                }
            }
        }

        error!(
            "Failed to fetch {} after {} attempts: {}",
            url,
            self.config.max_retries + 1,
            last_error
        );
        Err(AggregatorError::Fetch {
            url: url.to_string(),
            reason: last_error,
        })
    }

    async fn try_fetch(&self, url: &str) -> std::result::Result<String, Attempt> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Attempt::Retry(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reason = format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            );
            return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                Attempt::Retry(reason)
            } else {
                Attempt::GiveUp(reason)
            });
        }

        let limit = self.config.max_body_size_mb * 1024 * 1024;
        if let Some(length) = response.content_length() {
            if length as usize > limit {
                return Err(Attempt::GiveUp(format!(
                    "Body too large: {}MB",
                    length as usize / (1024 * 1024)
                )));
            }
        }

        let body = response.text().await.map_err(|e| Attempt::Retry(e.to_string()))?;
        if body.len() > limit {
            return Err(Attempt::GiveUp(format!(
                "Body too large: {}MB",
                body.len() / (1024 * 1024)
            )));
        }

        Ok(body)
    }

    /// Waits until at least `min_host_interval_ms` has passed since the
    /// previous request to the same host.
    async fn apply_rate_limit(&self, url: &str) -> Result<()> {
        let parsed_url = Url::parse(url)?;
        let host = parsed_url.host_str().unwrap_or("").to_string();
        let min_interval = Duration::from_millis(self.config.min_host_interval_ms);

        let wait = {
            let mut rate_limiter = self.rate_limiter.write().await;
            let now = Instant::now();

            let slot = match rate_limiter.get(&host) {
                Some(last_request) => (*last_request + min_interval).max(now),
                None => now,
            };
            rate_limiter.insert(host.clone(), slot);

            slot - now
        };

        if !wait.is_zero() {
            debug!("Rate limiting {}: waiting {:?}", host, wait);
            tokio::time::sleep(wait).await;
        }

        Ok(())
    }
}

#[async_trait]
impl HtmlFetch for Fetcher {
    async fn fetch_html(&self, url: &str) -> Result<String> {
        debug!("Fetching article page: {}", url);
        self.fetch_text(url).await
    }
}
