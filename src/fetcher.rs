use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::types::{BotError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "SocialBot/1.0".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 5,
            max_feed_size_mb: 10,
            max_redirects: 5,
        }
    }
}

/// Conditional-GET headers remembered from the previous fetch of a feed.
#[derive(Debug, Clone, Default)]
pub struct FeedCacheHeaders {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Raw feed body; `None` on 304 Not Modified.
    pub content: Option<String>,
    pub not_modified: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Capability that turns a feed URL into raw feed content. The pipeline only
/// depends on this trait; tests substitute a canned source.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str, cache: &FeedCacheHeaders) -> Result<FetchOutcome>;
}

pub struct Fetcher {
    client: Client,
    config: FetchConfig,
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
        Ok(Self { client, config })
    }

    async fn request(&self, url: &str, cache: &FeedCacheHeaders) -> Result<Response> {
        let mut request = self.client.get(url);
        if let Some(etag) = &cache.etag {
            request = request.header("If-None-Match", etag);
        }
        if let Some(last_modified) = &cache.last_modified {
            request = request.header("If-Modified-Since", last_modified);
        }
        Ok(request.send().await?)
    }
}

#[async_trait]
impl FeedSource for Fetcher {
    async fn fetch(&self, url: &str, cache: &FeedCacheHeaders) -> Result<FetchOutcome> {
        debug!(%url, "fetching feed");

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 60)),
            multiplier: 2.0,
            ..Default::default()
        };

        let mut last_error: Option<BotError> = None;

        for attempt in 0..=self.config.max_retries {
            match self.request(url, cache).await {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::NOT_MODIFIED {
                        debug!(%url, "feed not modified");
                        return Ok(FetchOutcome {
                            content: None,
                            not_modified: true,
                            etag: cache.etag.clone(),
                            last_modified: cache.last_modified.clone(),
                        });
                    }

                    if !status.is_success() {
                        last_error = Some(BotError::Parse(format!(
                            "HTTP {}: {}",
                            status,
                            status.canonical_reason().unwrap_or("unknown")
                        )));
                        // Client errors other than 429 will not improve on retry.
                        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                            break;
                        }
                        if attempt < self.config.max_retries {
                            if let Some(delay) = backoff.next_backoff() {
                                warn!(%url, attempt = attempt + 1, ?delay, "fetch failed, retrying");
                                tokio::time::sleep(delay).await;
                                continue;
                            }
                        }
                        break;
                    }

                    // Only enforceable when the server sends Content-Length.
                    if let Some(length) = response.content_length() {
                        if exceeds_size_cap(length, self.config.max_feed_size_mb) {
                            return Err(BotError::Parse(format!(
                                "feed too large: {length} bytes (cap {}MB)",
                                self.config.max_feed_size_mb
                            )));
                        }
                    }

                    let etag = header_string(&response, "etag");
                    let last_modified = header_string(&response, "last-modified");

                    match response.text().await {
                        Ok(content) => {
                            debug!(%url, bytes = content.len(), "fetched feed");
                            return Ok(FetchOutcome {
                                content: Some(content),
                                not_modified: false,
                                etag,
                                last_modified,
                            });
                        }
                        Err(e) => last_error = Some(BotError::Http(e)),
                    }
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!(%url, attempt = attempt + 1, ?delay, "fetch failed, retrying");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BotError::Parse("fetch failed".to_string())))
    }
}

fn header_string(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn exceeds_size_cap(length_bytes: u64, max_mb: usize) -> bool {
    length_bytes > max_mb as u64 * 1024 * 1024
}
