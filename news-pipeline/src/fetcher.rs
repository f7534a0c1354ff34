use crate::parser::FeedParser;
use crate::rss_utils;
use crate::types::{ParsedFeed, PipelineConfig, PipelineError, Result};
use backoff::backoff::{Backoff, Constant};
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// HTTP side of a feed source: GET with a per-attempt timeout and a fixed number of
/// attempts separated by a constant delay. Cheap to clone; clones share one
/// connection pool.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    config: PipelineConfig,
    parser: Arc<FeedParser>,
    closed: Arc<AtomicBool>,
}

impl Fetcher {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
            parser: Arc::new(FeedParser::new()),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Fetches the raw feed body. Every attempt that fails (transport error or
    /// non-2xx) is followed by `retry_delay`, except the last one.
    pub async fn fetch_feed(&self, url: &str) -> Result<Vec<u8>> {
        if self.is_closed() {
            return Err(PipelineError::General("fetcher is closed".to_string()));
        }

        let attempts = self.config.max_retries.max(1);
        let mut delay = Constant::new(self.config.retry_delay);
        let start_time = Instant::now();

        for attempt in 1..=attempts {
            debug!("Fetching feed {} (attempt {}/{})", url, attempt, attempts);

            match self.attempt(url).await {
                Ok(body) => {
                    info!(
                        "Fetched feed {} ({} bytes, {}ms)",
                        url,
                        body.len(),
                        start_time.elapsed().as_millis()
                    );
                    return Ok(body);
                }
                Err(e) => {
                    warn!("Attempt {}/{} failed for {}: {}", attempt, attempts, url, e);
                }
            }

            if attempt < attempts {
                if let Some(wait) = delay.next_backoff() {
                    tokio::time::sleep(wait).await;
                }
            }
        }

        error!("Failed to fetch feed after {} attempts: {}", attempts, url);
        Err(PipelineError::RetriesExhausted {
            url: url.to_string(),
            attempts,
        })
    }

    async fn attempt(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(PipelineError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        Ok(body.to_vec())
    }

    /// Fetch then parse. A body that is not a feed is not retried.
    pub async fn fetch_and_parse(&self, url: &str) -> Result<ParsedFeed> {
        let body = self.fetch_feed(url).await?;
        self.parser.parse_feed(&body, url)
    }

    /// Marks the fetcher closed. The pool itself is released when the last clone
    /// drops; later fetches fail fast.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Closed feed fetcher ({} sources)", self.config.feeds.len());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sources(&self) -> impl Iterator<Item = String> + '_ {
        self.config.feeds.iter().map(|f| rss_utils::url::source_label(f))
    }
}
