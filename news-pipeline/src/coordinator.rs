use crate::dedup::DedupStore;
use crate::fetcher::Fetcher;
use crate::queue::QueueProducer;
use crate::rss_utils::time::format_duration;
use crate::types::{ParsedFeed, PipelineConfig, Result};
use futures::future::join_all;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Totals for one polling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub entries_seen: usize,
    pub enqueued: usize,
}

/// Polls every configured feed on a fixed interval and schedules entries whose URL
/// has not been seen. Owns the dedup store and the producer side of the queue.
pub struct IngestionCoordinator {
    config: PipelineConfig,
    fetcher: Fetcher,
    dedup: DedupStore,
    queue: QueueProducer,
}

impl IngestionCoordinator {
    pub fn new(config: PipelineConfig, fetcher: Fetcher, dedup: DedupStore, queue: QueueProducer) -> Self {
        Self {
            config,
            fetcher,
            dedup,
            queue,
        }
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    pub fn queue(&self) -> &QueueProducer {
        &self.queue
    }

    /// Fetches all sources concurrently, then walks the results in configuration
    /// order. A failing source is logged and skipped. Each new entry is pushed
    /// before its URL is marked known.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let started = Instant::now();
        let fetches = self.config.feeds.iter().map(|url| {
            let fetcher = self.fetcher.clone();
            let url = url.clone();
            async move {
                let result = fetcher.fetch_and_parse(&url).await;
                (url, result)
            }
        });
        let results = join_all(fetches).await;

        let mut report = CycleReport::default();
        for (url, result) in results {
            match result {
                Ok(feed) => {
                    report.sources_ok += 1;
                    report.entries_seen += feed.entries.len();
                    report.enqueued += self.schedule(feed)?;
                }
                Err(e) => {
                    report.sources_failed += 1;
                    warn!("Skipping feed {} this cycle: {}", url, e);
                }
            }
        }

        info!(
            "Polling cycle finished in {}: {} sources ok, {} failed, {} new of {} entries",
            format_duration(started.elapsed()),
            report.sources_ok,
            report.sources_failed,
            report.enqueued,
            report.entries_seen
        );
        Ok(report)
    }

    fn schedule(&mut self, feed: ParsedFeed) -> Result<usize> {
        if feed.dropped > 0 {
            debug!("{} entries without required fields dropped from {}", feed.dropped, feed.source_name);
        }

        let mut enqueued = 0;
        for entry in feed.entries {
            if self.dedup.is_known(&entry.url) {
                continue;
            }
            let url = entry.url.clone();
            self.queue.push(entry)?;
            self.dedup.mark_known(url);
            enqueued += 1;
        }

        if enqueued > 0 {
            info!("Scheduled {} new articles from {}", enqueued, feed.source_name);
        }
        Ok(enqueued)
    }

    /// Closes the fetcher and drops the producer, ending the queue once the
    /// consumer has taken what was already scheduled.
    pub fn close(self) {
        self.fetcher.close();
    }

    /// Polls until `shutdown` fires. A cycle in progress is finished first. After a
    /// cycle error the next attempt comes after `retry_delay` instead of the full
    /// polling interval. On exit the fetcher is closed and the producer dropped, so
    /// the consumer sees the end of the queue once it is drained.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let _close = CloseOnDrop(self.fetcher.clone());
        let sources: Vec<String> = self.fetcher.sources().collect();
        info!(
            "Starting ingestion every {} from {} sources: {}",
            format_duration(self.config.polling_interval),
            sources.len(),
            sources.join(", ")
        );

        loop {
            let wait = match self.run_cycle().await {
                Ok(_) => self.config.polling_interval,
                Err(e) => {
                    error!("Polling cycle failed: {}", e);
                    self.config.retry_delay
                }
            };

            if !sleep_or_cancel(wait, &shutdown).await {
                break;
            }
        }

        info!(
            "Ingestion stopped with {} known URLs and {} items pending",
            self.dedup.len(),
            self.queue.pending()
        );
    }
}

/// Returns `false` when cancelled before the wait elapsed.
async fn sleep_or_cancel(wait: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(wait) => !shutdown.is_cancelled(),
    }
}

struct CloseOnDrop(Fetcher);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::work_queue;
    use crate::testing::sample_entry;

    #[tokio::test]
    async fn close_shuts_fetcher_and_ends_queue_after_scheduled_items() {
        let config = PipelineConfig::default();
        let fetcher = Fetcher::new(&config).unwrap();
        let observer = fetcher.clone();
        let (producer, mut queue) = work_queue();
        producer.push(sample_entry("https://example.com/ya-programada", "t")).unwrap();

        let coordinator = IngestionCoordinator::new(config, fetcher, DedupStore::new(), producer);
        coordinator.close();

        assert!(observer.is_closed());
        assert!(queue.next().await.is_some());
        assert!(queue.next().await.is_none());
    }
}
