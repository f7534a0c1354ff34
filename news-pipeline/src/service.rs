use crate::coordinator::{CycleReport, IngestionCoordinator};
use crate::dedup::DedupStore;
use crate::fetcher::Fetcher;
use crate::llm_adapter::ArticleAnalyzer;
use crate::pipeline::{PipelineConsumer, PipelineStats, StatsSnapshot};
use crate::processing::build_stages;
use crate::queue::{work_queue, QueueConsumer, QueueMonitor, QueueState};
use crate::rss_utils::time::format_duration;
use crate::traits::{ArticleStore, Geocoder};
use crate::types::{PipelineConfig, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// External services the pipeline depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub analyzer: Arc<dyn ArticleAnalyzer>,
    pub geocoder: Arc<dyn Geocoder>,
    pub store: Arc<dyn ArticleStore>,
}

struct Assembled {
    coordinator: IngestionCoordinator,
    consumer: PipelineConsumer,
    queue: QueueConsumer,
    monitor: QueueMonitor,
}

/// Wires fetcher, dedup store, queue and stages together.
pub struct PipelineService;

impl PipelineService {
    async fn assemble(config: &PipelineConfig, collaborators: Collaborators) -> Result<Assembled> {
        config.validate()?;
        info!(
            "Assembling pipeline: analyzer={}, geocoder={}",
            collaborators.analyzer.adapter_name(),
            collaborators.geocoder.geocoder_name()
        );

        let dedup = DedupStore::bootstrap(collaborators.store.as_ref()).await?;
        let fetcher = Fetcher::new(config)?;
        let (producer, queue) = work_queue();
        let monitor = producer.monitor();

        let coordinator = IngestionCoordinator::new(config.clone(), fetcher, dedup, producer);
        let consumer = PipelineConsumer::new(build_stages(
            collaborators.analyzer,
            collaborators.geocoder,
            collaborators.store,
            config.country.clone(),
        ));

        Ok(Assembled {
            coordinator,
            consumer,
            queue,
            monitor,
        })
    }

    /// Bootstraps the dedup store and starts the coordinator and the consumer as
    /// separate tasks with their own cancellation.
    pub async fn start(config: PipelineConfig, collaborators: Collaborators) -> Result<RunningPipeline> {
        let parts = Self::assemble(&config, collaborators).await?;
        let stats = parts.consumer.stats();

        let ingest_shutdown = CancellationToken::new();
        let consume_shutdown = CancellationToken::new();
        let ingest_task = tokio::spawn(parts.coordinator.run(ingest_shutdown.clone()));
        let consume_task = tokio::spawn(parts.consumer.run(parts.queue, consume_shutdown.clone()));

        info!("News pipeline started with {} sources", config.feeds.len());
        Ok(RunningPipeline {
            ingest_shutdown,
            consume_shutdown,
            ingest_task,
            consume_task,
            monitor: parts.monitor,
            stats,
            drain_timeout: config.drain_timeout,
        })
    }

    /// One polling cycle followed by processing everything it scheduled, bounded by
    /// the drain timeout.
    pub async fn run_once(config: PipelineConfig, collaborators: Collaborators) -> Result<(CycleReport, StatsSnapshot)> {
        let parts = Self::assemble(&config, collaborators).await?;
        let mut coordinator = parts.coordinator;

        let cycle = coordinator.run_cycle().await;
        coordinator.close();

        let deadline = CancellationToken::new();
        let timer = {
            let deadline = deadline.clone();
            let drain_timeout = config.drain_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(drain_timeout).await;
                warn!("Drain timeout of {} reached", format_duration(drain_timeout));
                deadline.cancel();
            })
        };

        // whatever the cycle scheduled before failing is processed too
        let stats = parts.consumer.run(parts.queue, deadline).await;
        timer.abort();

        match cycle {
            Ok(report) => Ok((report, stats)),
            Err(e) => {
                error!("Polling cycle failed after {} articles were processed: {}", stats.processed(), e);
                Err(e)
            }
        }
    }
}

/// Handle on a started pipeline.
pub struct RunningPipeline {
    ingest_shutdown: CancellationToken,
    consume_shutdown: CancellationToken,
    ingest_task: JoinHandle<()>,
    consume_task: JoinHandle<StatsSnapshot>,
    monitor: QueueMonitor,
    stats: PipelineStats,
    drain_timeout: Duration,
}

impl RunningPipeline {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn queue_state(&self) -> QueueState {
        self.monitor.state()
    }

    /// Stops polling, waits for queued work to drain (at most the drain timeout),
    /// then stops the consumer.
    pub async fn shutdown(mut self) -> StatsSnapshot {
        info!("Stopping ingestion");
        self.ingest_shutdown.cancel();
        if let Err(e) = self.ingest_task.await {
            error!("Ingestion task ended abnormally: {}", e);
        }

        let pending = self.monitor.state().pending();
        if pending > 0 {
            info!("Waiting for {} queued articles to drain", pending);
        }
        match tokio::time::timeout(self.drain_timeout, self.monitor.drained()).await {
            Ok(()) => info!("Work queue drained"),
            Err(_) => warn!(
                "Drain timeout of {} reached with {} articles pending",
                format_duration(self.drain_timeout),
                self.monitor.state().pending()
            ),
        }

        self.consume_shutdown.cancel();
        match self.consume_task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Pipeline consumer ended abnormally: {}", e);
                self.stats.snapshot()
            }
        }
    }

    /// Runs until Ctrl-C, then shuts down gracefully.
    pub async fn run_until_signal(self) -> Result<StatsSnapshot> {
        tokio::signal::ctrl_c().await?;
        info!("Received shutdown signal");
        Ok(self.shutdown().await)
    }
}
