use crate::processing::{ProcessingStage, StageOutcome};
use crate::queue::{Delivery, QueueConsumer};
use crate::types::{Article, FeedEntry};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How one work item left the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Stored,
    Rejected { stage: String, reason: String },
    Failed { stage: String, error: String },
}

#[derive(Debug, Default)]
struct Counters {
    stored: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

/// Shared handle on the consumer's counters.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    counters: Arc<Counters>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub stored: u64,
    pub rejected: u64,
    pub failed: u64,
}

impl StatsSnapshot {
    pub fn processed(&self) -> u64 {
        self.stored + self.rejected + self.failed
    }
}

impl PipelineStats {
    fn record(&self, outcome: &ItemOutcome) {
        let counter = match outcome {
            ItemOutcome::Stored => &self.counters.stored,
            ItemOutcome::Rejected { .. } => &self.counters.rejected,
            ItemOutcome::Failed { .. } => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            stored: self.counters.stored.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

/// Takes work items off the queue one at a time and runs them through the stages
/// in order. The first stage that rejects or fails ends processing for that item;
/// nothing an item does can stop the loop.
pub struct PipelineConsumer {
    stages: Vec<Box<dyn ProcessingStage>>,
    stats: PipelineStats,
}

impl PipelineConsumer {
    pub fn new(stages: Vec<Box<dyn ProcessingStage>>) -> Self {
        for stage in &stages {
            debug!("Adding processing stage to pipeline: {}", stage.stage_name());
        }
        Self {
            stages,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.clone()
    }

    /// Runs every stage over one entry.
    pub async fn process(&self, entry: FeedEntry) -> ItemOutcome {
        let title = entry.title.clone();
        let mut article = Article::new(entry);

        for stage in &self.stages {
            match stage.process(article).await {
                Ok(StageOutcome::Continue(next)) => article = next,
                Ok(StageOutcome::Reject(reason)) => {
                    info!("Article discarded at {} ({}): {}", stage.stage_name(), reason, title);
                    return ItemOutcome::Rejected {
                        stage: stage.stage_name(),
                        reason,
                    };
                }
                Err(e) => {
                    error!("Error processing article at {}: {} - {}", stage.stage_name(), title, e);
                    return ItemOutcome::Failed {
                        stage: stage.stage_name(),
                        error: e.to_string(),
                    };
                }
            }
        }

        info!("Successfully processed article: {}", title);
        ItemOutcome::Stored
    }

    /// Processes one delivery and acknowledges it, whatever happens inside.
    pub async fn handle(&self, delivery: Delivery) -> ItemOutcome {
        let entry = delivery.entry().clone();
        let title = entry.title.clone();

        let outcome = match AssertUnwindSafe(self.process(entry)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("Processing panicked for article: {}", title);
                ItemOutcome::Failed {
                    stage: "unknown".to_string(),
                    error: "stage panicked".to_string(),
                }
            }
        };

        self.stats.record(&outcome);
        delivery.done();
        outcome
    }

    /// Consumes until the queue ends or `shutdown` fires. An item already being
    /// processed is finished first. Items still queued after a shutdown are
    /// acknowledged without processing.
    pub async fn run(self, mut queue: QueueConsumer, shutdown: CancellationToken) -> StatsSnapshot {
        info!("Pipeline consumer started with {} stages", self.stages.len());

        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Pipeline consumer received shutdown signal");
                    break;
                }
                next = queue.next() => match next {
                    Some(delivery) => delivery,
                    None => {
                        info!("Work queue closed and empty");
                        break;
                    }
                },
            };

            self.handle(delivery).await;
        }

        let mut abandoned = 0;
        while let Some(delivery) = queue.try_next() {
            debug!("Abandoning queued article: {}", delivery.entry().url);
            delivery.done();
            abandoned += 1;
        }
        if abandoned > 0 {
            warn!("Abandoned {} queued articles at shutdown", abandoned);
        }

        let stats = self.stats.snapshot();
        info!(
            "Pipeline consumer stopped: {} stored, {} rejected, {} failed",
            stats.stored, stats.rejected, stats.failed
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::build_stages;
    use crate::queue::work_queue;
    use crate::testing::{sample_entry, MemoryStore, ScriptedAnalyzer, StaticGeocoder};
    use crate::types::{Category, Classification, CountryQualifier, LocationExtraction};
    use std::time::Duration;

    fn consumer(analyzer: ScriptedAnalyzer, geocoder: StaticGeocoder, store: Arc<MemoryStore>) -> PipelineConsumer {
        PipelineConsumer::new(build_stages(
            Arc::new(analyzer),
            Arc::new(geocoder),
            store,
            CountryQualifier::default(),
        ))
    }

    #[tokio::test]
    async fn stores_fully_enriched_article() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = consumer(
            ScriptedAnalyzer::new()
                .classify_as("Choque en avenida", Classification::Category(Category::Crime))
                .locate_as("Choque en avenida", LocationExtraction::Found("Guadalajara".to_string())),
            StaticGeocoder::new().with_place("Guadalajara, Mexico", -103.35, 20.67),
            store.clone(),
        );

        let outcome = pipeline
            .process(sample_entry("https://example.com/a", "Choque en avenida"))
            .await;
        assert_eq!(outcome, ItemOutcome::Stored);

        let rows = store.inserted();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].category, Category::Crime);
        assert_eq!(rows[0].location, "Guadalajara, Mexico");
        assert_eq!(rows[0].coordinates.longitude, -103.35);
    }

    #[tokio::test]
    async fn discard_skips_remaining_stages() {
        let analyzer = Arc::new(ScriptedAnalyzer::new());
        let geocoder = Arc::new(StaticGeocoder::new());
        let store = Arc::new(MemoryStore::new());
        let pipeline = PipelineConsumer::new(build_stages(
            analyzer.clone(),
            geocoder.clone(),
            store.clone(),
            CountryQualifier::default(),
        ));

        let outcome = pipeline
            .process(sample_entry("https://example.com/a", "Resultados de futbol"))
            .await;
        assert!(matches!(outcome, ItemOutcome::Rejected { ref stage, .. } if stage == "classify"));
        assert_eq!(analyzer.classify_calls(), 1);
        assert_eq!(analyzer.extract_calls(), 0);
        assert_eq!(geocoder.calls(), 0);
        assert_eq!(store.insert_calls(), 0);
    }

    #[tokio::test]
    async fn collaborator_error_becomes_failed_outcome() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = consumer(
            ScriptedAnalyzer::new()
                .classify_as("Inundación", Classification::Category(Category::Hazard))
                .locate_as("Inundación", LocationExtraction::Found("Tabasco".to_string())),
            StaticGeocoder::new().failing_for("Tabasco, Mexico"),
            store.clone(),
        );

        let outcome = pipeline
            .process(sample_entry("https://example.com/a", "Inundación"))
            .await;
        assert!(matches!(outcome, ItemOutcome::Failed { ref stage, .. } if stage == "geocode"));
        assert_eq!(store.insert_calls(), 0);
    }

    #[tokio::test]
    async fn loop_survives_failures_and_panics() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = consumer(
            ScriptedAnalyzer::new()
                .failing_for("falla")
                .panicking_for("pánico")
                .classify_as("Bache", Classification::Category(Category::Infrastructure))
                .locate_as("Bache", LocationExtraction::Found("Puebla".to_string())),
            StaticGeocoder::new().with_place("Puebla, Mexico", -98.2, 19.04),
            store.clone(),
        );
        let stats = pipeline.stats();

        let (producer, queue) = work_queue();
        producer.push(sample_entry("https://example.com/1", "falla")).unwrap();
        producer.push(sample_entry("https://example.com/2", "pánico")).unwrap();
        producer.push(sample_entry("https://example.com/3", "Bache")).unwrap();
        let mut monitor = producer.monitor();
        drop(producer);

        let final_stats = tokio::time::timeout(Duration::from_secs(5), pipeline.run(queue, CancellationToken::new()))
            .await
            .expect("consumer finishes once the queue ends");

        assert_eq!(final_stats.failed, 2);
        assert_eq!(final_stats.stored, 1);
        assert_eq!(stats.snapshot(), final_stats);
        assert_eq!(store.inserted().len(), 1);
        monitor.drained().await;
        assert_eq!(monitor.state().acknowledged, 3);
    }

    #[tokio::test]
    async fn shutdown_acknowledges_unprocessed_items() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = consumer(ScriptedAnalyzer::new(), StaticGeocoder::new(), store);

        let (producer, queue) = work_queue();
        producer.push(sample_entry("https://example.com/1", "a")).unwrap();
        producer.push(sample_entry("https://example.com/2", "b")).unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let stats = pipeline.run(queue, shutdown).await;

        assert_eq!(stats.processed(), 0);
        assert_eq!(producer.pending(), 0);
    }
}
