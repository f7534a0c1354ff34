pub mod types;
pub mod rss_utils;
pub mod parser;
pub mod fetcher;
pub mod dedup;
pub mod queue;
pub mod traits;
pub mod llm_adapter;
pub mod geocoder;
pub mod store;
pub mod processing;
pub mod pipeline;
pub mod coordinator;
pub mod service;
pub mod testing;

pub use types::*;
pub use parser::FeedParser;
pub use fetcher::Fetcher;
pub use dedup::DedupStore;
pub use queue::{work_queue, Delivery, QueueConsumer, QueueMonitor, QueueProducer, QueueState};
pub use traits::{ArticleStore, Geocoder, InsertOutcome};
pub use llm_adapter::{ArticleAnalyzer, ChatCompletionModel, CompletionModel, LlmAnalyzer};
pub use geocoder::MapboxGeocoder;
pub use store::PgArticleStore;
pub use processing::{build_stages, ProcessingStage, StageOutcome};
pub use pipeline::{ItemOutcome, PipelineConsumer, PipelineStats, StatsSnapshot};
pub use coordinator::{CycleReport, IngestionCoordinator};
pub use service::{Collaborators, PipelineService, RunningPipeline};
