use anyhow::{Context, Result};
use clap::Parser;
use news_pipeline::{
    Category, ChatCompletionModel, Collaborators, LlmAnalyzer, MapboxGeocoder, PgArticleStore, PipelineConfig,
    PipelineService, DEFAULT_FEEDS,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "news-pipeline",
    version,
    about = "Polls news feeds, classifies and geolocates incidents, and stores them in PostGIS",
    long_about = None
)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Mapbox access token
    #[arg(long, env = "MAPBOX_ACCESS_TOKEN")]
    mapbox_token: String,

    /// Base URL of an OpenAI-compatible completion server
    #[arg(long, env = "LLM_BASE_URL", default_value = "http://localhost:11434/v1")]
    llm_base_url: String,

    #[arg(long, env = "LLM_API_KEY", default_value = "")]
    llm_api_key: String,

    #[arg(long, env = "LLM_MODEL", default_value = "llama3")]
    llm_model: String,

    /// Comma-separated feed URLs
    #[arg(long, env = "FEEDS", value_delimiter = ',')]
    feeds: Vec<String>,

    /// Seconds between polling cycles
    #[arg(long, env = "POLLING_INTERVAL", default_value = "300")]
    polling_interval: u64,

    /// Attempts per source per cycle
    #[arg(long, env = "MAX_RETRIES", default_value = "3")]
    max_retries: u32,

    /// Seconds between attempts
    #[arg(long, env = "RETRY_DELAY", default_value = "10")]
    retry_delay: u64,

    /// Model invocations allowed to run at once
    #[arg(long, env = "MAX_WORKERS", default_value = "2")]
    max_workers: usize,

    /// Seconds shutdown waits for queued articles
    #[arg(long, env = "DRAIN_TIMEOUT", default_value = "60")]
    drain_timeout: u64,

    /// Run a single polling cycle, process it, and exit
    #[arg(long)]
    once: bool,
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        let feeds: Vec<String> = if self.feeds.is_empty() {
            DEFAULT_FEEDS.iter().map(|s| s.to_string()).collect()
        } else {
            self.feeds.iter().map(|f| f.trim().to_string()).collect()
        };

        PipelineConfig {
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay),
            polling_interval: Duration::from_secs(self.polling_interval),
            max_concurrent_analyses: self.max_workers,
            drain_timeout: Duration::from_secs(self.drain_timeout),
            valid_categories: Category::ALL.to_vec(),
            ..PipelineConfig::default()
        }
        .with_feeds(feeds)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,news_pipeline=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.pipeline_config();

    info!("Starting news pipeline");

    let store = PgArticleStore::new(&cli.database_url)
        .await
        .context("Failed to connect to database")?;
    store.setup_schema().await.context("Failed to prepare database schema")?;
    let store = Arc::new(store);

    let geocoder = MapboxGeocoder::new(&cli.mapbox_token, &config.country.iso_code)
        .context("Failed to build geocoding client")?;
    let model = ChatCompletionModel::new(&cli.llm_base_url, &cli.llm_api_key, &cli.llm_model)
        .context("Failed to build completion client")?;
    let analyzer = LlmAnalyzer::new(model, config.max_concurrent_analyses, config.valid_categories.clone());

    let collaborators = Collaborators {
        analyzer: Arc::new(analyzer),
        geocoder: Arc::new(geocoder),
        store: store.clone(),
    };

    let outcome = if cli.once {
        PipelineService::run_once(config, collaborators)
            .await
            .map(|(report, stats)| {
                info!(
                    "Single cycle: {} sources ok, {} failed, {} articles scheduled",
                    report.sources_ok, report.sources_failed, report.enqueued
                );
                stats
            })
    } else {
        match PipelineService::start(config, collaborators).await {
            Ok(running) => running.run_until_signal().await,
            Err(e) => Err(e),
        }
    };

    store.close().await;

    match outcome {
        Ok(stats) => {
            info!(
                "News pipeline finished: {} stored, {} discarded, {} failed",
                stats.stored, stats.rejected, stats.failed
            );
            Ok(())
        }
        Err(e) => {
            error!("News pipeline stopped with error: {}", e);
            Err(e.into())
        }
    }
}
