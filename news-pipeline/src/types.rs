use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// One normalized item parsed from a syndicated feed. Immutable once produced;
/// `url` doubles as the deduplication key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub source_name: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub published_date: NaiveDate,
}

#[derive(Debug)]
pub struct ParsedFeed {
    pub source_name: String,
    pub entries: Vec<FeedEntry>,
    /// Entries skipped because a required field could not be resolved.
    pub dropped: usize,
}

/// Closed set of incident categories an article can be filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Crime,
    Infrastructure,
    Hazard,
    Social,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Crime,
        Category::Infrastructure,
        Category::Hazard,
        Category::Social,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Crime => "crime",
            Category::Infrastructure => "infrastructure",
            Category::Hazard => "hazard",
            Category::Social => "social",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "crime" => Ok(Category::Crime),
            "infrastructure" => Ok(Category::Infrastructure),
            "hazard" => Ok(Category::Hazard),
            "social" => Ok(Category::Social),
            other => Err(PipelineError::General(format!("unknown category: {}", other))),
        }
    }
}

/// Answer of the classification collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Category(Category),
    Discard,
}

/// Answer of the location-extraction collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationExtraction {
    Found(String),
    NoLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub longitude: f64,
    pub latitude: f64,
}

/// A feed entry on its way through the pipeline. Fields fill in stage by stage.
#[derive(Debug, Clone)]
pub struct Article {
    pub entry: FeedEntry,
    pub category: Option<Category>,
    pub location: Option<String>,
    pub coordinates: Option<Coordinates>,
}

impl Article {
    pub fn new(entry: FeedEntry) -> Self {
        Self {
            entry,
            category: None,
            location: None,
            coordinates: None,
        }
    }

    pub fn title(&self) -> &str {
        &self.entry.title
    }

    /// Returns the fully enriched form, or `None` while any stage output is missing.
    pub fn enriched(&self) -> Option<EnrichedArticle> {
        Some(EnrichedArticle {
            entry: self.entry.clone(),
            category: self.category?,
            location: self.location.clone()?,
            coordinates: self.coordinates?,
        })
    }
}

/// What the store receives: every enrichment field is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedArticle {
    pub entry: FeedEntry,
    pub category: Category,
    pub location: String,
    pub coordinates: Coordinates,
}

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: Uuid,
    pub entry: FeedEntry,
    pub enqueued_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(entry: FeedEntry) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry,
            enqueued_at: Utc::now(),
        }
    }
}

/// Country a location must mention; either spelling counts as present.
#[derive(Debug, Clone)]
pub struct CountryQualifier {
    pub name: String,
    pub alt_name: String,
    pub iso_code: String,
}

impl Default for CountryQualifier {
    fn default() -> Self {
        Self {
            name: "Mexico".to_string(),
            alt_name: "México".to_string(),
            iso_code: "mx".to_string(),
        }
    }
}

pub const DEFAULT_FEEDS: &[&str] = &[
    "https://www.reforma.com/rss/portada.xml",
    "https://www.excelsior.com.mx/rss.xml",
    "https://www.milenio.com/rss",
    "https://www.informador.mx/rss/ultimas-noticias.xml",
    "https://www.debate.com.mx/rss/feed.xml",
    "https://heraldodemexico.com.mx/rss/feed.html?r=4",
];

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub feeds: Vec<String>,
    pub user_agent: String,
    /// Per-attempt HTTP timeout.
    pub timeout: Duration,
    /// Total attempts per source per cycle, not retries after the first.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub polling_interval: Duration,
    pub max_redirects: usize,
    pub valid_categories: Vec<Category>,
    pub country: CountryQualifier,
    /// Permits in the blocking pool that runs model invocations.
    pub max_concurrent_analyses: usize,
    /// How long shutdown waits for queued items before abandoning them.
    pub drain_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            feeds: DEFAULT_FEEDS.iter().map(|s| s.to_string()).collect(),
            user_agent: "News-Pipeline/1.0".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(10),
            polling_interval: Duration::from_secs(300),
            max_redirects: 5,
            valid_categories: Category::ALL.to_vec(),
            country: CountryQualifier::default(),
            max_concurrent_analyses: 2,
            drain_timeout: Duration::from_secs(60),
        }
    }
}

impl PipelineConfig {
    pub fn with_feeds<I, S>(mut self, feeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feeds = feeds.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.feeds.is_empty() {
            return Err(PipelineError::Config("no feed sources configured".to_string()));
        }
        for feed in &self.feeds {
            if !crate::rss_utils::url::is_valid_rss_url(feed) {
                return Err(PipelineError::Config(format!("invalid feed URL: {}", feed)));
            }
        }
        if self.max_retries == 0 {
            return Err(PipelineError::Config("max_retries must be at least 1".to_string()));
        }
        if self.valid_categories.is_empty() {
            return Err(PipelineError::Config("valid category set is empty".to_string()));
        }
        if self.max_concurrent_analyses == 0 {
            return Err(PipelineError::Config(
                "max_concurrent_analyses must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to fetch {url} after {attempts} attempts")]
    RetriesExhausted { url: String, attempts: u32 },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Geocoding error: {0}")]
    Geocoding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Work queue is closed")]
    QueueClosed,

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parsing_is_case_insensitive() {
        assert_eq!("Crime".parse::<Category>().unwrap(), Category::Crime);
        assert_eq!(" hazard\n".parse::<Category>().unwrap(), Category::Hazard);
        assert!("DISCARD".parse::<Category>().is_err());
        assert_eq!(Category::Infrastructure.to_string(), "infrastructure");
    }

    #[test]
    fn default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(10));
        assert_eq!(config.polling_interval, Duration::from_secs(300));
        assert_eq!(config.feeds.len(), 6);
    }

    #[test]
    fn validate_rejects_bad_feeds() {
        let config = PipelineConfig::default().with_feeds(vec!["ftp://example.com/feed"]);
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let config = PipelineConfig::default().with_feeds(Vec::<String>::new());
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn article_is_enriched_only_when_complete() {
        let entry = FeedEntry {
            source_name: "Test".to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            url: "https://example.com/a".to_string(),
            published_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        };
        let mut article = Article::new(entry);
        article.category = Some(Category::Crime);
        article.location = Some("Guadalajara, Mexico".to_string());
        assert!(article.enriched().is_none());

        article.coordinates = Some(Coordinates {
            longitude: -103.35,
            latitude: 20.67,
        });
        let enriched = article.enriched().unwrap();
        assert_eq!(enriched.category, Category::Crime);
        assert_eq!(enriched.location, "Guadalajara, Mexico");
    }
}
