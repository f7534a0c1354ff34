use crate::types::{Coordinates, EnrichedArticle, Result};
use async_trait::async_trait;
use std::collections::HashSet;

/// Result of an insert attempt. Duplicates are expected after a restart races the
/// bootstrap load, so they are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Durable home of enriched articles
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// URLs of every article already stored. Called once at startup.
    async fn load_known_urls(&self) -> Result<HashSet<String>>;

    /// Append one enriched article. Must tolerate the same URL twice.
    async fn insert_article(&self, article: &EnrichedArticle) -> Result<InsertOutcome>;
}

/// Turns a free-text place name into coordinates
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` means the service answered but found nothing.
    async fn geocode(&self, location: &str) -> Result<Option<Coordinates>>;

    fn geocoder_name(&self) -> String;
}
