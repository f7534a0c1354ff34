use crate::traits::ArticleStore;
use crate::types::Result;
use std::collections::HashSet;
use tracing::info;

/// URLs of every article that has been scheduled for processing, this run or a
/// previous one. Keys are never removed while the process lives.
///
/// Owned by the ingestion coordinator; there is no interior locking.
#[derive(Debug, Default)]
pub struct DedupStore {
    known_urls: HashSet<String>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_urls<I>(urls: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            known_urls: urls.into_iter().collect(),
        }
    }

    /// Seed from durable storage.
    pub async fn bootstrap(store: &dyn ArticleStore) -> Result<Self> {
        let known_urls = store.load_known_urls().await?;
        info!("Initialized dedup store with {} existing articles", known_urls.len());
        Ok(Self { known_urls })
    }

    pub fn is_known(&self, url: &str) -> bool {
        self.known_urls.contains(url)
    }

    /// Returns `true` when the URL was not known before.
    pub fn mark_known(&mut self, url: String) -> bool {
        self.known_urls.insert(url)
    }

    pub fn len(&self) -> usize {
        self.known_urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known_urls.is_empty()
    }
}
