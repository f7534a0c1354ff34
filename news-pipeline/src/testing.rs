//! In-memory collaborators for exercising the pipeline without a database, a model
//! server or a geocoding service. Used by unit and integration tests.

use crate::llm_adapter::ArticleAnalyzer;
use crate::traits::{ArticleStore, Geocoder, InsertOutcome};
use crate::types::{
    Classification, Coordinates, EnrichedArticle, FeedEntry, LocationExtraction, PipelineError, Result,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn sample_entry(url: &str, title: &str) -> FeedEntry {
    FeedEntry {
        source_name: "Example News".to_string(),
        title: title.to_string(),
        description: format!("<p>{}</p>", title),
        url: url.to_string(),
        published_date: NaiveDate::from_ymd_opt(2024, 5, 14).unwrap_or_default(),
    }
}

/// Article store backed by a set of URLs and a list of inserted rows.
#[derive(Default)]
pub struct MemoryStore {
    known: Mutex<HashSet<String>>,
    inserted: Mutex<Vec<EnrichedArticle>>,
    insert_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_known_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: Mutex::new(urls.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn inserted(&self) -> Vec<EnrichedArticle> {
        self.inserted.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn load_known_urls(&self) -> Result<HashSet<String>> {
        let known = self
            .known
            .lock()
            .map_err(|_| PipelineError::General("memory store poisoned".to_string()))?;
        Ok(known.clone())
    }

    async fn insert_article(&self, article: &EnrichedArticle) -> Result<InsertOutcome> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        let mut known = self
            .known
            .lock()
            .map_err(|_| PipelineError::General("memory store poisoned".to_string()))?;
        if !known.insert(article.entry.url.clone()) {
            return Ok(InsertOutcome::Duplicate);
        }

        if let Ok(mut rows) = self.inserted.lock() {
            rows.push(article.clone());
        }
        Ok(InsertOutcome::Inserted)
    }
}

/// Analyzer that answers from per-title scripts. Unscripted titles are discarded
/// and have no location.
#[derive(Default)]
pub struct ScriptedAnalyzer {
    classifications: HashMap<String, Classification>,
    locations: HashMap<String, LocationExtraction>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    classify_calls: AtomicUsize,
    extract_calls: AtomicUsize,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify_as(mut self, title: &str, classification: Classification) -> Self {
        self.classifications.insert(title.to_string(), classification);
        self
    }

    pub fn locate_as(mut self, title: &str, location: LocationExtraction) -> Self {
        self.locations.insert(title.to_string(), location);
        self
    }

    /// Both operations return an error for this title.
    pub fn failing_for(mut self, title: &str) -> Self {
        self.failing.insert(title.to_string());
        self
    }

    /// Classification panics for this title.
    pub fn panicking_for(mut self, title: &str) -> Self {
        self.panicking.insert(title.to_string());
        self
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self, title: &str) -> Result<()> {
        if self.failing.contains(title) {
            return Err(PipelineError::Llm(format!("scripted failure for {:?}", title)));
        }
        Ok(())
    }
}

#[async_trait]
impl ArticleAnalyzer for ScriptedAnalyzer {
    fn adapter_name(&self) -> String {
        "scripted".to_string()
    }

    async fn classify(&self, title: &str, _description: &str) -> Result<Classification> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        if self.panicking.contains(title) {
            panic!("scripted panic for {:?}", title);
        }
        self.check_failure(title)?;
        Ok(self
            .classifications
            .get(title)
            .cloned()
            .unwrap_or(Classification::Discard))
    }

    async fn extract_location(&self, title: &str, _description: &str) -> Result<LocationExtraction> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure(title)?;
        Ok(self
            .locations
            .get(title)
            .cloned()
            .unwrap_or(LocationExtraction::NoLocation))
    }
}

/// Geocoder with a fixed gazetteer. Unknown places resolve to nothing.
#[derive(Default)]
pub struct StaticGeocoder {
    places: HashMap<String, Coordinates>,
    failing: HashSet<String>,
    queried: Mutex<Vec<String>>,
}

impl StaticGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_place(mut self, location: &str, longitude: f64, latitude: f64) -> Self {
        self.places
            .insert(location.to_string(), Coordinates { longitude, latitude });
        self
    }

    pub fn failing_for(mut self, location: &str) -> Self {
        self.failing.insert(location.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.queried.lock().map(|q| q.len()).unwrap_or_default()
    }

    /// Every location passed to `geocode`, in call order.
    pub fn queried(&self) -> Vec<String> {
        self.queried.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn geocode(&self, location: &str) -> Result<Option<Coordinates>> {
        if let Ok(mut queried) = self.queried.lock() {
            queried.push(location.to_string());
        }
        if self.failing.contains(location) {
            return Err(PipelineError::Geocoding(format!("scripted failure for {:?}", location)));
        }
        Ok(self.places.get(location).copied())
    }

    fn geocoder_name(&self) -> String {
        "static".to_string()
    }
}
