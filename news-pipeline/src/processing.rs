use crate::llm_adapter::ArticleAnalyzer;
use crate::traits::{ArticleStore, Geocoder, InsertOutcome};
use crate::types::{Article, Classification, CountryQualifier, LocationExtraction, PipelineError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// What a stage decided about one article.
#[derive(Debug)]
pub enum StageOutcome {
    /// Pass the (possibly augmented) article to the next stage.
    Continue(Article),
    /// The article does not qualify. Normal control flow, not an error.
    Reject(String),
}

/// One step of the enrichment pipeline. An `Err` means the collaborator failed,
/// as opposed to answering "no".
#[async_trait]
pub trait ProcessingStage: Send + Sync {
    async fn process(&self, article: Article) -> Result<StageOutcome>;

    fn stage_name(&self) -> String;
}

/// Fixed stage order: classify, extract location, geocode, persist.
pub fn build_stages(
    analyzer: Arc<dyn ArticleAnalyzer>,
    geocoder: Arc<dyn Geocoder>,
    store: Arc<dyn ArticleStore>,
    country: CountryQualifier,
) -> Vec<Box<dyn ProcessingStage>> {
    vec![
        Box::new(ClassifyStage::new(analyzer.clone())),
        Box::new(ExtractLocationStage::new(analyzer, country)),
        Box::new(GeocodeStage::new(geocoder)),
        Box::new(PersistStage::new(store)),
    ]
}

pub struct ClassifyStage {
    analyzer: Arc<dyn ArticleAnalyzer>,
}

impl ClassifyStage {
    pub fn new(analyzer: Arc<dyn ArticleAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl ProcessingStage for ClassifyStage {
    async fn process(&self, mut article: Article) -> Result<StageOutcome> {
        let classification = self
            .analyzer
            .classify(&article.entry.title, &article.entry.description)
            .await?;

        match classification {
            Classification::Category(category) => {
                debug!("Classified {:?} as {}", article.title(), category);
                article.category = Some(category);
                Ok(StageOutcome::Continue(article))
            }
            Classification::Discard => Ok(StageOutcome::Reject("no matching category".to_string())),
        }
    }

    fn stage_name(&self) -> String {
        "classify".to_string()
    }
}

pub struct ExtractLocationStage {
    analyzer: Arc<dyn ArticleAnalyzer>,
    country: CountryQualifier,
}

impl ExtractLocationStage {
    pub fn new(analyzer: Arc<dyn ArticleAnalyzer>, country: CountryQualifier) -> Self {
        Self { analyzer, country }
    }
}

#[async_trait]
impl ProcessingStage for ExtractLocationStage {
    async fn process(&self, mut article: Article) -> Result<StageOutcome> {
        let extraction = self
            .analyzer
            .extract_location(&article.entry.title, &article.entry.description)
            .await?;

        match extraction {
            LocationExtraction::Found(raw) => {
                article.location = Some(normalize_location(&raw, &self.country));
                Ok(StageOutcome::Continue(article))
            }
            LocationExtraction::NoLocation => Ok(StageOutcome::Reject("no location extracted".to_string())),
        }
    }

    fn stage_name(&self) -> String {
        "extract_location".to_string()
    }
}

/// Appends the country name unless the text already mentions the country in either
/// spelling, compared case-insensitively.
pub fn normalize_location(raw: &str, country: &CountryQualifier) -> String {
    let location = raw.trim();
    let lowered = location.to_lowercase();

    let mentions_country = [&country.name, &country.alt_name]
        .iter()
        .any(|name| lowered.contains(&name.to_lowercase()));

    if mentions_country {
        location.to_string()
    } else {
        format!("{}, {}", location, country.name)
    }
}

pub struct GeocodeStage {
    geocoder: Arc<dyn Geocoder>,
}

impl GeocodeStage {
    pub fn new(geocoder: Arc<dyn Geocoder>) -> Self {
        Self { geocoder }
    }
}

#[async_trait]
impl ProcessingStage for GeocodeStage {
    async fn process(&self, mut article: Article) -> Result<StageOutcome> {
        let location = match article.location.as_deref() {
            Some(location) => location,
            None => return Err(PipelineError::General("geocode stage reached without a location".to_string())),
        };

        match self.geocoder.geocode(location).await? {
            Some(coordinates) => {
                article.coordinates = Some(coordinates);
                Ok(StageOutcome::Continue(article))
            }
            None => Ok(StageOutcome::Reject(format!("no coordinates for {:?}", location))),
        }
    }

    fn stage_name(&self) -> String {
        "geocode".to_string()
    }
}

pub struct PersistStage {
    store: Arc<dyn ArticleStore>,
}

impl PersistStage {
    pub fn new(store: Arc<dyn ArticleStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProcessingStage for PersistStage {
    async fn process(&self, article: Article) -> Result<StageOutcome> {
        let enriched = article
            .enriched()
            .ok_or_else(|| PipelineError::General("article reached persistence incomplete".to_string()))?;

        if self.store.insert_article(&enriched).await? == InsertOutcome::Duplicate {
            debug!("Article was already stored: {}", enriched.entry.url);
        }
        Ok(StageOutcome::Continue(article))
    }

    fn stage_name(&self) -> String {
        "persist".to_string()
    }
}
