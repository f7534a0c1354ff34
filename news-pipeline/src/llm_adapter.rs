use crate::rss_utils::feed::extract_text_from_html;
use crate::types::{Category, Classification, LocationExtraction, PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Answer the model gives when no category fits.
pub const DISCARD_SIGNAL: &str = "DISCARD";
/// Answer the model gives when the article names no usable place.
pub const NO_LOCATION_SIGNAL: &str = "NO_LOCATION";

/// Classification and location extraction for one article
#[async_trait]
pub trait ArticleAnalyzer: Send + Sync {
    fn adapter_name(&self) -> String;

    async fn classify(&self, title: &str, description: &str) -> Result<Classification>;

    /// Returns the place name as the model wrote it; normalization is the caller's job.
    async fn extract_location(&self, title: &str, description: &str) -> Result<LocationExtraction>;
}

/// A text completion backend whose calls block the calling thread.
pub trait CompletionModel: Send + Sync + 'static {
    fn model_name(&self) -> String;

    fn complete(&self, prompt: &str) -> Result<String>;
}

/// [`ArticleAnalyzer`] over a blocking [`CompletionModel`]. Each invocation runs on
/// tokio's blocking pool, and at most `max_concurrent` of them run at once.
pub struct LlmAnalyzer<M: CompletionModel> {
    model: Arc<M>,
    permits: Arc<Semaphore>,
    valid_categories: Vec<Category>,
}

impl<M: CompletionModel> LlmAnalyzer<M> {
    pub fn new(model: M, max_concurrent: usize, valid_categories: Vec<Category>) -> Self {
        Self {
            model: Arc::new(model),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            valid_categories,
        }
    }

    async fn invoke(&self, prompt: String) -> Result<String> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;
        let model = self.model.clone();

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            model.complete(&prompt)
        })
        .await
        .map_err(|e| PipelineError::WorkerPool(format!("model invocation did not complete: {}", e)))?
    }
}

#[async_trait]
impl<M: CompletionModel> ArticleAnalyzer for LlmAnalyzer<M> {
    fn adapter_name(&self) -> String {
        format!("LLM analyzer ({})", self.model.model_name())
    }

    async fn classify(&self, title: &str, description: &str) -> Result<Classification> {
        let answer = self.invoke(classification_prompt(title, description)).await?;
        let classification = interpret_classification(&answer, &self.valid_categories);
        if classification == Classification::Discard {
            info!("Article discarded - invalid category: {}", answer.trim());
        }
        Ok(classification)
    }

    async fn extract_location(&self, title: &str, description: &str) -> Result<LocationExtraction> {
        let answer = self.invoke(location_prompt(title, description)).await?;
        Ok(interpret_location(&answer))
    }
}

pub fn classification_prompt(title: &str, description: &str) -> String {
    format!(
        "You analyze news articles published in Mexico. Sort the article below into exactly one \
of these categories: crime, infrastructure, hazard (weather alerts, fires, natural disasters) \
or social (political unrest, protests).\n\n\
If none of them clearly applies, answer \"{discard}\".\n\n\
Title: {title}\n\
Content: {content}\n\n\
Answer with the category name only (crime, infrastructure, hazard, social) or \"{discard}\".",
        discard = DISCARD_SIGNAL,
        title = title,
        content = extract_text_from_html(description),
    )
}

pub fn location_prompt(title: &str, description: &str) -> String {
    format!(
        "You analyze news articles published in Mexico. Name the most specific place in Mexico \
the article below is about: a street, neighborhood, city or state.\n\n\
If several places appear, pick the main one. If no place in Mexico is mentioned, answer \
\"{none}\".\n\n\
Title: {title}\n\
Content: {content}\n\n\
Answer with the place name only.",
        none = NO_LOCATION_SIGNAL,
        title = title,
        content = extract_text_from_html(description),
    )
}

/// Anything that is not one of `valid` after trimming and lowercasing is a discard,
/// including the explicit discard signal.
pub fn interpret_classification(answer: &str, valid: &[Category]) -> Classification {
    let cleaned = answer.trim().trim_matches(|c| c == '"' || c == '\'' || c == '.');
    match cleaned.parse::<Category>() {
        Ok(category) if valid.contains(&category) => Classification::Category(category),
        _ => Classification::Discard,
    }
}

pub fn interpret_location(answer: &str) -> LocationExtraction {
    let location = answer.trim();
    if location.is_empty() || location == NO_LOCATION_SIGNAL {
        LocationExtraction::NoLocation
    } else {
        LocationExtraction::Found(location.to_string())
    }
}

/// OpenAI-compatible chat-completions endpoint.
///
/// `complete` drives the async request on the runtime captured at construction, so
/// it must only be called from a blocking-pool thread, which is what
/// [`LlmAnalyzer`] does.
pub struct ChatCompletionModel {
    http: reqwest::Client,
    handle: Handle,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionModel {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| PipelineError::Config(format!("no tokio runtime for LLM client: {}", e)))?;
        let http = reqwest::Client::builder()
            .user_agent("News-Pipeline/1.0")
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http,
            handle,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            top_p: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![Msg {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
            top_p: 0.9,
            max_tokens: 500,
        };

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&req);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Llm(format!("completion endpoint returned HTTP {}", status)));
        }

        let body: Resp = response.json().await?;
        let answer = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| PipelineError::Llm("completion response had no choices".to_string()))?;

        debug!("Model {} answered: {}", self.model, answer);
        Ok(answer)
    }
}

impl CompletionModel for ChatCompletionModel {
    fn model_name(&self) -> String {
        self.model.clone()
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.handle.block_on(self.request(prompt))
    }
}
