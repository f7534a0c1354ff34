use crate::traits::Geocoder;
use crate::types::{Coordinates, PipelineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const MAPBOX_API_URL: &str = "https://api.mapbox.com";

#[derive(Debug, Deserialize)]
struct MapboxResponse {
    #[serde(default)]
    features: Vec<MapboxFeature>,
}

#[derive(Debug, Deserialize)]
struct MapboxFeature {
    /// `[longitude, latitude]`
    center: [f64; 2],
    #[serde(default)]
    place_name: Option<String>,
}

/// Mapbox forward geocoding, limited to one country and the single best match.
pub struct MapboxGeocoder {
    client: Client,
    base_url: String,
    access_token: String,
    country_code: String,
}

impl MapboxGeocoder {
    pub fn new(access_token: &str, country_code: &str) -> Result<Self> {
        Self::with_base_url(MAPBOX_API_URL, access_token, country_code)
    }

    pub fn with_base_url(base_url: &str, access_token: &str, country_code: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent("News-Pipeline/1.0")
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            access_token: access_token.to_string(),
            country_code: country_code.to_lowercase(),
        })
    }

    fn endpoint(&self, location: &str) -> Result<Url> {
        let file_name = format!("{}.json", location);
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| PipelineError::Geocoding(format!("base URL cannot carry a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["geocoding", "v5", "mapbox.places", file_name.as_str()]);
        url.query_pairs_mut()
            .append_pair("access_token", &self.access_token)
            .append_pair("limit", "1")
            .append_pair("country", &self.country_code);
        Ok(url)
    }
}

#[async_trait]
impl Geocoder for MapboxGeocoder {
    async fn geocode(&self, location: &str) -> Result<Option<Coordinates>> {
        let url = self.endpoint(location)?;
        debug!("Geocoding location: {}", location);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Geocoding(format!(
                "geocoding request for {:?} returned HTTP {}",
                location, status
            )));
        }

        let body: MapboxResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Geocoding(format!("failed to parse geocoding response: {}", e)))?;

        match body.features.into_iter().next() {
            Some(feature) => {
                let [longitude, latitude] = feature.center;
                debug!(
                    "Geocoded {} -> ({}, {}) [{}]",
                    location,
                    longitude,
                    latitude,
                    feature.place_name.as_deref().unwrap_or("")
                );
                Ok(Some(Coordinates { longitude, latitude }))
            }
            None => {
                warn!("Location not found by geocoding API: {}", location);
                Ok(None)
            }
        }
    }

    fn geocoder_name(&self) -> String {
        "mapbox".to_string()
    }
}
