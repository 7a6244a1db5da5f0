use crate::error::Result;
use crate::parser::Units;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Transport collaborator: one GET, one attempt. Any failure (network
/// error, timeout, non-2xx status, unreadable body) surfaces as `None`
/// and the missing hour is retried naturally on a later cycle.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<String>;
}

pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent("owmh-ingest/0.1.0")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("request failed: {e}");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("request returned status {}", response.status());
            return None;
        }

        match response.text().await {
            Ok(body) => {
                debug!(bytes = body.len(), "fetched response body");
                Some(body)
            }
            Err(e) => {
                warn!("failed to read response body: {e}");
                None
            }
        }
    }
}

/// Builds timemachine request URLs by substituting coordinates, an
/// hour-aligned unix timestamp, the API key and the unit-system string
/// into the configured base URL.
#[derive(Debug, Clone)]
pub struct UrlTemplate {
    base_url: String,
    api_key: String,
}

impl UrlTemplate {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches(['/', '?']).to_string(),
            api_key: api_key.to_string(),
        }
    }

    pub fn timemachine(&self, lat: f64, lon: f64, timestamp: i64, units: Units) -> String {
        format!(
            "{}?lat={}&lon={}&dt={}&appid={}&units={}",
            self.base_url,
            lat,
            lon,
            timestamp,
            self.api_key,
            units.as_api_str()
        )
    }
}
