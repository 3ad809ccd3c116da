//! Web search capability used by the Researcher.
//!
//! Production runs call the Tavily search API; `StaticSearch` serves canned
//! responses for tests and offline runs.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SearchError;
use crate::security::SecretValue;

pub const DEFAULT_TAVILY_URL: &str = "https://api.tavily.com";

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<SearchResponse, SearchError>;
}

pub type DynSearch = Arc<dyn SearchProvider>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

/// One search result. Providers disagree on where the URL lives, so every
/// known location is kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub source: Option<HitSource>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HitSource {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

impl SearchHit {
    pub fn with_url(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// First non-blank of `url`, `link`, `source.url`, `source.id`.
    pub fn resolved_url(&self) -> Option<&str> {
        let nested = self.source.as_ref();
        [
            self.url.as_deref(),
            self.link.as_deref(),
            nested.and_then(|source| source.url.as_deref()),
            nested.and_then(|source| source.id.as_deref()),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|candidate| !candidate.is_empty())
    }
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
    include_answer: bool,
}

/// Tavily search API client. One attempt per call; failures surface as-is.
pub struct TavilyClient {
    client: Client,
    api_key: SecretValue,
    base_url: String,
}

impl TavilyClient {
    pub fn new(api_key: SecretValue) -> Self {
        Self::with_base_url(api_key, DEFAULT_TAVILY_URL)
    }

    pub fn with_base_url(api_key: SecretValue, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<SearchResponse, SearchError> {
        debug!(%query, max_results, "tavily search");

        let request = TavilyRequest {
            query,
            max_results,
            include_answer: true,
        };

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|err| SearchError::Network(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<SearchResponse>()
                .await
                .map_err(|err| SearchError::Decode(err.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(SearchError::Unauthorized),
            429 => Err(SearchError::RateLimited),
            code => Err(SearchError::Http(code, body)),
        }
    }
}

/// In-memory search provider for tests and offline runs.
///
/// Replies with the first registered response whose needle occurs in the
/// query, falling back to the default response.
#[derive(Default)]
pub struct StaticSearch {
    routes: Vec<(String, SearchResponse)>,
    fallback: SearchResponse,
    failure: Option<String>,
    queries: Mutex<Vec<String>>,
}

impl StaticSearch {
    pub fn new(fallback: SearchResponse) -> Self {
        Self {
            fallback,
            ..Self::default()
        }
    }

    /// A provider whose every call fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_route(mut self, needle: impl Into<String>, response: SearchResponse) -> Self {
        self.routes.push((needle.into(), response));
        self
    }

    /// Queries received so far, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<SearchResponse, SearchError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }

        if let Some(reason) = &self.failure {
            return Err(SearchError::Unavailable(reason.clone()));
        }

        let mut response = self
            .routes
            .iter()
            .find(|(needle, _)| query.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.fallback.clone());
        response.results.truncate(max_results);
        Ok(response)
    }
}
