//! HTTP client for the external vector index (Upstash-style REST API).
//!
//! The index does its own embedding: we query by raw question text and it
//! returns the nearest stored passages with similarity scores and metadata.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::internal::{SearchResult, SourceMetadata};

/// Fixed neighbor count; callers rely on the retrieved set fitting the
/// model context window by construction.
pub const TOP_K: u32 = 3;

#[derive(Error, Debug)]
pub enum VectorError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Vector index error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Seam for the vector collaborator, mockable in tests.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Top-K nearest passages for a raw query string, best first.
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, VectorError>;
}

#[derive(Debug, Serialize)]
struct VectorQueryRequest<'a> {
    data: &'a str,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "includeMetadata")]
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct VectorQueryResponse {
    result: Vec<RawResult>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    id: String,
    score: f32,
    metadata: Option<SourceMetadata>,
}

pub struct VectorIndexClient {
    base_url: String,
    token: String,
    client: Client,
}

impl VectorIndexClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client: Client::new(),
        }
    }

    fn query_url(&self) -> String {
        format!("{}/query", self.base_url)
    }
}

#[async_trait]
impl SearchProvider for VectorIndexClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, VectorError> {
        let request = VectorQueryRequest {
            data: query,
            top_k: TOP_K,
            include_metadata: true,
        };

        let response = self
            .client
            .post(self.query_url())
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body: VectorQueryResponse = response.json().await?;
                let results = body
                    .result
                    .into_iter()
                    .map(|r| SearchResult {
                        id: r.id,
                        score: r.score,
                        metadata: r.metadata.unwrap_or_default(),
                    })
                    .collect::<Vec<_>>();
                tracing::debug!("Vector index returned {} passages", results.len());
                Ok(results)
            }
            status => {
                let message = response.text().await?;
                Err(VectorError::ApiError {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

/// Canned provider for tests.
pub struct MockSearchProvider {
    pub results: Vec<SearchResult>,
    pub fail: bool,
    pub call_count: std::sync::Arc<std::sync::Mutex<usize>>,
}

impl MockSearchProvider {
    pub fn with_results(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            fail: false,
            call_count: std::sync::Arc::new(std::sync::Mutex::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            results: Vec::new(),
            fail: true,
            call_count: std::sync::Arc::new(std::sync::Mutex::new(0)),
        }
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, _query: &str) -> Result<Vec<SearchResult>, VectorError> {
        *self.call_count.lock().unwrap() += 1;
        if self.fail {
            return Err(VectorError::ApiError {
                status: 503,
                message: "index unavailable".to_string(),
            });
        }
        Ok(self.results.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_search_parses_results() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/query"))
            .and(body_partial_json(json!({
                "data": "tropical fruit",
                "topK": 3,
                "includeMetadata": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [
                    {
                        "id": "1",
                        "score": 0.92,
                        "metadata": {
                            "text": "Mangoes are grown in...",
                            "category": "fruit",
                            "origin": "Asia"
                        }
                    },
                    { "id": "2", "score": 0.55 }
                ]
            })))
            .mount(&mock_server)
            .await;

        let client = VectorIndexClient::new(mock_server.uri(), "test-token".to_string());
        let results = client.search("tropical fruit").await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "1");
        assert_eq!(results[0].metadata.origin, "Asia");
        // Missing metadata falls back to empty fields rather than failing.
        assert_eq!(results[1].metadata.text, "");
    }

    #[tokio::test]
    async fn test_search_surfaces_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(503).set_body_string("index down"))
            .mount(&mock_server)
            .await;

        let client = VectorIndexClient::new(mock_server.uri(), "test-token".to_string());
        let err = client.search("anything").await.unwrap_err();

        match err {
            VectorError::ApiError { status, .. } => assert_eq!(status, 503),
            other => panic!("unexpected error: {other}"),
        }
    }
}
