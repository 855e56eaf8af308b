//! Retrieval-augmentation pipeline: search, context assembly, completion,
//! response packaging. One request moves through
//! `pending -> searching -> generating -> {completed | failed}`.

pub mod context;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::debug;

use crate::models::internal::{PerformanceMetrics, RagResponse, SearchResult};
use crate::services::completion_client::{
    CompletionClient, CompletionError, ModelChoice, TokenStream,
};
use crate::services::vector_client::{SearchProvider, VectorError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Question is required")]
    InvalidQuestion,
    #[error("Vector search failed: {0}")]
    Search(#[from] VectorError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

/// Streaming-mode result handle.
///
/// Sources and timing markers travel out-of-band (response headers); the
/// answer itself is drained from `tokens` by ordinary iteration.
pub struct StreamingAnswer {
    pub sources: Vec<SearchResult>,
    /// Vector-search latency, whole milliseconds.
    pub vector_search_ms: u64,
    /// Request start, unix milliseconds.
    pub start_time_ms: i64,
    /// Moment the token stream was requested, unix milliseconds.
    pub llm_start_ms: i64,
    pub tokens: TokenStream,
}

pub struct RagPipeline {
    search: Arc<dyn SearchProvider>,
    completion: Arc<CompletionClient>,
}

fn elapsed_ms(since: Instant) -> u64 {
    (since.elapsed().as_secs_f64() * 1000.0).round() as u64
}

impl RagPipeline {
    pub fn new(search: Arc<dyn SearchProvider>, completion: Arc<CompletionClient>) -> Self {
        Self { search, completion }
    }

    fn validate(question: &str) -> Result<(), PipelineError> {
        if question.trim().is_empty() {
            return Err(PipelineError::InvalidQuestion);
        }
        Ok(())
    }

    async fn retrieve(&self, question: &str) -> Result<(Vec<SearchResult>, u64), PipelineError> {
        debug!(phase = "searching", "Querying vector index");
        let search_start = Instant::now();
        let sources = self.search.search(question).await?;
        Ok((sources, elapsed_ms(search_start)))
    }

    /// Blocking query: returns the full answer with sources and metrics.
    pub async fn answer(
        &self,
        question: &str,
        model: Option<&str>,
    ) -> Result<RagResponse, PipelineError> {
        Self::validate(question)?;
        let model = ModelChoice::from_param(model);
        let start = Instant::now();

        let (sources, vector_search_time) = self.retrieve(question).await?;

        let context = context::assemble_context(&sources);
        let user_prompt = context::build_user_prompt(&context, question);

        debug!(phase = "generating", model = model.id(), "Requesting completion");
        let llm_start = Instant::now();
        let completion = self
            .completion
            .complete(context::SYSTEM_PROMPT, &user_prompt, model)
            .await?;
        let llm_processing_time = elapsed_ms(llm_start);

        let metrics = PerformanceMetrics {
            vector_search_time,
            llm_processing_time,
            total_response_time: elapsed_ms(start),
            tokens_used: completion.tokens_used,
        };

        debug!(
            phase = "completed",
            total_ms = metrics.total_response_time,
            "Query finished"
        );

        Ok(RagResponse {
            sources,
            answer: completion.answer,
            metrics,
        })
    }

    /// Streaming query: performs the search, opens the token stream, and
    /// hands both back. Any failure up to stream setup fails the whole
    /// request before the first fragment.
    pub async fn answer_stream(
        &self,
        question: &str,
        model: Option<&str>,
    ) -> Result<StreamingAnswer, PipelineError> {
        Self::validate(question)?;
        let model = ModelChoice::from_param(model);
        let start_time_ms = Utc::now().timestamp_millis();

        let (sources, vector_search_ms) = self.retrieve(question).await?;

        let context = context::assemble_context(&sources);
        let user_prompt = context::build_user_prompt(&context, question);

        debug!(phase = "generating", model = model.id(), "Opening token stream");
        let llm_start_ms = Utc::now().timestamp_millis();
        let tokens = self
            .completion
            .stream_completion(context::SYSTEM_PROMPT, &user_prompt, model)
            .await?;

        Ok(StreamingAnswer {
            sources,
            vector_search_ms,
            start_time_ms,
            llm_start_ms,
            tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::internal::SourceMetadata;
    use crate::services::vector_client::MockSearchProvider;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mango_source() -> SearchResult {
        SearchResult {
            id: "1".to_string(),
            score: 0.92,
            metadata: SourceMetadata {
                text: "Mangoes are grown in...".to_string(),
                category: "fruit".to_string(),
                origin: "Asia".to_string(),
            },
        }
    }

    async fn completion_stub(answer: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": answer } }],
                "usage": { "total_tokens": 17 }
            })))
            .mount(&mock_server)
            .await;
        mock_server
    }

    fn pipeline(search: MockSearchProvider, server: &MockServer) -> RagPipeline {
        RagPipeline::new(
            Arc::new(search),
            Arc::new(CompletionClient::new(
                server.uri(),
                "test-key".to_string(),
            )),
        )
    }

    #[tokio::test]
    async fn test_answer_packages_sources_and_metrics() {
        let server = completion_stub("Mangoes are tropical fruits.").await;
        let pipeline = pipeline(
            MockSearchProvider::with_results(vec![mango_source()]),
            &server,
        );

        let response = pipeline
            .answer("What fruits are popular in tropical regions?", None)
            .await
            .unwrap();

        assert_eq!(response.answer, "Mangoes are tropical fruits.");
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].relevance_percent(), 92);
        assert_eq!(response.metrics.tokens_used, Some(17));
        // Latencies are whole milliseconds within the total wall-clock span.
        assert!(response.metrics.total_response_time >= response.metrics.llm_processing_time);
    }

    #[tokio::test]
    async fn test_blank_question_rejected_before_any_call() {
        let server = completion_stub("unused").await;
        let search = MockSearchProvider::with_results(vec![mango_source()]);
        let calls = search.call_count.clone();
        let pipeline = pipeline(search, &server);

        let err = pipeline.answer("   ", None).await.unwrap_err();

        assert!(matches!(err, PipelineError::InvalidQuestion));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_failure_propagates_without_retry() {
        let server = completion_stub("unused").await;
        let search = MockSearchProvider::failing();
        let calls = search.call_count.clone();
        let pipeline = pipeline(search, &server);

        let err = pipeline.answer("any question", None).await.unwrap_err();

        assert!(matches!(err, PipelineError::Search(_)));
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
