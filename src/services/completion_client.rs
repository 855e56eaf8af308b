//! Chat-completion client for an OpenAI-compatible provider.
//!
//! Covers both request modes: a blocking call with retry, and an SSE token
//! stream exposed as a lazy, finite sequence of text fragments.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Sampling temperature used for every request.
pub const TEMPERATURE: f32 = 0.7;

/// Answer text substituted when the provider returns empty content.
pub const NO_ANSWER_FALLBACK: &str = "No answer generated";

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error(
        "Model {model} failed after {attempts} attempt(s): {message}. \
         Try the faster llama-3.1-8b-instant model."
    )]
    Exhausted {
        model: &'static str,
        attempts: u32,
        message: String,
    },
}

/// Allow-listed model variants; anything unrecognized falls back to fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelChoice {
    Fast,
    Large,
}

impl ModelChoice {
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some("llama-3.1-70b-versatile") => ModelChoice::Large,
            _ => ModelChoice::Fast,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            ModelChoice::Fast => "llama-3.1-8b-instant",
            ModelChoice::Large => "llama-3.1-70b-versatile",
        }
    }

    /// Output-token cap; the large variant gets more headroom, and more
    /// still when streaming.
    pub fn max_tokens(&self, streaming: bool) -> u32 {
        match (self, streaming) {
            (ModelChoice::Fast, _) => 500,
            (ModelChoice::Large, false) => 800,
            (ModelChoice::Large, true) => 1024,
        }
    }

    /// Total blocking-mode attempts before the failure is surfaced.
    pub fn max_attempts(&self) -> u32 {
        match self {
            ModelChoice::Fast => 1,
            ModelChoice::Large => 2,
        }
    }
}

/// Completed blocking answer plus usage totals when the provider reports them.
#[derive(Debug, Clone)]
pub struct Completion {
    pub answer: String,
    pub tokens_used: Option<u32>,
}

/// Lazy, finite, non-restartable sequence of answer fragments.
pub type TokenStream = ReceiverStream<Result<String, CompletionError>>;

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Clone)]
pub struct CompletionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CompletionClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Blocking completion with linear-backoff retry.
    ///
    /// The fast model gets a single attempt; the large variant one retry,
    /// waiting attempt-index seconds between calls. An exhausted retry
    /// budget surfaces as an error naming the selected model.
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        model: ModelChoice,
    ) -> Result<Completion, CompletionError> {
        let attempts = model.max_attempts();
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = Duration::from_secs(attempt as u64);
                warn!(
                    "Completion attempt {} with {} failed, retrying in {:?}",
                    attempt,
                    model.id(),
                    delay
                );
                sleep(delay).await;
            }

            match self.request_completion(system, user, model).await {
                Ok(completion) => return Ok(completion),
                Err(e) => {
                    debug!("Completion attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(CompletionError::Exhausted {
            model: model.id(),
            attempts,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no response from provider".to_string()),
        })
    }

    async fn request_completion(
        &self,
        system: &str,
        user: &str,
        model: ModelChoice,
    ) -> Result<Completion, CompletionError> {
        let request = ChatCompletionRequest {
            model: model.id(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: model.max_tokens(false),
            stream: None,
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CompletionError::ApiError {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: ChatCompletionResponse = response.json().await?;

        let answer = body
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| NO_ANSWER_FALLBACK.to_string());

        Ok(Completion {
            answer,
            tokens_used: body.usage.map(|u| u.total_tokens),
        })
    }

    /// Streaming completion. No retry on this path: a failure during setup
    /// fails the whole request before any fragment is emitted.
    pub async fn stream_completion(
        &self,
        system: &str,
        user: &str,
        model: ModelChoice,
    ) -> Result<TokenStream, CompletionError> {
        let request = ChatCompletionRequest {
            model: model.id(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: model.max_tokens(true),
            stream: Some(true),
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CompletionError::ApiError {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            // SSE events can split across network chunks; buffer until a
            // full line is available.
            let mut buffer = String::new();

            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(CompletionError::HttpError(e))).await;
                        return;
                    }
                };

                let Ok(chunk) = std::str::from_utf8(&bytes) else {
                    continue;
                };
                buffer.push_str(chunk);

                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    let Some(payload) = line.trim().strip_prefix("data: ") else {
                        continue;
                    };
                    if payload == "[DONE]" {
                        return;
                    }
                    let Ok(parsed) = serde_json::from_str::<StreamChunk>(payload) else {
                        continue;
                    };
                    let text = parsed
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta.content);
                    if let Some(text) = text {
                        if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
                            // Consumer dropped the stream.
                            return;
                        }
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Startup probe; never fatal.
    pub async fn health_check(&self) -> Result<bool, CompletionError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> CompletionClient {
        CompletionClient::new(server.uri(), "test-key".to_string())
    }

    #[test]
    fn model_param_validated_against_allow_list() {
        assert_eq!(ModelChoice::from_param(None), ModelChoice::Fast);
        assert_eq!(
            ModelChoice::from_param(Some("llama-3.1-8b-instant")),
            ModelChoice::Fast
        );
        assert_eq!(
            ModelChoice::from_param(Some("llama-3.1-70b-versatile")),
            ModelChoice::Large
        );
        assert_eq!(
            ModelChoice::from_param(Some("gpt-oss-900b")),
            ModelChoice::Fast
        );
    }

    #[tokio::test]
    async fn test_complete_returns_answer_and_usage() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "model": "llama-3.1-8b-instant",
                "temperature": 0.7,
                "max_tokens": 500
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "  Mangoes are tropical.  " } }],
                "usage": { "total_tokens": 42 }
            })))
            .mount(&mock_server)
            .await;

        let completion = client(&mock_server)
            .complete("system", "user", ModelChoice::Fast)
            .await
            .unwrap();

        assert_eq!(completion.answer, "Mangoes are tropical.");
        assert_eq!(completion.tokens_used, Some(42));
    }

    #[tokio::test]
    async fn test_empty_content_falls_back_to_placeholder() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "" } }]
            })))
            .mount(&mock_server)
            .await;

        let completion = client(&mock_server)
            .complete("system", "user", ModelChoice::Fast)
            .await
            .unwrap();

        assert_eq!(completion.answer, NO_ANSWER_FALLBACK);
        assert_eq!(completion.tokens_used, None);
    }

    #[tokio::test]
    async fn test_fast_model_attempts_exactly_once() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = client(&mock_server)
            .complete("system", "user", ModelChoice::Fast)
            .await
            .unwrap_err();

        match err {
            CompletionError::Exhausted {
                model, attempts, ..
            } => {
                assert_eq!(model, "llama-3.1-8b-instant");
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_large_model_attempts_exactly_twice() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .expect(2)
            .mount(&mock_server)
            .await;

        let err = client(&mock_server)
            .complete("system", "user", ModelChoice::Large)
            .await
            .unwrap_err();

        let rendered = err.to_string();
        assert!(rendered.contains("llama-3.1-70b-versatile"));
        assert!(rendered.contains("llama-3.1-8b-instant"));
    }

    #[tokio::test]
    async fn test_stream_yields_fragments_in_order() {
        let mock_server = MockServer::start().await;

        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Man\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"goes are \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"tropical.\"}}]}\n\n",
            "data: [DONE]\n\n",
        );

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({ "stream": true, "max_tokens": 500 })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let mut stream = client(&mock_server)
            .stream_completion("system", "user", ModelChoice::Fast)
            .await
            .unwrap();

        let mut answer = String::new();
        let mut fragments = 0;
        while let Some(fragment) = stream.next().await {
            answer.push_str(&fragment.unwrap());
            fragments += 1;
        }

        assert_eq!(answer, "Mangoes are tropical.");
        assert_eq!(fragments, 3);
    }

    #[tokio::test]
    async fn test_stream_setup_failure_is_immediate() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = client(&mock_server)
            .stream_completion("system", "user", ModelChoice::Fast)
            .await
            .unwrap_err();

        match err {
            CompletionError::ApiError { status, .. } => assert_eq!(status, 500),
            other => panic!("unexpected error: {other}"),
        }
    }
}
