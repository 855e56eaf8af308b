use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata bag attached to every indexed passage.
///
/// Absent fields deserialize to empty strings so a sparse index entry
/// never fails a whole query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub origin: String,
}

/// One nearest-neighbor hit from the vector index.
///
/// Field names are the wire format: this struct is serialized verbatim
/// into JSON responses and the `X-Sources` header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    /// 0-1 cosine similarity as reported by the index.
    pub score: f32,
    pub metadata: SourceMetadata,
}

impl SearchResult {
    /// Similarity rendered as a whole percentage (0.92 -> 92).
    pub fn relevance_percent(&self) -> u32 {
        (self.score * 100.0).round() as u32
    }
}

/// Per-request latency and usage figures, whole milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub vector_search_time: u64,
    pub llm_processing_time: u64,
    pub total_response_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
}

/// Result of one blocking retrieval-augmented query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    pub sources: Vec<SearchResult>,
    pub answer: String,
    pub metrics: PerformanceMetrics,
}

/// One question/answer exchange inside a conversation.
///
/// Created in the pending (loading) state when a question is submitted
/// and mutated in place as the answer arrives; terminal state is either
/// answered or failed with an inline error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub question: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PerformanceMetrics>,
    #[serde(default)]
    pub is_loading: bool,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn pending(question: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            question,
            answer: String::new(),
            sources: Vec::new(),
            metrics: None,
            is_loading: true,
            is_streaming: false,
            error: None,
            timestamp: Utc::now(),
        }
    }
}

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Chat";

/// A named list of exchanges. The conversation log keeps the most
/// recently created conversation first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: DEFAULT_CONVERSATION_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a submitted question is still waiting for its answer.
    pub fn has_pending_message(&self) -> bool {
        self.messages.iter().any(|m| m.is_loading)
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
