//! Morsel - retrieval-augmented chat for a food knowledge base

pub mod api;
pub mod chat;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;

// Re-export for convenience
pub use services::completion_client::{CompletionClient, ModelChoice};
pub use services::vector_client::{SearchProvider, VectorIndexClient};

// Re-export main types for convenience
pub use crate::api::routes::{create_router, AppState};
pub use crate::chat::ChatSession;
pub use crate::config::Config;
pub use crate::models::internal::{
    Conversation, Message, PerformanceMetrics, RagResponse, SearchResult,
};
pub use crate::pipeline::RagPipeline;
pub use crate::storage::JsonConversationStore;
