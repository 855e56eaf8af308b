//! Prompt construction from retrieved passages.

use crate::models::internal::SearchResult;

/// Fixed system instruction for every completion request.
pub const SYSTEM_PROMPT: &str = "You are a helpful food knowledge assistant. \
     Answer questions based on the provided context. Be concise and informative.";

/// Concatenate retrieved passages into a grounding block.
///
/// Each passage is prefixed with its 1-based rank in brackets, passages
/// separated by a blank line. No truncation or deduplication: the caller
/// guarantees the set fits the context window (fixed top-3).
pub fn assemble_context(sources: &[SearchResult]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(index, source)| format!("[{}] {}", index + 1, source.metadata.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// User message carrying the grounding block and the question.
pub fn build_user_prompt(context: &str, question: &str) -> String {
    format!("Context:\n{context}\n\nQuestion: {question}\n\nAnswer based on the context above:")
}
