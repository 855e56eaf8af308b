//! In-memory conversation manager over the JSON store.
//!
//! Mirrors the chat surface: one current conversation, most recently
//! created first, at most one pending exchange per conversation. Every
//! mutation is written back to the store; persistence failures are logged
//! and never break the session.

use tracing::warn;
use uuid::Uuid;

use crate::models::internal::{
    Conversation, Message, PerformanceMetrics, SearchResult, DEFAULT_CONVERSATION_TITLE,
};
use crate::storage::JsonConversationStore;

/// Max title length derived from the first question.
const TITLE_MAX_LEN: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("A question is already pending in this conversation")]
    PendingExchange,
    #[error("Unknown conversation: {0}")]
    UnknownConversation(Uuid),
    #[error("Unknown message: {0}")]
    UnknownMessage(Uuid),
}

pub struct ChatSession {
    store: JsonConversationStore,
    conversations: Vec<Conversation>,
    current_id: Uuid,
}

fn derive_title(question: &str) -> String {
    if question.chars().count() > TITLE_MAX_LEN {
        let truncated: String = question.chars().take(TITLE_MAX_LEN).collect();
        format!("{truncated}...")
    } else {
        question.to_string()
    }
}

impl ChatSession {
    /// Rehydrate from disk. The first persisted conversation becomes
    /// current; empty or corrupt state gets a fresh "New Chat" instead.
    pub fn open(store: JsonConversationStore) -> Self {
        let conversations = store.load();
        let mut session = Self {
            store,
            conversations,
            current_id: Uuid::nil(),
        };

        match session.conversations.first() {
            Some(first) => session.current_id = first.id,
            None => {
                session.new_conversation();
            }
        }
        session
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.conversations) {
            warn!("Failed to persist conversation log: {}", e);
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn current_id(&self) -> Uuid {
        self.current_id
    }

    pub fn current(&self) -> &Conversation {
        self.conversations
            .iter()
            .find(|c| c.id == self.current_id)
            .unwrap_or_else(|| unreachable!("current conversation always exists"))
    }

    fn current_mut(&mut self) -> &mut Conversation {
        let id = self.current_id;
        self.conversations
            .iter_mut()
            .find(|c| c.id == id)
            .unwrap_or_else(|| unreachable!("current conversation always exists"))
    }

    /// Prepend a fresh "New Chat" and make it current.
    pub fn new_conversation(&mut self) -> Uuid {
        let conversation = Conversation::new();
        let id = conversation.id;
        self.conversations.insert(0, conversation);
        self.current_id = id;
        self.persist();
        id
    }

    pub fn select_conversation(&mut self, id: Uuid) -> Result<(), ChatError> {
        if !self.conversations.iter().any(|c| c.id == id) {
            return Err(ChatError::UnknownConversation(id));
        }
        self.current_id = id;
        Ok(())
    }

    /// Remove a conversation. Deleting the current one switches to the
    /// first remaining; deleting the last creates a fresh "New Chat".
    pub fn delete_conversation(&mut self, id: Uuid) {
        self.conversations.retain(|c| c.id != id);

        if self.current_id == id {
            match self.conversations.first() {
                Some(first) => self.current_id = first.id,
                None => {
                    self.new_conversation();
                    return; // new_conversation already persisted
                }
            }
        }
        self.persist();
    }

    /// Append a pending exchange for a freshly submitted question.
    ///
    /// Rejected while another exchange in the current conversation is
    /// still loading: submission is one-at-a-time per conversation.
    pub fn begin_exchange(&mut self, question: &str) -> Result<Uuid, ChatError> {
        if self.current().has_pending_message() {
            return Err(ChatError::PendingExchange);
        }

        let message = Message::pending(question.to_string());
        let message_id = message.id;
        let title = derive_title(question);

        let conversation = self.current_mut();
        if conversation.title == DEFAULT_CONVERSATION_TITLE {
            conversation.title = title;
        }
        conversation.messages.push(message);
        conversation.updated_at = chrono::Utc::now();

        self.persist();
        Ok(message_id)
    }

    fn message_mut(&mut self, message_id: Uuid) -> Result<&mut Message, ChatError> {
        let id = self.current_id;
        self.conversations
            .iter_mut()
            .find(|c| c.id == id)
            .and_then(|c| c.messages.iter_mut().find(|m| m.id == message_id))
            .ok_or(ChatError::UnknownMessage(message_id))
    }

    /// Streaming mutation: grow the in-progress answer one fragment at a
    /// time so the partial answer is observable after every chunk.
    pub fn append_answer_chunk(&mut self, message_id: Uuid, chunk: &str) -> Result<(), ChatError> {
        let message = self.message_mut(message_id)?;
        message.answer.push_str(chunk);
        message.is_streaming = true;
        self.persist();
        Ok(())
    }

    /// Resolve a pending exchange with its full answer.
    pub fn complete_exchange(
        &mut self,
        message_id: Uuid,
        answer: String,
        sources: Vec<SearchResult>,
        metrics: Option<PerformanceMetrics>,
    ) -> Result<(), ChatError> {
        let message = self.message_mut(message_id)?;
        message.answer = answer;
        message.sources = sources;
        message.metrics = metrics;
        message.is_loading = false;
        message.is_streaming = false;

        self.current_mut().updated_at = chrono::Utc::now();
        self.persist();
        Ok(())
    }

    /// Mark the end of a token stream without replacing the accumulated
    /// answer text.
    pub fn finish_stream(
        &mut self,
        message_id: Uuid,
        sources: Vec<SearchResult>,
        metrics: Option<PerformanceMetrics>,
    ) -> Result<(), ChatError> {
        let message = self.message_mut(message_id)?;
        message.sources = sources;
        message.metrics = metrics;
        message.is_loading = false;
        message.is_streaming = false;

        self.current_mut().updated_at = chrono::Utc::now();
        self.persist();
        Ok(())
    }

    /// Record a failure inline; the conversation stays usable for the
    /// next question.
    pub fn fail_exchange(&mut self, message_id: Uuid, error: String) -> Result<(), ChatError> {
        let message = self.message_mut(message_id)?;
        message.error = Some(error);
        message.is_loading = false;
        message.is_streaming = false;

        self.current_mut().updated_at = chrono::Utc::now();
        self.persist();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_shorter_than_limit_is_kept() {
        assert_eq!(derive_title("What about mangoes?"), "What about mangoes?");
    }

    #[test]
    fn long_title_is_truncated_with_ellipsis() {
        let question = "a".repeat(60);
        let title = derive_title(&question);
        assert_eq!(title.chars().count(), TITLE_MAX_LEN + 3);
        assert!(title.ends_with("..."));
    }
}
