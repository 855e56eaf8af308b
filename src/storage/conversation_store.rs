//! Local persistence for the conversation log.
//!
//! One JSON file holds the whole list of conversations. The store is an
//! explicit object constructed once at startup and passed by reference;
//! it is written after every conversation-list change and read once on
//! load. Loading fails closed: a missing, malformed, or schema-mismatched
//! file yields an empty list, never an error.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::models::internal::Conversation;

pub const CONVERSATIONS_FILE: &str = "conversations.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct JsonConversationStore {
    path: PathBuf,
}

impl JsonConversationStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store rooted in the given data directory.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(CONVERSATIONS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted conversation list.
    ///
    /// Corrupt or missing state is treated as empty so the chat remains
    /// usable; the caller creates a fresh conversation on top.
    pub fn load(&self) -> Vec<Conversation> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Failed to read conversation log {:?}: {}", self.path, e);
                return Vec::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!(
                    "Malformed conversation log {:?}, starting empty: {}",
                    self.path, e
                );
                Vec::new()
            }
        }
    }

    /// Serialize the full conversation list to disk.
    pub fn save(&self, conversations: &[Conversation]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string(conversations)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::internal::Message;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonConversationStore::in_dir(dir.path());
        assert!(store.load().is_empty());
    }

    #[test]
    fn save_then_load_round_trips_timestamps() {
        let dir = TempDir::new().unwrap();
        let store = JsonConversationStore::in_dir(dir.path());

        let mut conversation = Conversation::new();
        conversation.title = "Mango questions".to_string();
        conversation
            .messages
            .push(Message::pending("What about mangoes?".to_string()));

        store.save(std::slice::from_ref(&conversation)).unwrap();
        let loaded = store.load();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, conversation.id);
        assert_eq!(loaded[0].title, "Mango questions");
        assert_eq!(loaded[0].created_at, conversation.created_at);
        assert_eq!(loaded[0].messages.len(), 1);
        assert_eq!(loaded[0].messages[0].question, "What about mangoes?");
    }

    #[test]
    fn malformed_json_loads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonConversationStore::in_dir(dir.path());
        fs::write(store.path(), "{not json at all").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn schema_mismatch_loads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonConversationStore::in_dir(dir.path());
        // Valid JSON, wrong shape.
        fs::write(store.path(), r#"[{"label": "not a conversation"}]"#).unwrap();
        assert!(store.load().is_empty());
    }
}
