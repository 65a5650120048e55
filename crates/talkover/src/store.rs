//! Conversation record and the persistence seam.
//!
//! The controller only appends committed turns; format and storage medium
//! belong to the embedder. An in-memory store ships for tests and demos.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("conversation store failure: {0}")]
    Failure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One role-tagged entry in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// Append-only list of messages under a stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
        }
    }
}

/// Persistence capability consumed by the controller.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn upsert(&self, conversation: &Conversation) -> Result<(), StoreError>;
    async fn load_all(&self) -> Result<Vec<Conversation>, StoreError>;
}

/// In-memory [`ConversationStore`], keyed by conversation id.
#[derive(Default)]
pub struct MemoryStore {
    conversations: Mutex<BTreeMap<String, Conversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.conversations.lock().get(id).cloned()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn upsert(&self, conversation: &Conversation) -> Result<(), StoreError> {
        self.conversations
            .lock()
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Conversation>, StoreError> {
        Ok(self.conversations.lock().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_upserts_and_loads() {
        let store = MemoryStore::new();
        let mut conversation = Conversation::new("c1");
        conversation.messages.push(Message::user("hello"));
        store.upsert(&conversation).await.unwrap();

        conversation.messages.push(Message::assistant("hi"));
        store.upsert(&conversation).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].messages.len(), 2);
    }

    #[test]
    fn conversation_round_trips_through_json() {
        let mut conversation = Conversation::new("c1");
        conversation.messages.push(Message::user("xin chào"));
        conversation.messages.push(Message::assistant("Chào bạn!"));

        let json = serde_json::to_string(&conversation).unwrap();
        let back: Conversation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, conversation);
    }
}
