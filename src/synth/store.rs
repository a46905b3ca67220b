//! Conversation persistence boundary.
//!
//! Turns only ever append to a conversation; the store is the single place
//! history is read back from. The in-memory implementation covers embedded
//! and test use; a durable backend slots in behind the same trait.

use crate::error::AppError;
use crate::synth::platform::Platform;
use crate::synth::types::{Conversation, Message};

#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a fresh conversation for a target platform.
    async fn create(&self, platform: Platform) -> Result<Conversation, AppError>;

    async fn get(&self, id: &str) -> Result<Conversation, AppError>;

    /// Append a finalized message to a conversation's history.
    async fn append_message(&self, id: &str, message: Message) -> Result<(), AppError>;

    /// Point the conversation's active draft at the message carrying it, or
    /// clear it.
    async fn set_active_draft(&self, id: &str, message_id: Option<String>)
        -> Result<(), AppError>;

    async fn list(&self) -> Result<Vec<Conversation>, AppError>;

    async fn delete(&self, id: &str) -> Result<(), AppError>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    conversations: tokio::sync::RwLock<std::collections::HashMap<String, Conversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ConversationStore for MemoryStore {
    async fn create(&self, platform: Platform) -> Result<Conversation, AppError> {
        let conversation = Conversation::new(platform);
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn get(&self, id: &str) -> Result<Conversation, AppError> {
        self.conversations
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("conversation {id}")))
    }

    async fn append_message(&self, id: &str, message: Message) -> Result<(), AppError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("conversation {id}")))?;
        conversation.messages.push(message);
        Ok(())
    }

    async fn set_active_draft(
        &self,
        id: &str,
        message_id: Option<String>,
    ) -> Result<(), AppError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("conversation {id}")))?;
        conversation.active_draft_id = message_id;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Conversation>, AppError> {
        let mut all: Vec<Conversation> =
            self.conversations.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn delete(&self, id: &str) -> Result<(), AppError> {
        self.conversations
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("conversation {id}")))
    }
}
