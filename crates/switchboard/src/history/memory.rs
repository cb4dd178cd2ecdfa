use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::HistoryStore;
use crate::errors::GatewayResult;
use crate::models::conversation::Conversation;

/// Process-local store, lost on restart
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conversations.read().await.is_empty()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn get_by_id(&self, id: &str) -> GatewayResult<Option<Conversation>> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn get_by_owner(&self, owner_id: &str) -> GatewayResult<Vec<Conversation>> {
        let mut owned: Vec<Conversation> = self
            .conversations
            .read()
            .await
            .values()
            .filter(|c| c.owner_id.as_deref() == Some(owner_id))
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(owned)
    }

    async fn save(&self, conversation: Conversation) -> GatewayResult<()> {
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation);
        Ok(())
    }

    async fn save_many(&self, conversations: Vec<Conversation>) -> GatewayResult<()> {
        let mut store = self.conversations.write().await;
        for conversation in conversations {
            store.insert(conversation.id.clone(), conversation);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> GatewayResult<bool> {
        Ok(self.conversations.write().await.remove(id).is_some())
    }

    async fn delete_by_owner(&self, owner_id: &str) -> GatewayResult<usize> {
        let mut store = self.conversations.write().await;
        let before = store.len();
        store.retain(|_, c| c.owner_id.as_deref() != Some(owner_id));
        Ok(before - store.len())
    }
}
