use async_trait::async_trait;

use crate::errors::GatewayResult;
use crate::models::conversation::Conversation;

pub mod memory;

pub use memory::InMemoryHistoryStore;

/// Storage for conversations. The orchestrator reads a conversation at the
/// start of a turn and writes it back once, when the turn finalizes.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> GatewayResult<Option<Conversation>>;

    /// Conversations owned by `owner_id`, most recently updated first
    async fn get_by_owner(&self, owner_id: &str) -> GatewayResult<Vec<Conversation>>;

    /// Insert or replace by id
    async fn save(&self, conversation: Conversation) -> GatewayResult<()>;

    async fn save_many(&self, conversations: Vec<Conversation>) -> GatewayResult<()>;

    /// Returns whether a conversation was removed
    async fn delete(&self, id: &str) -> GatewayResult<bool>;

    /// Returns how many conversations were removed
    async fn delete_by_owner(&self, owner_id: &str) -> GatewayResult<usize>;
}
