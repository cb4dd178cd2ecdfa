use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::errors::GatewayResult;
use crate::models::completion::{CompletionRequest, CompletionResponse, StreamEvent};

/// Stream of canonical events produced by an adapter. A well-formed stream
/// yields exactly one event with `is_complete` set, and nothing after it.
pub type EventStream = BoxStream<'static, GatewayResult<StreamEvent>>;

/// Base trait for AI providers (OpenAI, Anthropic, etc)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name of the upstream backend, for logs and history metadata
    fn name(&self) -> &str;

    /// Model used when a request does not name one
    fn default_model(&self) -> &str;

    /// Whether tool schemas may be sent to this backend
    fn supports_tools(&self) -> bool {
        true
    }

    /// Generate the full response in one round-trip
    async fn complete(&self, request: &CompletionRequest) -> GatewayResult<CompletionResponse>;

    /// Generate the response as a stream of incremental events
    async fn stream(&self, request: &CompletionRequest) -> GatewayResult<EventStream>;
}
