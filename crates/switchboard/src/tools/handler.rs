use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;

use crate::errors::ToolOutcome;
use crate::models::tool::Tool;

/// What a tool produced. A degraded output is real but incomplete data, never
/// a stand-in for a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Complete(Value),
    Degraded { value: Value, reason: String },
}

impl ToolOutput {
    pub fn degraded<S: Into<String>>(value: Value, reason: S) -> Self {
        ToolOutput::Degraded {
            value,
            reason: reason.into(),
        }
    }
}

/// Executes one tool with already parsed and validated arguments
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> ToolOutcome<ToolOutput>;
}

/// Adapts an async closure into a handler
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolOutcome<ToolOutput>> + Send + 'static,
{
    async fn call(&self, arguments: Value) -> ToolOutcome<ToolOutput> {
        (self.0)(arguments).await
    }
}

/// An external collaborator owning a set of tools and the service behind them
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Get the name of the provider, for logs
    fn name(&self) -> &str;

    /// Get available tools
    fn tools(&self) -> &[Tool];

    /// Call one of this provider's tools
    async fn call(&self, tool_name: &str, arguments: Value) -> ToolOutcome<ToolOutput>;
}
