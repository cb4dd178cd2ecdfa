use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use super::handler::{FnHandler, ToolHandler, ToolOutput, ToolProvider};
use crate::errors::{GatewayError, GatewayResult, ToolError, ToolOutcome};
use crate::models::tool::{Tool, ToolCall, ToolResult};
use crate::providers::utils::is_valid_function_name;

/// Forwards calls for one schema to the provider that owns it
struct ProviderHandler {
    provider: Arc<dyn ToolProvider>,
    tool_name: String,
}

#[async_trait::async_trait]
impl ToolHandler for ProviderHandler {
    async fn call(&self, arguments: Value) -> ToolOutcome<ToolOutput> {
        self.provider.call(&self.tool_name, arguments).await
    }
}

/// Maps tool names to handlers. Every failure is turned into a
/// `ToolResult` error; nothing raised here reaches the turn.
#[derive(Default, Clone)]
pub struct ToolDispatch {
    entries: Vec<(Tool, Arc<dyn ToolHandler>)>,
}

impl ToolDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Tool, handler: Arc<dyn ToolHandler>) -> GatewayResult<()> {
        if !is_valid_function_name(&tool.name) {
            return Err(GatewayError::Configuration(format!(
                "invalid tool name '{}'",
                tool.name
            )));
        }
        if self.find(&tool.name).is_some() {
            return Err(GatewayError::Configuration(format!(
                "tool '{}' is already registered",
                tool.name
            )));
        }
        debug!(tool = %tool.name, "registered tool");
        self.entries.push((tool, handler));
        Ok(())
    }

    pub fn register_fn<F, Fut>(&mut self, tool: Tool, handler: F) -> GatewayResult<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolOutcome<ToolOutput>> + Send + 'static,
    {
        self.register(tool, Arc::new(FnHandler(handler)))
    }

    /// Register every tool a provider exposes
    pub fn bind(&mut self, provider: Arc<dyn ToolProvider>) -> GatewayResult<()> {
        for tool in provider.tools() {
            let handler = ProviderHandler {
                provider: Arc::clone(&provider),
                tool_name: tool.name.clone(),
            };
            self.register(tool.clone(), Arc::new(handler))?;
        }
        debug!(provider = provider.name(), "bound tool provider");
        Ok(())
    }

    pub fn schemas(&self) -> Vec<Tool> {
        self.entries.iter().map(|(tool, _)| tool.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn dispatch(&self, name: &str, arguments_json: &str) -> ToolResult {
        match self.execute(name, arguments_json).await {
            Ok(ToolOutput::Complete(value)) => ToolResult::success(name, value),
            Ok(ToolOutput::Degraded { value, reason }) => {
                warn!(tool = name, %reason, "tool returned degraded output");
                ToolResult::degraded(name, value, reason)
            }
            Err(err) => {
                warn!(tool = name, error = %err, "tool call failed");
                ToolResult::failure(name, err.to_string())
            }
        }
    }

    /// Dispatch a batch concurrently; results come back in call order
    pub async fn dispatch_all(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        join_all(
            calls
                .iter()
                .map(|call| self.dispatch(&call.name, &call.arguments_json)),
        )
        .await
    }

    async fn execute(&self, name: &str, arguments_json: &str) -> ToolOutcome<ToolOutput> {
        let (tool, handler) = self
            .find(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let arguments = ToolCall::new(name, arguments_json)
            .arguments()
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        validate_arguments(&tool.parameters_schema, &arguments)?;

        AssertUnwindSafe(handler.call(arguments))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ToolError::Execution(panic_message(panic))))
    }

    fn find(&self, name: &str) -> Option<&(Tool, Arc<dyn ToolHandler>)> {
        self.entries.iter().find(|(tool, _)| tool.name == name)
    }
}

/// Shallow check against an object schema: the payload must be an object
/// holding every `required` property.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> ToolOutcome<()> {
    let is_object_schema =
        schema.get("type").and_then(Value::as_str) == Some("object") || schema.get("properties").is_some();
    if !is_object_schema {
        return Ok(());
    }

    let object = arguments.as_object().ok_or_else(|| {
        ToolError::InvalidArguments("arguments must be a JSON object".to_string())
    })?;
    let missing: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter(|field| !object.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        return Err(ToolError::InvalidArguments(format!(
            "missing required field(s): {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("tool panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("tool panicked: {}", message)
    } else {
        "tool panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    fn price_tool() -> Tool {
        Tool::new(
            "get_price",
            "Look up a token price",
            json!({
                "type": "object",
                "properties": {"token": {"type": "string"}},
                "required": ["token"]
            }),
        )
    }

    fn dispatch_with_price() -> ToolDispatch {
        let mut dispatch = ToolDispatch::new();
        dispatch
            .register_fn(price_tool(), |args: Value| async move {
                Ok(ToolOutput::Complete(json!({"token": args["token"], "price": 1.23})))
            })
            .unwrap();
        dispatch
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let result = dispatch_with_price()
            .dispatch("get_price", r#"{"token":"X"}"#)
            .await;
        assert_eq!(
            result,
            ToolResult::success("get_price", json!({"token": "X", "price": 1.23}))
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_result() {
        let result = dispatch_with_price().dispatch("get_volume", "{}").await;
        assert_eq!(result.error.as_deref(), Some("unknown tool: get_volume"));
        assert!(result.result.is_none());
    }

    #[tokio::test]
    async fn test_bad_arguments_become_error_result() {
        let dispatch = dispatch_with_price();

        let unparseable = dispatch.dispatch("get_price", "{\"token\":").await;
        assert!(unparseable.error.unwrap().starts_with("invalid arguments"));

        let missing = dispatch.dispatch("get_price", "").await;
        assert_eq!(
            missing.error.as_deref(),
            Some("invalid arguments: missing required field(s): token")
        );

        let not_object = dispatch.dispatch("get_price", "[1,2]").await;
        assert!(not_object.is_error());
    }

    fn explode(_: Value) -> ToolOutcome<ToolOutput> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_handler_failures_are_absorbed() {
        let mut dispatch = ToolDispatch::new();
        dispatch
            .register_fn(
                Tool::new("fails", "always fails", json!({})),
                |_| async { Err::<ToolOutput, _>(ToolError::Execution("service down".to_string())) },
            )
            .unwrap();
        dispatch
            .register_fn(Tool::new("panics", "always panics", json!({})), |args| async move {
                explode(args)
            })
            .unwrap();

        let failed = dispatch.dispatch("fails", "{}").await;
        assert_eq!(
            failed.error.as_deref(),
            Some("tool execution failed: service down")
        );

        let panicked = dispatch.dispatch("panics", "{}").await;
        assert_eq!(
            panicked.error.as_deref(),
            Some("tool execution failed: tool panicked: boom")
        );
    }

    #[tokio::test]
    async fn test_degraded_output_keeps_value() {
        let mut dispatch = ToolDispatch::new();
        dispatch
            .register_fn(Tool::new("quote", "cached quote", json!({})), |_| async {
                Ok(ToolOutput::degraded(json!({"price": 1.0}), "served from cache"))
            })
            .unwrap();

        let result = dispatch.dispatch("quote", "{}").await;
        assert_eq!(result.result, Some(json!({"price": 1.0})));
        assert_eq!(result.degraded.as_deref(), Some("served from cache"));
        assert!(!result.is_error());
    }

    #[test]
    fn test_duplicate_registration_is_configuration_error() {
        let mut dispatch = dispatch_with_price();
        let err = dispatch
            .register_fn(price_tool(), |_| async { Ok(ToolOutput::Complete(json!(null))) })
            .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
        assert_eq!(dispatch.schemas().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_all_preserves_call_order() {
        let mut dispatch = ToolDispatch::new();
        dispatch
            .register_fn(Tool::new("sleep", "sleeps", json!({})), |args: Value| async move {
                let ms = args["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(ToolOutput::Complete(json!(ms)))
            })
            .unwrap();

        let calls = vec![
            ToolCall::new("sleep", r#"{"ms":30}"#),
            ToolCall::new("missing", "{}"),
            ToolCall::new("sleep", r#"{"ms":1}"#),
        ];
        let results = dispatch.dispatch_all(&calls).await;
        assert_eq!(results[0].result, Some(json!(30)));
        assert!(results[1].is_error());
        assert_eq!(results[2].result, Some(json!(1)));
    }

    struct PriceService {
        tools: Vec<Tool>,
    }

    #[async_trait]
    impl ToolProvider for PriceService {
        fn name(&self) -> &str {
            "prices"
        }

        fn tools(&self) -> &[Tool] {
            &self.tools
        }

        async fn call(&self, tool_name: &str, arguments: Value) -> ToolOutcome<ToolOutput> {
            match tool_name {
                "get_price" => Ok(ToolOutput::Complete(json!({"price": 1.23, "args": arguments}))),
                other => Err(ToolError::UnknownTool(other.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_bind_provider() {
        let mut dispatch = ToolDispatch::new();
        dispatch
            .bind(Arc::new(PriceService {
                tools: vec![price_tool()],
            }))
            .unwrap();

        assert_eq!(dispatch.schemas(), vec![price_tool()]);
        let result = dispatch.dispatch("get_price", r#"{"token":"X"}"#).await;
        assert_eq!(result.result.unwrap()["price"], json!(1.23));
    }

    #[test]
    fn test_validate_arguments_ignores_non_object_schemas() {
        assert!(validate_arguments(&json!({}), &json!([1])).is_ok());
        assert!(validate_arguments(&json!({"type": "object"}), &json!([1])).is_err());
    }
}
