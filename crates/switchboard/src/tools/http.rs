use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use super::handler::{ToolOutput, ToolProvider};
use crate::errors::{GatewayError, GatewayResult, ToolError, ToolOutcome};
use crate::models::tool::Tool;
use crate::providers::configs::Timeouts;
use crate::providers::utils::build_client;

/// Response header a tool service sets when it answers with partial data
pub const DEGRADED_HEADER: &str = "x-tool-degraded";

/// Tools served by remote HTTP endpoints. Arguments are POSTed as a JSON
/// object and the JSON response body is the result.
pub struct HttpToolProvider {
    name: String,
    client: Client,
    read_timeout: std::time::Duration,
    tools: Vec<Tool>,
    endpoints: HashMap<String, String>,
}

impl HttpToolProvider {
    pub fn new(name: &str, timeouts: Timeouts) -> GatewayResult<Self> {
        Ok(Self {
            name: name.to_string(),
            client: build_client(&timeouts)?,
            read_timeout: timeouts.read,
            tools: Vec::new(),
            endpoints: HashMap::new(),
        })
    }

    pub fn add_tool(&mut self, tool: Tool, url: &str) -> GatewayResult<()> {
        if self.endpoints.contains_key(&tool.name) {
            return Err(GatewayError::Configuration(format!(
                "tool '{}' is already registered",
                tool.name
            )));
        }
        self.endpoints.insert(tool.name.clone(), url.to_string());
        self.tools.push(tool);
        Ok(())
    }
}

#[async_trait]
impl ToolProvider for HttpToolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_name: &str, arguments: Value) -> ToolOutcome<ToolOutput> {
        let url = self
            .endpoints
            .get(tool_name)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;
        debug!(tool = tool_name, %url, "calling remote tool");

        let response = self
            .client
            .post(url)
            .timeout(self.read_timeout)
            .json(&arguments)
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        let degraded = response
            .headers()
            .get(DEGRADED_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Execution(format!("reading response failed: {}", e)))?;

        if !status.is_success() {
            return Err(ToolError::Execution(format!(
                "{} returned {}: {}",
                tool_name,
                status.as_u16(),
                body
            )));
        }

        let value = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body)
                .map_err(|e| ToolError::Execution(format!("unparseable tool response: {}", e)))?
        };

        Ok(match degraded {
            Some(reason) => ToolOutput::degraded(value, reason),
            None => ToolOutput::Complete(value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolDispatch;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn dispatch_for(server: &MockServer) -> ToolDispatch {
        let mut provider = HttpToolProvider::new("remote", Timeouts::default()).unwrap();
        provider
            .add_tool(
                Tool::new(
                    "get_price",
                    "Look up a token price",
                    json!({"type": "object", "required": ["token"]}),
                ),
                &format!("{}/price", server.uri()),
            )
            .unwrap();

        let mut dispatch = ToolDispatch::new();
        dispatch.bind(Arc::new(provider)).unwrap();
        dispatch
    }

    #[tokio::test]
    async fn test_remote_tool_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/price"))
            .and(body_json(json!({"token": "X"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"price": 1.23})))
            .mount(&server)
            .await;

        let result = dispatch_for(&server)
            .await
            .dispatch("get_price", r#"{"token":"X"}"#)
            .await;
        assert_eq!(result.result, Some(json!({"price": 1.23})));
        assert!(result.degraded.is_none());
    }

    #[tokio::test]
    async fn test_remote_tool_degraded_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/price"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(DEGRADED_HEADER, "stale quote")
                    .set_body_json(json!({"price": 1.0})),
            )
            .mount(&server)
            .await;

        let result = dispatch_for(&server)
            .await
            .dispatch("get_price", r#"{"token":"X"}"#)
            .await;
        assert_eq!(result.result, Some(json!({"price": 1.0})));
        assert_eq!(result.degraded.as_deref(), Some("stale quote"));
    }

    #[tokio::test]
    async fn test_remote_tool_failure_is_error_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/price"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let result = dispatch_for(&server)
            .await
            .dispatch("get_price", r#"{"token":"X"}"#)
            .await;
        assert_eq!(
            result.error.as_deref(),
            Some("tool execution failed: get_price returned 503: maintenance")
        );
    }

    #[test]
    fn test_add_tool_rejects_duplicates() {
        let mut provider = HttpToolProvider::new("remote", Timeouts::default()).unwrap();
        let tool = Tool::new("get_price", "", json!({}));
        provider.add_tool(tool.clone(), "http://a").unwrap();
        assert!(provider.add_tool(tool, "http://b").is_err());
        assert_eq!(provider.tools().len(), 1);
    }
}
