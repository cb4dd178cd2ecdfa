use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

use super::configs::Timeouts;
use crate::errors::{GatewayError, GatewayResult};
use crate::models::tool::Tool;

lazy_static! {
    static ref FUNCTION_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

pub fn is_valid_function_name(name: &str) -> bool {
    FUNCTION_NAME.is_match(name)
}

/// Upstream APIs reject duplicate or oddly named functions, so catch that
/// before spending a request on it
pub fn validate_tools(tools: &[Tool]) -> GatewayResult<()> {
    let mut names = HashSet::new();
    for tool in tools {
        if !is_valid_function_name(&tool.name) {
            return Err(GatewayError::Configuration(format!(
                "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
                tool.name
            )));
        }
        if !names.insert(tool.name.as_str()) {
            return Err(GatewayError::Configuration(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }
    }
    Ok(())
}

pub fn build_client(timeouts: &Timeouts) -> GatewayResult<Client> {
    Client::builder()
        .connect_timeout(timeouts.connect)
        .build()
        .map_err(|e| GatewayError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

/// Send a request and turn any non-success status into `Upstream`
pub async fn send(request: RequestBuilder) -> GatewayResult<Response> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), %body, "upstream request failed");
    Err(GatewayError::Upstream {
        status: status.as_u16(),
        body,
    })
}

/// Read a whole JSON body; an empty body on success is a protocol violation
pub async fn read_json(response: Response) -> GatewayResult<Value> {
    let body = response.text().await?;
    if body.trim().is_empty() {
        return Err(GatewayError::Protocol(
            "upstream returned an empty response body".to_string(),
        ));
    }
    serde_json::from_str(&body)
        .map_err(|e| GatewayError::Protocol(format!("unparseable upstream response: {}", e)))
}

pub fn endpoint(host: &str, path: &str) -> String {
    format!("{}/{}", host.trim_end_matches('/'), path.trim_start_matches('/'))
}

pub(crate) fn value_to_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|v| u32::try_from(v).ok())
}
