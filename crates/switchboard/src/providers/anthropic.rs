use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::base::{EventStream, Provider};
use super::configs::{ensure_present, AnthropicProviderConfig};
use super::stream::{decode_stream, RecordDecoder, RecordError};
use super::utils::{build_client, endpoint, read_json, send, validate_tools, value_to_u32};
use crate::errors::{GatewayError, GatewayResult};
use crate::models::completion::{CompletionRequest, CompletionResponse, StreamEvent, Usage};
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall, ToolCallDelta, ToolChoice};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> GatewayResult<Self> {
        ensure_present("anthropic", "api_key", &config.api_key)?;
        ensure_present("anthropic", "model", &config.model)?;
        let client = build_client(&config.timeouts)?;
        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Option<Usage> {
        let usage = data.get("usage")?;
        let input = usage.get("input_tokens").and_then(value_to_u32);
        let output = usage.get("output_tokens").and_then(value_to_u32);
        if input.is_none() && output.is_none() {
            return None;
        }
        Some(Usage::new(input.unwrap_or(0), output.unwrap_or(0), None))
    }

    fn model_for(&self, request: &CompletionRequest) -> String {
        request
            .model_name
            .clone()
            .unwrap_or_else(|| self.config.model.clone())
    }

    fn create_payload(&self, request: &CompletionRequest, stream: bool) -> GatewayResult<Value> {
        let (system, messages) = messages_to_anthropic_spec(&request.messages);

        let mut payload = json!({
            "model": self.model_for(request),
            "messages": messages,
            "max_tokens": request
                .max_output_tokens
                .or(self.config.max_tokens)
                .unwrap_or(DEFAULT_MAX_TOKENS),
        });
        let object = payload
            .as_object_mut()
            .ok_or_else(|| GatewayError::Protocol("payload is not an object".to_string()))?;

        if let Some(system) = system {
            object.insert("system".to_string(), json!(system));
        }
        let tools = request.tools();
        if !tools.is_empty() {
            validate_tools(tools)?;
            object.insert("tools".to_string(), json!(tools_to_anthropic_spec(tools)));
            if let Some(choice) = &request.tool_choice {
                object.insert("tool_choice".to_string(), tool_choice_to_anthropic_spec(choice));
            }
        }
        if let Some(temp) = request.temperature.or(self.config.temperature) {
            object.insert("temperature".to_string(), json!(temp));
        }
        if stream {
            object.insert("stream".to_string(), json!(true));
        }
        Ok(payload)
    }

    async fn post(&self, payload: &Value) -> GatewayResult<reqwest::Response> {
        let url = endpoint(&self.config.host, "v1/messages");
        debug!(%url, "sending messages request");
        send(
            self.client
                .post(&url)
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(payload),
        )
        .await
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: &CompletionRequest) -> GatewayResult<CompletionResponse> {
        let payload = self.create_payload(request, false)?;
        let response = tokio::time::timeout(self.config.timeouts.read, async {
            let response = self.post(&payload).await?;
            read_json(response).await
        })
        .await
        .map_err(|_| {
            GatewayError::UpstreamTimeout(format!(
                "anthropic did not answer within {:?}",
                self.config.timeouts.read
            ))
        })??;

        anthropic_response_to_completion(&response, &self.model_for(request))
    }

    async fn stream(&self, request: &CompletionRequest) -> GatewayResult<EventStream> {
        let payload = self.create_payload(request, true)?;
        let response = tokio::time::timeout(self.config.timeouts.read, self.post(&payload))
            .await
            .map_err(|_| {
                GatewayError::UpstreamTimeout(format!(
                    "anthropic did not start streaming within {:?}",
                    self.config.timeouts.read
                ))
            })??;

        let decoder = AnthropicStreamDecoder::new(self.model_for(request));
        Ok(decode_stream(
            response.bytes_stream(),
            decoder,
            self.config.timeouts.read,
            "anthropic",
        ))
    }
}

/// Split out the system prompt and merge consecutive same-role messages, since
/// the messages API wants strictly alternating turns.
///
/// After a tool round the list ends with the assistant tool-call and
/// tool-result messages, merged into one trailing assistant turn. The API
/// treats a trailing assistant turn as a prefill, so the model continues from
/// the rendered tool results rather than starting a fresh reply.
pub fn messages_to_anthropic_spec(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let mut merged: Vec<(Role, String)> = Vec::new();
    for message in messages.iter().filter(|m| m.role != Role::System) {
        match merged.last_mut() {
            Some((role, content)) if *role == message.role => {
                content.push_str("\n\n");
                content.push_str(&message.content);
            }
            _ => merged.push((message.role, message.content.clone())),
        }
    }

    let spec = merged
        .into_iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect();
    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, spec)
}

pub fn tools_to_anthropic_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.parameters_schema,
            })
        })
        .collect()
}

fn tool_choice_to_anthropic_spec(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({"type": "auto"}),
        ToolChoice::None => json!({"type": "none"}),
        ToolChoice::Required => json!({"type": "any"}),
        ToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
    }
}

fn tool_input_to_arguments(input: &Value) -> Option<String> {
    match input {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        other => Some(other.to_string()),
    }
}

pub fn anthropic_response_to_completion(
    response: &Value,
    requested_model: &str,
) -> GatewayResult<CompletionResponse> {
    let blocks = response
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::Protocol("response has no content blocks".to_string()))?;

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block["type"].as_str() {
            Some("text") => content.push_str(block["text"].as_str().unwrap_or_default()),
            Some("tool_use") => tool_calls.push(ToolCall {
                id: block["id"].as_str().map(String::from),
                name: block["name"].as_str().unwrap_or_default().to_string(),
                arguments_json: tool_input_to_arguments(&block["input"])
                    .unwrap_or_else(|| "{}".to_string()),
            }),
            _ => {}
        }
    }

    Ok(CompletionResponse {
        id: response["id"].as_str().unwrap_or_default().to_string(),
        model_name: response["model"]
            .as_str()
            .unwrap_or(requested_model)
            .to_string(),
        content,
        finish_reason: response["stop_reason"].as_str().map(String::from),
        usage: AnthropicProvider::get_usage(response),
        tool_calls,
    })
}

/// Decodes messages-API stream records (`message_start`,
/// `content_block_*`, `message_delta`, `message_stop`)
pub struct AnthropicStreamDecoder {
    id: Option<String>,
    model: String,
    stop_reason: Option<String>,
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

impl AnthropicStreamDecoder {
    pub fn new(model: String) -> Self {
        Self {
            id: None,
            model,
            stop_reason: None,
            input_tokens: None,
            output_tokens: None,
        }
    }

    fn usage(&self) -> Option<Usage> {
        if self.input_tokens.is_none() && self.output_tokens.is_none() {
            return None;
        }
        Some(Usage::new(
            self.input_tokens.unwrap_or(0),
            self.output_tokens.unwrap_or(0),
            None,
        ))
    }

    fn event(&self) -> StreamEvent {
        StreamEvent {
            id: self.id.clone(),
            model_name: self.model.clone(),
            ..Default::default()
        }
    }

    fn terminal(&mut self) -> StreamEvent {
        StreamEvent::terminal(self.model.clone(), self.stop_reason.take())
            .with_id(self.id.clone())
            .with_usage(self.usage())
    }
}

impl RecordDecoder for AnthropicStreamDecoder {
    fn decode(&mut self, payload: &str) -> Result<Vec<StreamEvent>, RecordError> {
        let record: Value = serde_json::from_str(payload)?;
        let record_type = record["type"]
            .as_str()
            .ok_or_else(|| RecordError::Malformed("record has no type".to_string()))?;
        let index = record["index"].as_u64().unwrap_or(0) as usize;

        match record_type {
            "message_start" => {
                let message = &record["message"];
                self.id = message["id"].as_str().map(String::from);
                if let Some(model) = message["model"].as_str() {
                    self.model = model.to_string();
                }
                self.input_tokens = message["usage"]["input_tokens"]
                    .as_u64()
                    .and_then(|v| u32::try_from(v).ok());
                Ok(Vec::new())
            }
            "content_block_start" => {
                let block = &record["content_block"];
                let mut event = self.event();
                match block["type"].as_str() {
                    Some("text") => {
                        event.content_delta = block["text"]
                            .as_str()
                            .filter(|t| !t.is_empty())
                            .map(String::from);
                    }
                    Some("tool_use") => event.tool_call_deltas.push(ToolCallDelta {
                        index,
                        id: block["id"].as_str().map(String::from),
                        name: block["name"].as_str().map(String::from),
                        arguments: tool_input_to_arguments(&block["input"]),
                    }),
                    _ => {}
                }
                Ok(if event.is_empty() { Vec::new() } else { vec![event] })
            }
            "content_block_delta" => {
                let delta = &record["delta"];
                let mut event = self.event();
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        event.content_delta = delta["text"].as_str().map(String::from);
                    }
                    Some("input_json_delta") => event.tool_call_deltas.push(ToolCallDelta {
                        index,
                        arguments: delta["partial_json"].as_str().map(String::from),
                        ..Default::default()
                    }),
                    _ => {}
                }
                Ok(if event.is_empty() { Vec::new() } else { vec![event] })
            }
            "message_delta" => {
                if let Some(reason) = record["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                if let Some(tokens) = record["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = u32::try_from(tokens).ok();
                }
                Ok(Vec::new())
            }
            "message_stop" => Ok(vec![self.terminal()]),
            "error" => Err(RecordError::Fatal(GatewayError::Protocol(format!(
                "upstream reported an error mid-stream: {}",
                record["error"]
            )))),
            // ping, content_block_stop and future record types carry nothing for us
            _ => Ok(Vec::new()),
        }
    }

    fn finish(&mut self) -> StreamEvent {
        self.terminal()
    }
}
