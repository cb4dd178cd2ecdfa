use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::base::{EventStream, Provider};
use super::configs::{ensure_present, OpenAiProviderConfig};
use super::stream::{decode_stream, RecordDecoder, RecordError};
use super::utils::{build_client, endpoint, read_json, send, validate_tools, value_to_u32};
use crate::errors::{GatewayError, GatewayResult};
use crate::models::completion::{CompletionRequest, CompletionResponse, StreamEvent, Usage};
use crate::models::tool::{Tool, ToolCall, ToolCallDelta, ToolChoice};

const DONE_SENTINEL: &str = "[DONE]";

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> GatewayResult<Self> {
        ensure_present("openai", "api_key", &config.api_key)?;
        ensure_present("openai", "model", &config.model)?;
        let client = build_client(&config.timeouts)?;
        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Option<Usage> {
        let usage = data.get("usage").filter(|u| u.is_object())?;
        let prompt = usage.get("prompt_tokens").and_then(value_to_u32)?;
        let completion = usage.get("completion_tokens").and_then(value_to_u32)?;
        let total = usage.get("total_tokens").and_then(value_to_u32);
        Some(Usage::new(prompt, completion, total))
    }

    fn model_for(&self, request: &CompletionRequest) -> String {
        request
            .model_name
            .clone()
            .unwrap_or_else(|| self.config.model.clone())
    }

    fn create_payload(&self, request: &CompletionRequest, stream: bool) -> GatewayResult<Value> {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();

        let mut payload = json!({
            "model": self.model_for(request),
            "messages": messages,
        });
        let object = payload
            .as_object_mut()
            .ok_or_else(|| GatewayError::Protocol("payload is not an object".to_string()))?;

        let tools = request.tools();
        if !tools.is_empty() {
            validate_tools(tools)?;
            object.insert("tools".to_string(), json!(tools_to_openai_spec(tools)));
            if let Some(choice) = &request.tool_choice {
                object.insert("tool_choice".to_string(), tool_choice_to_openai_spec(choice));
            }
        }
        if let Some(temp) = request.temperature.or(self.config.temperature) {
            object.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = request.max_output_tokens.or(self.config.max_tokens) {
            object.insert("max_tokens".to_string(), json!(tokens));
        }
        if stream {
            object.insert("stream".to_string(), json!(true));
            object.insert("stream_options".to_string(), json!({"include_usage": true}));
        }
        Ok(payload)
    }

    async fn post(&self, payload: &Value) -> GatewayResult<reqwest::Response> {
        let url = endpoint(&self.config.host, "v1/chat/completions");
        debug!(%url, "sending chat completion request");
        send(
            self.client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(payload),
        )
        .await
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
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
                "openai did not answer within {:?}",
                self.config.timeouts.read
            ))
        })??;

        openai_response_to_completion(&response, &self.model_for(request))
    }

    async fn stream(&self, request: &CompletionRequest) -> GatewayResult<EventStream> {
        let payload = self.create_payload(request, true)?;
        let response = tokio::time::timeout(self.config.timeouts.read, self.post(&payload))
            .await
            .map_err(|_| {
                GatewayError::UpstreamTimeout(format!(
                    "openai did not start streaming within {:?}",
                    self.config.timeouts.read
                ))
            })??;

        let decoder = OpenAiStreamDecoder::new(self.model_for(request));
        Ok(decode_stream(
            response.bytes_stream(),
            decoder,
            self.config.timeouts.read,
            "openai",
        ))
    }
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters_schema,
                }
            })
        })
        .collect()
}

fn tool_choice_to_openai_spec(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Tool(name) => json!({"type": "function", "function": {"name": name}}),
    }
}

/// Convert OpenAI's API response to the canonical response
pub fn openai_response_to_completion(
    response: &Value,
    requested_model: &str,
) -> GatewayResult<CompletionResponse> {
    let choice = response
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| GatewayError::Protocol("response has no choices".to_string()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| GatewayError::Protocol("choice has no message".to_string()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .map(|call| {
                    let function = &call["function"];
                    ToolCall {
                        id: call["id"].as_str().map(String::from),
                        name: function["name"].as_str().unwrap_or_default().to_string(),
                        arguments_json: function["arguments"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string(),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(CompletionResponse {
        id: response["id"].as_str().unwrap_or_default().to_string(),
        model_name: response["model"]
            .as_str()
            .unwrap_or(requested_model)
            .to_string(),
        content,
        finish_reason: choice["finish_reason"].as_str().map(String::from),
        usage: OpenAiProvider::get_usage(response),
        tool_calls,
    })
}

/// Decodes `chat.completion.chunk` records. The stream ends on the `[DONE]`
/// sentinel, or shortly after a `finish_reason` when the upstream sends no
/// sentinel; the reason is remembered so the usage chunk that follows it is
/// still picked up.
pub struct OpenAiStreamDecoder {
    id: Option<String>,
    model: String,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl OpenAiStreamDecoder {
    pub fn new(model: String) -> Self {
        Self {
            id: None,
            model,
            finish_reason: None,
            usage: None,
        }
    }

    fn terminal(&mut self) -> StreamEvent {
        StreamEvent::terminal(self.model.clone(), self.finish_reason.take())
            .with_id(self.id.clone())
            .with_usage(self.usage)
    }
}

impl RecordDecoder for OpenAiStreamDecoder {
    fn decode(&mut self, payload: &str) -> Result<Vec<StreamEvent>, RecordError> {
        if payload == DONE_SENTINEL {
            if self.finish_reason.is_none() {
                self.finish_reason = Some("stop".to_string());
            }
            return Ok(vec![self.terminal()]);
        }

        let chunk: Value = serde_json::from_str(payload)?;
        if let Some(error) = chunk.get("error") {
            return Err(RecordError::Fatal(GatewayError::Protocol(format!(
                "upstream reported an error mid-stream: {}",
                error
            ))));
        }
        if !chunk.is_object() {
            return Err(RecordError::Malformed("record is not an object".to_string()));
        }

        if self.id.is_none() {
            self.id = chunk["id"].as_str().map(String::from);
        }
        if let Some(model) = chunk["model"].as_str() {
            self.model = model.to_string();
        }
        if let Some(usage) = OpenAiProvider::get_usage(&chunk) {
            self.usage = Some(usage);
        }

        let Some(choice) = chunk.get("choices").and_then(|c| c.get(0)) else {
            return Ok(Vec::new());
        };
        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish_reason = Some(reason.to_string());
        }

        let delta = &choice["delta"];
        let mut event = StreamEvent {
            id: self.id.clone(),
            model_name: self.model.clone(),
            content_delta: delta["content"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(String::from),
            ..Default::default()
        };
        if let Some(calls) = delta["tool_calls"].as_array() {
            for (position, call) in calls.iter().enumerate() {
                let function = &call["function"];
                event.tool_call_deltas.push(ToolCallDelta {
                    index: call["index"]
                        .as_u64()
                        .map(|i| i as usize)
                        .unwrap_or(position),
                    id: call["id"].as_str().map(String::from),
                    name: function["name"].as_str().map(String::from),
                    arguments: function["arguments"].as_str().map(String::from),
                });
            }
        }

        if event.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(vec![event])
        }
    }

    fn finish(&mut self) -> StreamEvent {
        self.terminal()
    }

    fn is_finishing(&self) -> bool {
        self.finish_reason.is_some()
    }
}
