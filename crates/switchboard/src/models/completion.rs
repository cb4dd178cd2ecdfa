use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::message::Message;
use super::tool::{Tool, ToolCall, ToolCallDelta, ToolChoice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32, total_tokens: Option<u32>) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: total_tokens.unwrap_or(prompt_tokens.saturating_add(completion_tokens)),
        }
    }

    pub fn add(&self, other: &Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens.saturating_add(other.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(other.completion_tokens),
            total_tokens: self.total_tokens.saturating_add(other.total_tokens),
        }
    }
}

/// Vendor-neutral completion request handed to a provider adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model_name = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    /// Tools to send upstream, treating an empty list as none
    pub fn tools(&self) -> &[Tool] {
        self.tools.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResponse {
    pub id: String,
    pub model_name: String,
    pub content: String,
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl CompletionResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One event of a streamed completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_delta: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_deltas: Vec<ToolCallDelta>,
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Full reconstructed text, only set on the terminal event of a turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamEvent {
    pub fn delta<M: Into<String>, S: Into<String>>(model_name: M, text: S) -> Self {
        Self {
            model_name: model_name.into(),
            content_delta: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn tool_delta<M: Into<String>>(model_name: M, delta: ToolCallDelta) -> Self {
        Self {
            model_name: model_name.into(),
            tool_call_deltas: vec![delta],
            ..Default::default()
        }
    }

    pub fn terminal<M: Into<String>>(model_name: M, finish_reason: Option<String>) -> Self {
        Self {
            model_name: model_name.into(),
            is_complete: true,
            finish_reason,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    pub fn with_usage(mut self, usage: Option<Usage>) -> Self {
        self.usage = usage;
        self
    }

    /// Whether the event carries anything a caller would render
    pub fn is_empty(&self) -> bool {
        !self.is_complete
            && self.content_delta.as_deref().map_or(true, str::is_empty)
            && self.tool_call_deltas.is_empty()
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Folds stream events into the response they imply
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    id: Option<String>,
    model_name: String,
    content: String,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    tool_calls: BTreeMap<usize, PartialToolCall>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &StreamEvent) {
        if self.id.is_none() {
            self.id = event.id.clone();
        }
        if !event.model_name.is_empty() {
            self.model_name = event.model_name.clone();
        }
        if let Some(delta) = &event.content_delta {
            self.content.push_str(delta);
        }
        for delta in &event.tool_call_deltas {
            let call = self.tool_calls.entry(delta.index).or_default();
            if let Some(id) = &delta.id {
                call.id = Some(id.clone());
            }
            if let Some(name) = &delta.name {
                call.name.push_str(name);
            }
            if let Some(arguments) = &delta.arguments {
                call.arguments.push_str(arguments);
            }
        }
        if event.finish_reason.is_some() {
            self.finish_reason = event.finish_reason.clone();
        }
        if event.usage.is_some() {
            self.usage = event.usage;
        }
    }

    pub fn finish(self) -> CompletionResponse {
        let tool_calls = self
            .tool_calls
            .into_values()
            .filter(|call| !call.name.is_empty())
            .map(|call| ToolCall {
                id: call.id,
                name: call.name,
                arguments_json: call.arguments,
            })
            .collect();

        CompletionResponse {
            id: self.id.unwrap_or_default(),
            model_name: self.model_name,
            content: self.content,
            finish_reason: self.finish_reason,
            usage: self.usage,
            tool_calls,
        }
    }
}
