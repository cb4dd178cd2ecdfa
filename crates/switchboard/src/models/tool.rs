use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool that can be used by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// JSON schema of the arguments the tool accepts
    pub parameters_schema: Value,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, parameters_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            parameters_schema,
        }
    }
}

/// How the model is allowed to pick tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    Tool(String),
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Vendor assigned id, when the backend provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The name of the tool to execute
    pub name: String,
    /// Raw JSON arguments, not yet validated
    #[serde(rename = "argumentsJSON")]
    pub arguments_json: String,
}

impl ToolCall {
    pub fn new<N: Into<String>, A: Into<String>>(name: N, arguments_json: A) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments_json: arguments_json.into(),
        }
    }

    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Arguments as a JSON value; an empty payload reads as `{}`
    pub fn arguments(&self) -> Result<Value, serde_json::Error> {
        if self.arguments_json.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments_json)
    }
}

/// Incremental piece of a tool call, as emitted while streaming
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Raw JSON fragment to append to the call's arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// The outcome of dispatching one tool call. Exactly one of `result` and
/// `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the result is real but incomplete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl ToolResult {
    pub fn success<S: Into<String>>(tool_name: S, result: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            result: Some(result),
            error: None,
            degraded: None,
        }
    }

    pub fn degraded<S: Into<String>, R: Into<String>>(
        tool_name: S,
        result: Value,
        reason: R,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            result: Some(result),
            error: None,
            degraded: Some(reason.into()),
        }
    }

    pub fn failure<S: Into<String>, E: Into<String>>(tool_name: S, error: E) -> Self {
        Self {
            tool_name: tool_name.into(),
            result: None,
            error: Some(error.into()),
            degraded: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
