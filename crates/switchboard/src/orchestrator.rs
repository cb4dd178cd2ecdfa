use async_stream::try_stream;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::errors::{GatewayError, GatewayResult};
use crate::history::HistoryStore;
use crate::models::completion::{
    CompletionRequest, CompletionResponse, StreamAccumulator, StreamEvent, Usage,
};
use crate::models::conversation::Conversation;
use crate::models::message::{with_system_prompt, Message};
use crate::models::tool::{Tool, ToolCall, ToolChoice, ToolResult};
use crate::providers::base::Provider;
use crate::providers::registry::ProviderRegistry;
use crate::tools::ToolDispatch;

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub system_prompt: String,
    /// Tool rounds allowed per turn before it fails
    pub max_tool_rounds: usize,
    pub default_temperature: Option<f32>,
    pub default_max_output_tokens: Option<u32>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            default_temperature: None,
            default_max_output_tokens: None,
        }
    }
}

/// One user message to answer, and how to answer it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    pub message: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    /// Tool schemas to offer instead of every registered tool
    #[serde(default)]
    pub tools: Option<Vec<Tool>>,
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
}

impl Turn {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn in_conversation<S: Into<String>>(mut self, id: S) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn owned_by<S: Into<String>>(mut self, owner_id: S) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_provider<S: Into<String>>(mut self, name: S) -> Self {
        self.provider_name = Some(name.into());
        self
    }
}

/// Result of a blocking turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub conversation_id: String,
    pub response: CompletionResponse,
}

/// Events of a streaming turn. Every event before the last is forwarded as
/// it arrives; the last is either a terminal event carrying the full content
/// or an error. Dropping the stream cancels the turn.
pub struct TurnStream {
    pub conversation_id: String,
    pub events: BoxStream<'static, GatewayResult<StreamEvent>>,
}

/// Everything resolved while building a turn
struct TurnContext {
    provider_name: String,
    provider: Arc<dyn Provider>,
    conversation: Conversation,
    /// System prompt, prior history and the new user message
    messages: Vec<Message>,
    tools: Vec<Tool>,
    model: String,
    temperature: Option<f32>,
    max_output_tokens: Option<u32>,
    tool_choice: Option<ToolChoice>,
}

impl TurnContext {
    fn request(&self, messages: Vec<Message>) -> CompletionRequest {
        let mut request = CompletionRequest::new(messages).with_model(self.model.clone());
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_output_tokens) = self.max_output_tokens {
            request = request.with_max_output_tokens(max_output_tokens);
        }
        if !self.tools.is_empty() {
            request = request.with_tools(self.tools.clone());
            if let Some(choice) = &self.tool_choice {
                request = request.with_tool_choice(choice.clone());
            }
        }
        request
    }
}

/// What has been produced so far across the rounds of a turn
#[derive(Default)]
struct TurnProgress {
    content: String,
    usage: Option<Usage>,
    rounds: usize,
}

impl TurnProgress {
    fn add_usage(&mut self, usage: Option<Usage>) {
        self.usage = match (self.usage, usage) {
            (Some(total), Some(round)) => Some(total.add(&round)),
            (total, round) => total.or(round),
        };
    }
}

/// Drives turns: builds requests, runs the tool loop and commits history.
///
/// Cheap to clone; every clone shares the same registry, tools and store.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    tools: Arc<ToolDispatch>,
    history: Arc<dyn HistoryStore>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        tools: Arc<ToolDispatch>,
        history: Arc<dyn HistoryStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            tools,
            history,
            settings,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run a turn to completion and return the final response
    pub async fn send(&self, turn: Turn) -> GatewayResult<TurnOutcome> {
        let result = self.run_blocking(turn).await;
        if let Err(err) = &result {
            error!(error = %err, kind = err.kind(), "turn aborted");
        }
        result
    }

    /// Run a turn as a stream of events
    pub fn stream(&self, turn: Turn) -> TurnStream {
        let conversation_id = turn
            .conversation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let turn = Turn {
            conversation_id: Some(conversation_id.clone()),
            ..turn
        };

        let this = self.clone();
        let events: BoxStream<'static, GatewayResult<StreamEvent>> = Box::pin(try_stream! {
            let ctx = this.begin(&turn).await?;
            let mut messages = ctx.messages.clone();
            let mut progress = TurnProgress::default();

            loop {
                let request = ctx.request(messages.clone());
                debug!(provider = %ctx.provider_name, messages = request.messages.len(), "streaming round");
                let mut upstream = ctx.provider.stream(&request).await?;

                let mut acc = StreamAccumulator::new();
                while let Some(event) = upstream.next().await {
                    let event = event?;
                    acc.push(&event);
                    if event.is_complete {
                        break;
                    }
                    if !event.is_empty() {
                        yield event;
                    }
                }
                drop(upstream);

                let response = acc.finish();
                progress.add_usage(response.usage);
                progress.content.push_str(&response.content);

                if !response.has_tool_calls() {
                    let conversation_id = this.finalize(&ctx, &progress.content, &response).await?;
                    debug!(%conversation_id, "streaming turn finalized");
                    yield StreamEvent {
                        id: Some(response.id).filter(|id| !id.is_empty()),
                        model_name: response.model_name,
                        content_delta: None,
                        tool_call_deltas: Vec::new(),
                        is_complete: true,
                        finish_reason: response.finish_reason,
                        content: Some(progress.content),
                        usage: progress.usage,
                    };
                    break;
                }

                let (next, rendering) = this.run_tool_round(&messages, &response, &mut progress).await?;
                messages = next;
                yield StreamEvent::delta(response.model_name.clone(), rendering);
            }
        });

        TurnStream {
            conversation_id,
            events: events
                .inspect_err(|err| error!(error = %err, kind = err.kind(), "streaming turn aborted"))
                .boxed(),
        }
    }

    async fn run_blocking(&self, turn: Turn) -> GatewayResult<TurnOutcome> {
        let ctx = self.begin(&turn).await?;
        let mut messages = ctx.messages.clone();
        let mut progress = TurnProgress::default();

        loop {
            let request = ctx.request(messages.clone());
            debug!(provider = %ctx.provider_name, messages = request.messages.len(), "blocking round");
            let response = ctx.provider.complete(&request).await?;
            progress.add_usage(response.usage);
            progress.content.push_str(&response.content);

            if !response.has_tool_calls() {
                let conversation_id = self.finalize(&ctx, &progress.content, &response).await?;
                return Ok(TurnOutcome {
                    conversation_id,
                    response: CompletionResponse {
                        content: progress.content,
                        usage: progress.usage,
                        ..response
                    },
                });
            }

            let (next, _) = self
                .run_tool_round(&messages, &response, &mut progress)
                .await?;
            messages = next;
        }
    }

    /// Building and Dispatching: load the conversation, resolve the adapter
    /// and assemble the first message list
    async fn begin(&self, turn: &Turn) -> GatewayResult<TurnContext> {
        let (provider_name, provider) = self
            .registry
            .resolve_or_default(turn.provider_name.as_deref())?;

        let existing = match &turn.conversation_id {
            Some(id) => self.history.get_by_id(id).await?,
            None => None,
        };
        let conversation = existing.unwrap_or_else(|| {
            Conversation::new(
                turn.conversation_id.clone(),
                turn.owner_id.clone(),
                &turn.message,
            )
        });

        let mut messages = with_system_prompt(&conversation.messages, &self.settings.system_prompt);
        messages.push(Message::user(turn.message.clone()));

        let tools = if provider.supports_tools() {
            turn.tools.clone().unwrap_or_else(|| self.tools.schemas())
        } else {
            Vec::new()
        };

        info!(
            provider = %provider_name,
            conversation = %conversation.id,
            tools = tools.len(),
            "starting turn"
        );

        Ok(TurnContext {
            model: turn
                .model_name
                .clone()
                .unwrap_or_else(|| provider.default_model().to_string()),
            temperature: turn.temperature.or(self.settings.default_temperature),
            max_output_tokens: turn
                .max_output_tokens
                .or(self.settings.default_max_output_tokens),
            tool_choice: turn.tool_choice.clone(),
            provider_name,
            provider,
            conversation,
            messages,
            tools,
        })
    }

    /// ToolPending: dispatch every call of `response` and return the next
    /// message list together with the tool-result segment added to the content
    async fn run_tool_round(
        &self,
        messages: &[Message],
        response: &CompletionResponse,
        progress: &mut TurnProgress,
    ) -> GatewayResult<(Vec<Message>, String)> {
        if progress.rounds >= self.settings.max_tool_rounds {
            return Err(GatewayError::ToolLoopExceeded {
                limit: self.settings.max_tool_rounds,
            });
        }
        progress.rounds += 1;

        let results = self.tools.dispatch_all(&response.tool_calls).await;
        info!(
            round = progress.rounds,
            calls = response.tool_calls.len(),
            failed = results.iter().filter(|r| r.is_error()).count(),
            "tool round complete"
        );

        let rendering = render_tool_results(&results);
        let segment = format!("\n{}\n", rendering);
        progress.content.push_str(&segment);

        let next = [
            messages,
            &[
                Message::assistant(render_tool_calls(&response.content, &response.tool_calls)),
                Message::assistant(rendering),
            ],
        ]
        .concat();
        Ok((next, segment))
    }

    /// Finalizing: the single history write of a turn
    async fn finalize(
        &self,
        ctx: &TurnContext,
        content: &str,
        response: &CompletionResponse,
    ) -> GatewayResult<String> {
        let mut conversation = ctx.conversation.clone();
        conversation.messages = [ctx.messages.as_slice(), &[Message::assistant(content)]].concat();
        conversation.updated_at = Utc::now();
        conversation.provider_name = Some(ctx.provider_name.clone());
        conversation.model_name = Some(if response.model_name.is_empty() {
            ctx.model.clone()
        } else {
            response.model_name.clone()
        });

        let id = conversation.id.clone();
        self.history.save(conversation).await?;
        Ok(id)
    }
}

/// Assistant text followed by the JSON list of requested calls
pub fn render_tool_calls(text: &str, calls: &[ToolCall]) -> String {
    let calls: Vec<Value> = calls
        .iter()
        .map(|call| {
            json!({
                "name": call.name,
                "arguments": call
                    .arguments()
                    .unwrap_or_else(|_| Value::String(call.arguments_json.clone())),
            })
        })
        .collect();
    let rendering = json!({ "toolCalls": calls }).to_string();
    if text.trim().is_empty() {
        rendering
    } else {
        format!("{}\n{}", text, rendering)
    }
}

pub fn render_tool_results(results: &[ToolResult]) -> String {
    json!({ "toolResults": results }).to_string()
}
