use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex};

use crate::errors::{GatewayError, GatewayResult};
use crate::models::completion::{
    CompletionRequest, CompletionResponse, StreamAccumulator, StreamEvent,
};
use crate::models::tool::ToolCallDelta;
use crate::providers::base::{EventStream, Provider};

/// One scripted reaction of the mock to a request
#[derive(Debug, Clone)]
pub enum MockReply {
    /// A whole response; streamed as one text delta, tool deltas and a terminal event
    Response(CompletionResponse),
    /// Exact events to stream
    Events(Vec<StreamEvent>),
    /// Events followed by a mid-stream failure
    Broken(Vec<StreamEvent>, GatewayError),
    /// Events followed by a stream that never ends
    Hang(Vec<StreamEvent>),
    /// Failure before any event
    Error(GatewayError),
}

/// A mock provider that returns pre-configured replies for testing and
/// records every request it receives
pub struct MockProvider {
    name: String,
    supports_tools: bool,
    replies: Arc<Mutex<Vec<MockReply>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of replies
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            name: "mock".to_string(),
            supports_tools: true,
            replies: Arc::new(Mutex::new(replies)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn without_tools(mut self) -> Self {
        self.supports_tools = false;
        self
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, request: &CompletionRequest) -> MockReply {
        self.requests.lock().unwrap().push(request.clone());
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            MockReply::Error(GatewayError::Protocol(
                "mock provider has no replies left".to_string(),
            ))
        } else {
            replies.remove(0)
        }
    }
}

/// Plain text response with a stop reason, as most tests want
pub fn text_response(content: &str) -> CompletionResponse {
    CompletionResponse {
        id: "resp".to_string(),
        model_name: "mock-model".to_string(),
        content: content.to_string(),
        finish_reason: Some("stop".to_string()),
        usage: None,
        tool_calls: Vec::new(),
    }
}

fn response_to_events(response: CompletionResponse) -> Vec<StreamEvent> {
    let id = Some(response.id.clone());
    let model = response.model_name.clone();
    let mut events = Vec::new();
    if !response.content.is_empty() {
        events.push(StreamEvent::delta(model.clone(), response.content).with_id(id.clone()));
    }
    for (index, call) in response.tool_calls.into_iter().enumerate() {
        events.push(
            StreamEvent::tool_delta(
                model.clone(),
                ToolCallDelta {
                    index,
                    id: call.id,
                    name: Some(call.name),
                    arguments: Some(call.arguments_json),
                },
            )
            .with_id(id.clone()),
        );
    }
    events.push(
        StreamEvent::terminal(model, response.finish_reason)
            .with_id(id)
            .with_usage(response.usage),
    );
    events
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    fn supports_tools(&self) -> bool {
        self.supports_tools
    }

    async fn complete(&self, request: &CompletionRequest) -> GatewayResult<CompletionResponse> {
        match self.next_reply(request) {
            MockReply::Response(response) => Ok(response),
            MockReply::Events(events) => {
                let mut acc = StreamAccumulator::new();
                events.iter().for_each(|e| acc.push(e));
                Ok(acc.finish())
            }
            MockReply::Broken(_, err) | MockReply::Error(err) => Err(err),
            MockReply::Hang(_) => Err(GatewayError::UpstreamTimeout(
                "mock provider hung".to_string(),
            )),
        }
    }

    async fn stream(&self, request: &CompletionRequest) -> GatewayResult<EventStream> {
        match self.next_reply(request) {
            MockReply::Response(response) => {
                Ok(stream::iter(response_to_events(response).into_iter().map(Ok)).boxed())
            }
            MockReply::Events(events) => Ok(stream::iter(events.into_iter().map(Ok)).boxed()),
            MockReply::Broken(events, err) => Ok(stream::iter(
                events
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(err))),
            )
            .boxed()),
            MockReply::Hang(events) => Ok(stream::iter(events.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            MockReply::Error(err) => Err(err),
        }
    }
}
