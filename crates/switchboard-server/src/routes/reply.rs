use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use switchboard::{
    errors::GatewayError,
    models::completion::{StreamEvent, Usage},
    orchestrator::{Turn, TurnStream},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    owner_id: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    message: String,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_output_tokens: Option<u32>,
}

impl From<ReplyRequest> for Turn {
    fn from(request: ReplyRequest) -> Self {
        Turn {
            conversation_id: request.conversation_id,
            owner_id: request.owner_id,
            provider_name: request.provider,
            model_name: request.model,
            message: request.message,
            temperature: request.temperature,
            max_output_tokens: request.max_output_tokens,
            ..Default::default()
        }
    }
}

// Server-sent events: one `data:` line per event, blank line after each
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            Body::from_stream(self),
        )
            .into_response()
    }
}

fn frame(value: &Value) -> String {
    format!("data: {}\n\n", value)
}

/// Render one turn event; events carrying no text are not forwarded
fn format_event(event: &StreamEvent, conversation_id: &str) -> Option<String> {
    if event.is_complete {
        let mut value = json!({
            "id": event.id,
            "content": "",
            "isComplete": true,
            "finishReason": event.finish_reason,
            "conversationId": conversation_id,
        });
        if let Some(usage) = event.usage {
            value["usage"] = json!(usage);
        }
        return Some(frame(&value));
    }

    let delta = event.content_delta.as_deref().filter(|d| !d.is_empty())?;
    Some(frame(&json!({
        "id": event.id,
        "content": delta,
        "isComplete": false,
    })))
}

fn format_error(err: &GatewayError) -> String {
    frame(&json!({
        "error": true,
        "kind": err.kind(),
        "message": err.to_string(),
    }))
}

async fn handler(
    State(state): State<AppState>,
    Json(request): Json<ReplyRequest>,
) -> SseResponse {
    // Create channel for streaming
    let (tx, rx) = mpsc::channel(100);
    let stream = ReceiverStream::new(rx);

    let TurnStream {
        conversation_id,
        mut events,
    } = state.orchestrator.stream(request.into());

    // Spawn task to handle streaming
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.next() => {
                    match event {
                        Some(Ok(event)) => {
                            let done = event.is_complete;
                            if let Some(line) = format_event(&event, &conversation_id) {
                                if tx.send(line).await.is_err() {
                                    break;
                                }
                            }
                            if done {
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            let _ = tx.send(format_error(&err)).await;
                            break;
                        }
                        None => break,
                    }
                }
                _ = tx.closed() => {
                    // Dropping `events` below cancels the upstream call
                    info!(conversation = %conversation_id, "client disconnected, cancelling turn");
                    break;
                }
            }
        }
        debug!(conversation = %conversation_id, "reply stream closed");
    });

    SseResponse::new(stream)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AskResponse {
    conversation_id: String,
    id: String,
    model_name: String,
    content: String,
    finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<Usage>,
}

// simple ask an AI for a response, non streaming
async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<ReplyRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let outcome = state.orchestrator.send(request.into()).await?;
    let response = outcome.response;

    Ok(Json(AskResponse {
        conversation_id: outcome.conversation_id,
        id: response.id,
        model_name: response.model_name,
        content: response.content,
        finish_reason: response.finish_reason,
        usage: response.usage,
    }))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/reply", post(handler))
        .route("/ask", post(ask_handler))
        .with_state(state)
}
