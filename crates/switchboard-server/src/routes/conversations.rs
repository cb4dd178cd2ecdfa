use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use switchboard::{history::HistoryStore, models::conversation::Conversation};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnerQuery {
    owner_id: String,
}

async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let conversations = state
        .orchestrator
        .history()
        .get_by_owner(&query.owner_id)
        .await?;
    Ok(Json(conversations))
}

async fn delete_owner_conversations(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state
        .orchestrator
        .history()
        .delete_by_owner(&query.owner_id)
        .await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    state
        .orchestrator
        .history()
        .get_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Conversation not found: {}", id)))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.orchestrator.history().delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Conversation not found: {}", id)))
    }
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/conversations",
            get(list_conversations).delete(delete_owner_conversations),
        )
        .route(
            "/conversations/:id",
            get(get_conversation).delete(delete_conversation),
        )
        .with_state(state)
}
