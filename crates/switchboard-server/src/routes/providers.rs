use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ProvidersResponse {
    providers: Vec<String>,
    default: Option<String>,
}

async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    let registry = state.orchestrator.registry();
    Json(ProvidersResponse {
        providers: registry.names(),
        default: registry.default_name().map(str::to_string),
    })
}

async fn status() -> &'static str {
    "ok"
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/providers", get(list_providers))
        .route("/status", get(status))
        .with_state(state)
}
