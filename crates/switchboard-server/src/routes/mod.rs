// Export route modules
pub mod conversations;
pub mod providers;
pub mod reply;

use crate::state::AppState;
use axum::Router;

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(reply::routes(state.clone()))
        .merge(conversations::routes(state.clone()))
        .merge(providers::routes(state))
}
