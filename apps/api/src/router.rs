use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use session_cell::{session_routes, SchedulingState};

pub fn create_router(state: Arc<SchedulingState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Therapy scheduling API is running!" }))
        .nest("/sessions", session_routes(state))
}
