// libs/session-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

use shared_utils::auth_middleware;

use crate::handlers;
use crate::SchedulingState;

/// Session routes. Everything sits behind the auth layer; handlers can
/// rely on an authenticated `User` extension being present.
pub fn session_routes(state: Arc<SchedulingState>) -> Router {
    let protected_routes = Router::new()
        .route("/", post(handlers::book_session))
        .route("/availability", get(handlers::get_available_slots))
        .route("/upcoming", get(handlers::get_upcoming_sessions))
        .route("/notes/recent", get(handlers::get_recent_session_notes))
        .route("/{session_id}", get(handlers::get_session))
        .route("/{session_id}/cancel", post(handlers::cancel_session))
        .route(
            "/{session_id}/reschedule",
            patch(handlers::reschedule_session),
        )
        .route("/{session_id}/complete", post(handlers::complete_session))
        .route("/{session_id}/no-show", post(handlers::mark_no_show))
        .route("/{session_id}/history", get(handlers::get_change_history))
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new().merge(protected_routes).with_state(state)
}
