// libs/session-cell/src/handlers.rs
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use shared_models::{AppError, User};

use crate::models::{
    Actor, ActorRole, BookSessionRequest, CancelSessionRequest, CompleteSessionRequest,
    RescheduleSessionRequest, SchedulingError,
};
use crate::services::{AvailabilityService, BookingService, HistoryService, LifecycleService};
use crate::SchedulingState;

// ==============================================================================
// QUERY PARAMETERS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AvailabilityParams {
    pub therapist_id: Uuid,
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpcomingParams {
    pub hours_ahead: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RecentNotesParams {
    pub patient_id: Uuid,
    pub therapist_id: Option<Uuid>,
    pub limit: Option<i64>,
}

// ==============================================================================
// HELPERS
// ==============================================================================

fn actor_from(user: &User) -> Result<Actor, AppError> {
    Actor::from_user(user).map_err(AppError::Auth)
}

fn booking_service(state: &SchedulingState) -> BookingService {
    BookingService::new(
        state.store.clone(),
        state.directory.clone(),
        state.policy.clone(),
    )
}

fn lifecycle_service(state: &SchedulingState) -> LifecycleService {
    LifecycleService::new(
        state.store.clone(),
        state.directory.clone(),
        state.dispatcher.clone(),
        state.policy.clone(),
    )
}

fn to_app_error(err: SchedulingError) -> AppError {
    match err {
        SchedulingError::NotFound => AppError::NotFound("Session not found".to_string()),
        SchedulingError::TherapistNotFound => {
            AppError::NotFound("Therapist not found or not accepting sessions".to_string())
        }
        SchedulingError::Unauthorized => {
            AppError::Forbidden("Not allowed to perform this operation".to_string())
        }
        SchedulingError::InvalidTransition(status) => {
            AppError::Conflict(format!("Session cannot be modified in status: {}", status))
        }
        SchedulingError::SlotConflict { start_time, .. } => AppError::Conflict(format!(
            "Time slot {} is already booked",
            start_time.to_rfc3339()
        )),
        SchedulingError::ValidationError(msg) => AppError::ValidationError(msg),
        SchedulingError::DatabaseError(msg) => AppError::Database(msg),
        SchedulingError::Unavailable(msg) => AppError::Unavailable(msg),
    }
}

/// Conflict responses keep the refused start plus the day's remaining
/// open slots, so a client can offer the next free time directly.
fn slot_conflict_response(start_time: DateTime<Utc>, open_slots: &[DateTime<Utc>]) -> Response {
    (
        StatusCode::CONFLICT,
        Json(json!({
            "error": format!("Time slot {} is already booked", start_time.to_rfc3339()),
            "open_slots": open_slots,
        })),
    )
        .into_response()
}

// ==============================================================================
// HANDLERS
// ==============================================================================

pub async fn get_available_slots(
    State(state): State<Arc<SchedulingState>>,
    Query(params): Query<AvailabilityParams>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let _actor = actor_from(&user)?;

    if params.date < Utc::now().date_naive() {
        return Err(AppError::BadRequest(
            "Availability cannot be computed for past dates".to_string(),
        ));
    }

    let service = AvailabilityService::new(state.store.clone(), state.policy.clone());
    let slots = service
        .available_slots(params.therapist_id, params.date)
        .await
        .map_err(to_app_error)?;

    let total = slots.len();
    Ok(Json(json!({
        "therapist_id": params.therapist_id,
        "date": params.date,
        "available_slots": slots,
        "total": total
    })))
}

#[axum::debug_handler]
pub async fn book_session(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookSessionRequest>,
) -> Result<Response, AppError> {
    info!("Booking request for patient {}", request.patient_id);

    let actor = actor_from(&user)?;
    let service = booking_service(&state);

    match service.book_session(&actor, request).await {
        Ok(session) => Ok(Json(json!({
            "success": true,
            "session": session,
            "message": "Session booked successfully"
        }))
        .into_response()),
        Err(SchedulingError::SlotConflict {
            start_time,
            open_slots,
        }) => Ok(slot_conflict_response(start_time, &open_slots)),
        Err(err) => Err(to_app_error(err)),
    }
}

pub async fn get_session(
    State(state): State<Arc<SchedulingState>>,
    Path(session_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from(&user)?;
    let service = booking_service(&state);

    let session = service
        .get_session(&actor, session_id)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!(session)))
}

pub async fn cancel_session(
    State(state): State<Arc<SchedulingState>>,
    Path(session_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<CancelSessionRequest>,
) -> Result<Json<Value>, AppError> {
    info!("Cancel request for session {}", session_id);

    let actor = actor_from(&user)?;
    let service = lifecycle_service(&state);

    let outcome = service
        .cancel_session(&actor, session_id, request)
        .await
        .map_err(to_app_error)?;

    let message = if outcome.late_cancellation {
        "Session cancelled (late cancellation)"
    } else {
        "Session cancelled successfully"
    };

    Ok(Json(json!({
        "success": true,
        "session": outcome.session,
        "late_cancellation": outcome.late_cancellation,
        "notification": outcome.notification,
        "message": message
    })))
}

pub async fn reschedule_session(
    State(state): State<Arc<SchedulingState>>,
    Path(session_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<RescheduleSessionRequest>,
) -> Result<Response, AppError> {
    info!("Reschedule request for session {}", session_id);

    let actor = actor_from(&user)?;
    let service = lifecycle_service(&state);

    match service.reschedule_session(&actor, session_id, request).await {
        Ok(outcome) => Ok(Json(json!({
            "success": true,
            "session": outcome.session,
            "change_record": outcome.change_record,
            "notification": outcome.notification,
            "message": "Session rescheduled successfully"
        }))
        .into_response()),
        Err(SchedulingError::SlotConflict {
            start_time,
            open_slots,
        }) => Ok(slot_conflict_response(start_time, &open_slots)),
        Err(err) => Err(to_app_error(err)),
    }
}

pub async fn complete_session(
    State(state): State<Arc<SchedulingState>>,
    Path(session_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<CompleteSessionRequest>,
) -> Result<Json<Value>, AppError> {
    info!("Complete request for session {}", session_id);

    let actor = actor_from(&user)?;
    let service = lifecycle_service(&state);

    let outcome = service
        .complete_session(&actor, session_id, request)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "session": outcome.session,
        "follow_up": outcome.follow_up,
        "follow_up_skipped": outcome.follow_up_skipped,
        "message": "Session completed successfully"
    })))
}

pub async fn mark_no_show(
    State(state): State<Arc<SchedulingState>>,
    Path(session_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    info!("No-show request for session {}", session_id);

    let actor = actor_from(&user)?;
    let service = lifecycle_service(&state);

    let session = service
        .mark_no_show(&actor, session_id)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "session": session,
        "message": "Session marked as no-show"
    })))
}

pub async fn get_change_history(
    State(state): State<Arc<SchedulingState>>,
    Path(session_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from(&user)?;
    let service = HistoryService::new(state.store.clone());

    let history = service
        .change_history(&actor, session_id, params.limit)
        .await
        .map_err(to_app_error)?;

    let total = history.len();
    Ok(Json(json!({
        "session_id": session_id,
        "history": history,
        "total": total
    })))
}

pub async fn get_upcoming_sessions(
    State(state): State<Arc<SchedulingState>>,
    Query(params): Query<UpcomingParams>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from(&user)?;
    let service = booking_service(&state);

    let sessions = service
        .upcoming_sessions(&actor, params.hours_ahead)
        .await
        .map_err(to_app_error)?;

    let total = sessions.len();
    Ok(Json(json!({
        "upcoming_sessions": sessions,
        "total": total,
        "hours_ahead": params.hours_ahead.unwrap_or(state.policy.default_upcoming_hours)
    })))
}

pub async fn get_recent_session_notes(
    State(state): State<Arc<SchedulingState>>,
    Query(params): Query<RecentNotesParams>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from(&user)?;

    if actor.role == ActorRole::Patient {
        return Err(AppError::Forbidden(
            "Session notes are restricted to the treating therapist".to_string(),
        ));
    }
    let therapist_id = match actor.role {
        ActorRole::Therapist => actor.id,
        _ => params.therapist_id.ok_or_else(|| {
            AppError::BadRequest("therapist_id is required for admin queries".to_string())
        })?,
    };

    let service = HistoryService::new(state.store.clone());
    let notes = service
        .recent_completed_notes(&actor, params.patient_id, therapist_id, params.limit)
        .await
        .map_err(to_app_error)?;

    let total = notes.len();
    Ok(Json(json!({
        "patient_id": params.patient_id,
        "therapist_id": therapist_id,
        "notes": notes,
        "total": total
    })))
}
