// libs/session-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use shared_models::auth::User;

// ==============================================================================
// CORE SESSION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub therapist_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub notes: Option<String>,
    pub treatment_plan: Option<String>,
    pub session_rating: Option<i32>,
    pub mood_rating: Option<i32>,
    pub follow_up_needed: Option<bool>,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn scheduled_end_time(&self) -> DateTime<Utc> {
        self.start_time + chrono::Duration::minutes(self.duration_minutes as i64)
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl SessionStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::NoShow
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Scheduled => write!(f, "scheduled"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
            SessionStatus::NoShow => write!(f, "no_show"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Individual,
    InitialAssessment,
    FollowUp,
    CrisisIntervention,
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionType::Individual => write!(f, "individual"),
            SessionType::InitialAssessment => write!(f, "initial_assessment"),
            SessionType::FollowUp => write!(f, "follow_up"),
            SessionType::CrisisIntervention => write!(f, "crisis_intervention"),
        }
    }
}

// ==============================================================================
// CHANGE HISTORY MODELS
// ==============================================================================

/// Append-only audit entry. Written in the same transaction as the
/// reschedule or cancellation it documents, never updated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub change_type: ChangeType,
    pub actor_id: Uuid,
    pub notes: Option<String>,
    pub previous_start: Option<DateTime<Utc>>,
    pub new_start: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Reschedule,
    Cancellation,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Reschedule => write!(f, "reschedule"),
            ChangeType::Cancellation => write!(f, "cancellation"),
        }
    }
}

// ==============================================================================
// AVAILABILITY MODELS
// ==============================================================================

/// One bookable slot. Derived on demand, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityWindow {
    pub therapist_id: Uuid,
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
}

// ==============================================================================
// NOTIFICATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationRequest {
    pub recipient_id: Uuid,
    pub notification_type: NotificationType,
    pub content: String,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Cancellation,
    Reschedule,
    FollowUp,
}

// ==============================================================================
// ACTOR MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Patient,
    Therapist,
    Admin,
}

/// The authenticated identity every operation runs as. Derived from the
/// validated token, never from ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn from_user(user: &User) -> Result<Self, String> {
        let id = Uuid::parse_str(&user.id)
            .map_err(|_| "Token subject is not a valid id".to_string())?;

        let role = match user.role.as_deref() {
            Some("patient") => ActorRole::Patient,
            Some("therapist") => ActorRole::Therapist,
            Some("admin") => ActorRole::Admin,
            other => return Err(format!("Unrecognized role: {}", other.unwrap_or("none"))),
        };

        Ok(Self { id, role })
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSessionRequest {
    pub patient_id: Uuid,
    pub therapist_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub session_type: SessionType,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSessionRequest {
    pub reason: String,
    pub notify_patient: bool,
    /// When set, the cancellation notice tells the patient a replacement
    /// session will be arranged; otherwise it asks them to rebook.
    pub reschedule_intent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleSessionRequest {
    pub new_start_time: DateTime<Utc>,
    pub new_duration_minutes: Option<i32>,
    pub notes: Option<String>,
    pub notify_patient: bool,
}

/// The completion payload. Persisted in a single atomic write together
/// with the status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteSessionRequest {
    pub notes: String,
    pub treatment_plan: Option<String>,
    pub session_rating: Option<i32>,
    pub mood_rating: Option<i32>,
    pub follow_up_needed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationOutcome {
    pub session: Session,
    pub late_cancellation: bool,
    pub notification: Option<NotificationRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleOutcome {
    pub session: Session,
    pub change_record: ChangeRecord,
    pub notification: Option<NotificationRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub session: Session,
    pub follow_up: Option<Session>,
    /// Why a requested follow-up was not created. The completion itself
    /// is already committed when this is set.
    pub follow_up_skipped: Option<String>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum SchedulingError {
    #[error("Session not found")]
    NotFound,

    #[error("Therapist not found or not accepting sessions")]
    TherapistNotFound,

    #[error("Actor is not allowed to perform this operation")]
    Unauthorized,

    #[error("Session cannot be modified in current status: {0}")]
    InvalidTransition(SessionStatus),

    #[error("Time slot {start_time} is already booked")]
    SlotConflict {
        start_time: DateTime<Utc>,
        /// Remaining open starts for the same therapist and day, so the
        /// caller can offer the next free time.
        open_slots: Vec<DateTime<Utc>>,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Scheduling backend unavailable: {0}")]
    Unavailable(String),
}
