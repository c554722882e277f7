pub mod directory;
pub mod memory;
pub mod postgrest;

pub use directory::{
    OpenTherapistDirectory, PostgrestTherapistDirectory, StaticTherapistDirectory,
    TherapistDirectory,
};
pub use memory::MemorySessionStore;
pub use postgrest::PostgrestSessionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{ChangeRecord, CompleteSessionRequest, Session};

/// Failures a store can produce. Services translate these into
/// domain errors; only the store knows which backend misbehaved.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    Missing,

    /// The (therapist, start time) slot claim lost to a concurrent
    /// writer or an existing non-cancelled session.
    #[error("slot already claimed")]
    DuplicateSlot,

    /// A compare-and-set update matched no row because the status
    /// changed underneath us.
    #[error("row no longer in expected status")]
    StaleStatus,

    #[error("backend request timed out")]
    Timeout,

    #[error("{0}")]
    Backend(String),
}

/// Role-derived visibility for window queries.
#[derive(Debug, Clone, Copy)]
pub enum SessionScope {
    Patient(Uuid),
    Therapist(Uuid),
    All,
}

/// Persistence port for sessions and their audit trail.
///
/// Slot uniqueness lives here: `insert_session` and
/// `reschedule_session` must guarantee at most one non-cancelled
/// session per (therapist, start time) even under concurrent calls,
/// reporting the loser with `DuplicateSlot`. The four status mutations
/// are compare-and-set from `scheduled` and report a lost race with
/// `StaleStatus`. Implementations are expected to bound their own
/// latency and surface overruns as `Timeout`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &Session) -> Result<Session, StoreError>;

    async fn fetch_session(&self, session_id: Uuid) -> Result<Session, StoreError>;

    /// Non-cancelled sessions for a therapist with start in [from, to).
    async fn active_sessions_in_range(
        &self,
        therapist_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError>;

    /// Cancel from `scheduled`, persisting reason, timestamp and the
    /// audit record in one transaction.
    async fn cancel_session(
        &self,
        session_id: Uuid,
        reason: &str,
        cancelled_at: DateTime<Utc>,
        record: &ChangeRecord,
    ) -> Result<Session, StoreError>;

    /// Move a `scheduled` session to a new slot, re-claiming uniqueness
    /// and writing the audit record in one transaction.
    async fn reschedule_session(
        &self,
        session_id: Uuid,
        new_start: DateTime<Utc>,
        new_duration_minutes: i32,
        record: &ChangeRecord,
    ) -> Result<Session, StoreError>;

    /// Complete from `scheduled`, persisting the whole notes payload
    /// atomically with the status change.
    async fn complete_session(
        &self,
        session_id: Uuid,
        payload: &CompleteSessionRequest,
    ) -> Result<Session, StoreError>;

    async fn mark_no_show(&self, session_id: Uuid) -> Result<Session, StoreError>;

    /// Audit records for a session, newest first.
    async fn change_records(
        &self,
        session_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ChangeRecord>, StoreError>;

    /// Completed sessions for a patient/therapist pair, newest first.
    async fn recent_completed_sessions(
        &self,
        patient_id: Uuid,
        therapist_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Session>, StoreError>;

    /// Scheduled sessions with start in [from, to], earliest first.
    async fn scheduled_in_window(
        &self,
        scope: SessionScope,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError>;

    /// Earliest scheduled session for the pair with start strictly
    /// after `after`, if any.
    async fn next_scheduled_for_pair(
        &self,
        patient_id: Uuid,
        therapist_id: Uuid,
        after: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;
}
