use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{ChangeRecord, CompleteSessionRequest, Session, SessionStatus};
use crate::store::{SessionScope, SessionStore, StoreError};

/// In-memory store for tests and local development. A single mutex
/// serializes every call, so the check-then-insert slot claim is atomic
/// without a database underneath.
pub struct MemorySessionStore {
    inner: Mutex<Tables>,
}

struct Tables {
    sessions: HashMap<Uuid, Session>,
    records: Vec<ChangeRecord>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Tables {
                sessions: HashMap::new(),
                records: Vec::new(),
            }),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn slot_taken(
    tables: &Tables,
    therapist_id: Uuid,
    start_time: DateTime<Utc>,
    exclude: Option<Uuid>,
) -> bool {
    tables.sessions.values().any(|s| {
        s.therapist_id == therapist_id
            && s.start_time == start_time
            && s.status != SessionStatus::Cancelled
            && exclude != Some(s.id)
    })
}

fn scheduled_row<'a>(
    tables: &'a mut Tables,
    session_id: Uuid,
) -> Result<&'a mut Session, StoreError> {
    let session = tables
        .sessions
        .get_mut(&session_id)
        .ok_or(StoreError::Missing)?;
    if session.status != SessionStatus::Scheduled {
        return Err(StoreError::StaleStatus);
    }
    Ok(session)
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert_session(&self, session: &Session) -> Result<Session, StoreError> {
        let mut tables = self.inner.lock().await;
        if slot_taken(&tables, session.therapist_id, session.start_time, None) {
            return Err(StoreError::DuplicateSlot);
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(session.clone())
    }

    async fn fetch_session(&self, session_id: Uuid) -> Result<Session, StoreError> {
        let tables = self.inner.lock().await;
        tables
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or(StoreError::Missing)
    }

    async fn active_sessions_in_range(
        &self,
        therapist_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let tables = self.inner.lock().await;
        let mut sessions: Vec<Session> = tables
            .sessions
            .values()
            .filter(|s| {
                s.therapist_id == therapist_id
                    && s.status != SessionStatus::Cancelled
                    && s.start_time >= from
                    && s.start_time < to
            })
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.start_time);
        Ok(sessions)
    }

    async fn cancel_session(
        &self,
        session_id: Uuid,
        reason: &str,
        cancelled_at: DateTime<Utc>,
        record: &ChangeRecord,
    ) -> Result<Session, StoreError> {
        let mut tables = self.inner.lock().await;
        let session = scheduled_row(&mut tables, session_id)?;
        session.status = SessionStatus::Cancelled;
        session.cancellation_reason = Some(reason.to_string());
        session.cancelled_at = Some(cancelled_at);
        session.updated_at = cancelled_at;
        let updated = session.clone();
        tables.records.push(record.clone());
        Ok(updated)
    }

    async fn reschedule_session(
        &self,
        session_id: Uuid,
        new_start: DateTime<Utc>,
        new_duration_minutes: i32,
        record: &ChangeRecord,
    ) -> Result<Session, StoreError> {
        let mut tables = self.inner.lock().await;
        {
            let session = tables
                .sessions
                .get(&session_id)
                .ok_or(StoreError::Missing)?;
            if session.status != SessionStatus::Scheduled {
                return Err(StoreError::StaleStatus);
            }
            if slot_taken(&tables, session.therapist_id, new_start, Some(session_id)) {
                return Err(StoreError::DuplicateSlot);
            }
        }
        let session = scheduled_row(&mut tables, session_id)?;
        session.start_time = new_start;
        session.duration_minutes = new_duration_minutes;
        session.updated_at = Utc::now();
        let updated = session.clone();
        tables.records.push(record.clone());
        Ok(updated)
    }

    async fn complete_session(
        &self,
        session_id: Uuid,
        payload: &CompleteSessionRequest,
    ) -> Result<Session, StoreError> {
        let mut tables = self.inner.lock().await;
        let session = scheduled_row(&mut tables, session_id)?;
        session.status = SessionStatus::Completed;
        session.notes = Some(payload.notes.clone());
        session.treatment_plan = payload.treatment_plan.clone();
        session.session_rating = payload.session_rating;
        session.mood_rating = payload.mood_rating;
        session.follow_up_needed = Some(payload.follow_up_needed);
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn mark_no_show(&self, session_id: Uuid) -> Result<Session, StoreError> {
        let mut tables = self.inner.lock().await;
        let session = scheduled_row(&mut tables, session_id)?;
        session.status = SessionStatus::NoShow;
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn change_records(
        &self,
        session_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ChangeRecord>, StoreError> {
        let tables = self.inner.lock().await;
        let mut records: Vec<ChangeRecord> = tables
            .records
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        // Insertion order doubles as the chronological order, so newest
        // first is just the reverse.
        records.reverse();
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }

    async fn recent_completed_sessions(
        &self,
        patient_id: Uuid,
        therapist_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Session>, StoreError> {
        let tables = self.inner.lock().await;
        let mut sessions: Vec<Session> = tables
            .sessions
            .values()
            .filter(|s| {
                s.patient_id == patient_id
                    && s.therapist_id == therapist_id
                    && s.status == SessionStatus::Completed
            })
            .cloned()
            .collect();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.start_time));
        sessions.truncate(limit.max(0) as usize);
        Ok(sessions)
    }

    async fn scheduled_in_window(
        &self,
        scope: SessionScope,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let tables = self.inner.lock().await;
        let mut sessions: Vec<Session> = tables
            .sessions
            .values()
            .filter(|s| {
                let in_scope = match scope {
                    SessionScope::Patient(id) => s.patient_id == id,
                    SessionScope::Therapist(id) => s.therapist_id == id,
                    SessionScope::All => true,
                };
                in_scope
                    && s.status == SessionStatus::Scheduled
                    && s.start_time >= from
                    && s.start_time <= to
            })
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.start_time);
        Ok(sessions)
    }

    async fn next_scheduled_for_pair(
        &self,
        patient_id: Uuid,
        therapist_id: Uuid,
        after: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let tables = self.inner.lock().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| {
                s.patient_id == patient_id
                    && s.therapist_id == therapist_id
                    && s.status == SessionStatus::Scheduled
                    && s.start_time > after
            })
            .min_by_key(|s| s.start_time)
            .cloned())
    }
}
