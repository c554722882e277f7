use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Actor, ActorRole, ChangeRecord, SchedulingError, Session};
use crate::policy::{authorize, SessionAction};
use crate::services::map_store_error;
use crate::store::SessionStore;

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 200;
const DEFAULT_NOTES_LIMIT: i64 = 10;
const MAX_NOTES_LIMIT: i64 = 50;

pub struct HistoryService {
    store: Arc<dyn SessionStore>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Change records for a session in chronological order.
    pub async fn change_history(
        &self,
        actor: &Actor,
        session_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<ChangeRecord>, SchedulingError> {
        let session = self
            .store
            .fetch_session(session_id)
            .await
            .map_err(map_store_error)?;
        authorize(actor, SessionAction::ViewHistory, &session)?;

        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let mut records = self
            .store
            .change_records(session_id, limit)
            .await
            .map_err(map_store_error)?;
        // The store hands these back newest first; readers want the
        // story in the order it happened.
        records.reverse();

        debug!(
            "Loaded {} change records for session {}",
            records.len(),
            session_id
        );
        Ok(records)
    }

    /// Most recent completed-session notes for a patient/therapist
    /// pair, newest first. Restricted to the treating therapist and
    /// admins.
    pub async fn recent_completed_notes(
        &self,
        actor: &Actor,
        patient_id: Uuid,
        therapist_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<Session>, SchedulingError> {
        match actor.role {
            ActorRole::Admin => {}
            ActorRole::Therapist if therapist_id == actor.id => {}
            _ => return Err(SchedulingError::Unauthorized),
        }

        let limit = limit.unwrap_or(DEFAULT_NOTES_LIMIT).clamp(1, MAX_NOTES_LIMIT);
        self.store
            .recent_completed_sessions(patient_id, therapist_id, limit)
            .await
            .map_err(map_store_error)
    }
}
