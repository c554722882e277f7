// libs/session-cell/src/services/booking.rs
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    Actor, ActorRole, BookSessionRequest, SchedulingError, Session, SessionStatus,
};
use crate::policy::{authorize, authorize_booking, SchedulingPolicy, SessionAction};
use crate::services::availability::AvailabilityService;
use crate::services::map_store_error;
use crate::store::{SessionScope, SessionStore, StoreError, TherapistDirectory};

pub struct BookingService {
    store: Arc<dyn SessionStore>,
    directory: Arc<dyn TherapistDirectory>,
    availability: AvailabilityService,
    policy: SchedulingPolicy,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        directory: Arc<dyn TherapistDirectory>,
        policy: SchedulingPolicy,
    ) -> Self {
        Self {
            availability: AvailabilityService::new(store.clone(), policy.clone()),
            store,
            directory,
            policy,
        }
    }

    /// Books a session into a free slot. The store owns the slot claim,
    /// so under concurrent requests for the same (therapist, start)
    /// exactly one caller gets the session and the rest get the
    /// conflict.
    pub async fn book_session(
        &self,
        actor: &Actor,
        request: BookSessionRequest,
    ) -> Result<Session, SchedulingError> {
        info!(
            "Booking session for patient {} with therapist {} at {}",
            request.patient_id, request.therapist_id, request.start_time
        );

        authorize_booking(actor, request.patient_id, request.therapist_id)?;
        self.validate_booking_request(&request)?;

        let bookable = self
            .directory
            .is_bookable(request.therapist_id)
            .await
            .map_err(map_store_error)?;
        if !bookable {
            warn!(
                "Booking refused: therapist {} is not accepting sessions",
                request.therapist_id
            );
            return Err(SchedulingError::TherapistNotFound);
        }

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            therapist_id: request.therapist_id,
            start_time: request.start_time,
            duration_minutes: request.duration_minutes,
            session_type: request.session_type,
            status: SessionStatus::Scheduled,
            notes: request.notes.clone(),
            treatment_plan: None,
            session_rating: None,
            mood_rating: None,
            follow_up_needed: None,
            cancellation_reason: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_session(&session).await {
            Ok(created) => {
                info!("Session {} booked successfully", created.id);
                Ok(created)
            }
            Err(StoreError::DuplicateSlot) => {
                warn!(
                    "Slot {} already booked for therapist {}",
                    request.start_time, request.therapist_id
                );
                Err(self
                    .slot_conflict(request.therapist_id, request.start_time)
                    .await)
            }
            Err(other) => Err(map_store_error(other)),
        }
    }

    fn validate_booking_request(
        &self,
        request: &BookSessionRequest,
    ) -> Result<(), SchedulingError> {
        if request.start_time <= Utc::now() {
            return Err(SchedulingError::ValidationError(
                "Session must start in the future".to_string(),
            ));
        }
        if request.duration_minutes <= 0 {
            return Err(SchedulingError::ValidationError(
                "Session duration must be positive".to_string(),
            ));
        }
        if request.duration_minutes > self.policy.max_duration_minutes {
            return Err(SchedulingError::ValidationError(format!(
                "Session duration cannot exceed {} minutes",
                self.policy.max_duration_minutes
            )));
        }
        Ok(())
    }

    /// The conflict error, enriched with what is still open on the same
    /// day so the caller can offer an alternative. Past hours are never
    /// offered.
    pub(crate) async fn slot_conflict(
        &self,
        therapist_id: Uuid,
        start_time: DateTime<Utc>,
    ) -> SchedulingError {
        let now = Utc::now();
        let open_slots = self
            .availability
            .open_starts(therapist_id, start_time.date_naive())
            .await
            .into_iter()
            .filter(|start| *start > now)
            .collect();

        SchedulingError::SlotConflict {
            start_time,
            open_slots,
        }
    }

    pub async fn get_session(
        &self,
        actor: &Actor,
        session_id: Uuid,
    ) -> Result<Session, SchedulingError> {
        let session = self
            .store
            .fetch_session(session_id)
            .await
            .map_err(map_store_error)?;
        authorize(actor, SessionAction::View, &session)?;
        Ok(session)
    }

    /// Scheduled sessions starting within the next `hours_ahead` hours,
    /// scoped to what the actor may see.
    pub async fn upcoming_sessions(
        &self,
        actor: &Actor,
        hours_ahead: Option<i64>,
    ) -> Result<Vec<Session>, SchedulingError> {
        let hours = hours_ahead
            .unwrap_or(self.policy.default_upcoming_hours)
            .clamp(1, self.policy.max_upcoming_hours);

        let scope = match actor.role {
            ActorRole::Patient => SessionScope::Patient(actor.id),
            ActorRole::Therapist => SessionScope::Therapist(actor.id),
            ActorRole::Admin => SessionScope::All,
        };

        let now = Utc::now();
        self.store
            .scheduled_in_window(scope, now, now + Duration::hours(hours))
            .await
            .map_err(map_store_error)
    }
}
