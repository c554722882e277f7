// libs/session-cell/src/services/lifecycle.rs
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    Actor, BookSessionRequest, CancelSessionRequest, CancellationOutcome, ChangeRecord,
    ChangeType, CompleteSessionRequest, CompletionOutcome, NotificationRequest,
    RescheduleOutcome, RescheduleSessionRequest, SchedulingError, Session, SessionStatus,
    SessionType,
};
use crate::policy::{authorize, SchedulingPolicy, SessionAction};
use crate::services::booking::BookingService;
use crate::services::map_store_error;
use crate::services::notify::{self, NotificationDispatcher};
use crate::store::{SessionStore, StoreError, TherapistDirectory};

/// Drives every status change a session can go through. Validation and
/// authorization fail before any write; the store's compare-and-set
/// catches races that slip past the pre-checks.
pub struct LifecycleService {
    store: Arc<dyn SessionStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    booking: BookingService,
    policy: SchedulingPolicy,
}

impl LifecycleService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        directory: Arc<dyn TherapistDirectory>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        policy: SchedulingPolicy,
    ) -> Self {
        Self {
            booking: BookingService::new(store.clone(), directory, policy.clone()),
            store,
            dispatcher,
            policy,
        }
    }

    /// Transition table: `scheduled` fans out to the three terminal
    /// statuses and nothing leaves a terminal status.
    pub fn valid_transitions(&self, current: &SessionStatus) -> Vec<SessionStatus> {
        match current {
            SessionStatus::Scheduled => vec![
                SessionStatus::Completed,
                SessionStatus::Cancelled,
                SessionStatus::NoShow,
            ],
            _ => vec![],
        }
    }

    fn ensure_scheduled(&self, session: &Session) -> Result<(), SchedulingError> {
        if session.status != SessionStatus::Scheduled {
            return Err(SchedulingError::InvalidTransition(session.status));
        }
        Ok(())
    }

    /// The compare-and-set lost; report the status that beat us. If the
    /// row vanished entirely, report that instead.
    async fn lost_status_race(&self, session_id: Uuid) -> SchedulingError {
        match self.store.fetch_session(session_id).await {
            Ok(current) => SchedulingError::InvalidTransition(current.status),
            Err(_) => SchedulingError::NotFound,
        }
    }

    /// Delivery failures are logged and swallowed. The state change is
    /// already committed and a lost notice must not undo it.
    async fn dispatch(&self, request: NotificationRequest) -> Option<NotificationRequest> {
        if let Err(err) = self.dispatcher.send(&request).await {
            warn!(
                "Notification delivery failed for session {}: {}",
                request.session_id, err
            );
        }
        Some(request)
    }

    pub async fn cancel_session(
        &self,
        actor: &Actor,
        session_id: Uuid,
        request: CancelSessionRequest,
    ) -> Result<CancellationOutcome, SchedulingError> {
        info!("Cancelling session {} for actor {}", session_id, actor.id);

        if request.reason.trim().is_empty() {
            return Err(SchedulingError::ValidationError(
                "Cancellation reason must not be empty".to_string(),
            ));
        }

        let session = self
            .store
            .fetch_session(session_id)
            .await
            .map_err(map_store_error)?;
        authorize(actor, SessionAction::Cancel, &session)?;
        self.ensure_scheduled(&session)?;

        let now = Utc::now();
        let late = self.policy.is_late_cancellation(session.start_time, now);
        if late {
            warn!(
                "Late cancellation of session {} only {}h before start",
                session_id,
                (session.start_time - now).num_hours()
            );
        }

        let record = ChangeRecord {
            id: Uuid::new_v4(),
            session_id,
            change_type: ChangeType::Cancellation,
            actor_id: actor.id,
            notes: Some(request.reason.clone()),
            previous_start: None,
            new_start: None,
            created_at: now,
        };

        let updated = match self
            .store
            .cancel_session(session_id, &request.reason, now, &record)
            .await
        {
            Ok(session) => session,
            Err(StoreError::StaleStatus) => return Err(self.lost_status_race(session_id).await),
            Err(other) => return Err(map_store_error(other)),
        };

        let notification = if request.notify_patient {
            self.dispatch(notify::cancellation_notice(
                &updated,
                &request.reason,
                late,
                request.reschedule_intent,
            ))
            .await
        } else {
            None
        };

        info!("Session {} cancelled", session_id);
        Ok(CancellationOutcome {
            session: updated,
            late_cancellation: late,
            notification,
        })
    }

    pub async fn reschedule_session(
        &self,
        actor: &Actor,
        session_id: Uuid,
        request: RescheduleSessionRequest,
    ) -> Result<RescheduleOutcome, SchedulingError> {
        info!(
            "Rescheduling session {} to {}",
            session_id, request.new_start_time
        );

        if request.new_start_time <= Utc::now() {
            return Err(SchedulingError::ValidationError(
                "New start time must be in the future".to_string(),
            ));
        }
        if let Some(duration) = request.new_duration_minutes {
            if duration <= 0 {
                return Err(SchedulingError::ValidationError(
                    "Session duration must be positive".to_string(),
                ));
            }
            if duration > self.policy.max_duration_minutes {
                return Err(SchedulingError::ValidationError(format!(
                    "Session duration cannot exceed {} minutes",
                    self.policy.max_duration_minutes
                )));
            }
        }

        let session = self
            .store
            .fetch_session(session_id)
            .await
            .map_err(map_store_error)?;
        authorize(actor, SessionAction::Reschedule, &session)?;
        self.ensure_scheduled(&session)?;

        let new_duration = request
            .new_duration_minutes
            .unwrap_or(session.duration_minutes);
        let record = ChangeRecord {
            id: Uuid::new_v4(),
            session_id,
            change_type: ChangeType::Reschedule,
            actor_id: actor.id,
            notes: request.notes.clone(),
            previous_start: Some(session.start_time),
            new_start: Some(request.new_start_time),
            created_at: Utc::now(),
        };

        let updated = match self
            .store
            .reschedule_session(session_id, request.new_start_time, new_duration, &record)
            .await
        {
            Ok(session) => session,
            Err(StoreError::DuplicateSlot) => {
                warn!(
                    "Reschedule of session {} lost the slot {}",
                    session_id, request.new_start_time
                );
                return Err(self
                    .booking
                    .slot_conflict(session.therapist_id, request.new_start_time)
                    .await);
            }
            Err(StoreError::StaleStatus) => return Err(self.lost_status_race(session_id).await),
            Err(other) => return Err(map_store_error(other)),
        };

        let notification = if request.notify_patient {
            self.dispatch(notify::reschedule_notice(
                &updated,
                session.start_time,
                request.new_start_time,
            ))
            .await
        } else {
            None
        };

        info!("Session {} rescheduled", session_id);
        Ok(RescheduleOutcome {
            session: updated,
            change_record: record,
            notification,
        })
    }

    pub async fn complete_session(
        &self,
        actor: &Actor,
        session_id: Uuid,
        request: CompleteSessionRequest,
    ) -> Result<CompletionOutcome, SchedulingError> {
        info!("Completing session {}", session_id);

        if request.notes.trim().is_empty() {
            return Err(SchedulingError::ValidationError(
                "Session notes must not be empty".to_string(),
            ));
        }
        for rating in [request.session_rating, request.mood_rating]
            .into_iter()
            .flatten()
        {
            if !(1..=10).contains(&rating) {
                return Err(SchedulingError::ValidationError(
                    "Ratings must be between 1 and 10".to_string(),
                ));
            }
        }

        let session = self
            .store
            .fetch_session(session_id)
            .await
            .map_err(map_store_error)?;
        authorize(actor, SessionAction::Complete, &session)?;
        self.ensure_scheduled(&session)?;

        if !session.has_started(Utc::now()) {
            return Err(SchedulingError::ValidationError(
                "Session cannot be completed before it starts".to_string(),
            ));
        }

        let updated = match self.store.complete_session(session_id, &request).await {
            Ok(session) => session,
            Err(StoreError::StaleStatus) => return Err(self.lost_status_race(session_id).await),
            Err(other) => return Err(map_store_error(other)),
        };

        let (follow_up, follow_up_skipped) = if request.follow_up_needed {
            self.create_follow_up(actor, &updated).await
        } else {
            (None, None)
        };

        info!("Session {} completed", session_id);
        Ok(CompletionOutcome {
            session: updated,
            follow_up,
            follow_up_skipped,
        })
    }

    /// Books the follow-up one policy interval after the completed
    /// session, unless the pair already has something on the calendar.
    /// Failures here are reported, never raised: the completion is
    /// already committed.
    async fn create_follow_up(
        &self,
        actor: &Actor,
        completed: &Session,
    ) -> (Option<Session>, Option<String>) {
        match self
            .store
            .next_scheduled_for_pair(completed.patient_id, completed.therapist_id, Utc::now())
            .await
        {
            Ok(Some(existing)) => {
                return (
                    None,
                    Some(format!(
                        "A session is already scheduled for {}",
                        existing.start_time
                    )),
                );
            }
            Ok(None) => {}
            Err(err) => {
                warn!("Could not check for an existing follow-up: {}", err);
                return (
                    None,
                    Some(format!("Could not verify existing sessions: {}", err)),
                );
            }
        }

        let request = BookSessionRequest {
            patient_id: completed.patient_id,
            therapist_id: completed.therapist_id,
            start_time: self.policy.follow_up_start(completed.start_time),
            duration_minutes: completed.duration_minutes,
            session_type: SessionType::FollowUp,
            notes: None,
        };

        match self.booking.book_session(actor, request).await {
            Ok(follow_up) => {
                info!(
                    "Follow-up session {} created for patient {}",
                    follow_up.id, follow_up.patient_id
                );
                self.dispatch(notify::follow_up_notice(&follow_up)).await;
                (Some(follow_up), None)
            }
            Err(err) => {
                warn!(
                    "Follow-up for session {} not created: {}",
                    completed.id, err
                );
                (None, Some(err.to_string()))
            }
        }
    }

    pub async fn mark_no_show(
        &self,
        actor: &Actor,
        session_id: Uuid,
    ) -> Result<Session, SchedulingError> {
        info!("Marking session {} as no-show", session_id);

        let session = self
            .store
            .fetch_session(session_id)
            .await
            .map_err(map_store_error)?;
        authorize(actor, SessionAction::MarkNoShow, &session)?;
        self.ensure_scheduled(&session)?;

        if !session.has_started(Utc::now()) {
            return Err(SchedulingError::ValidationError(
                "Session cannot be marked as a no-show before it starts".to_string(),
            ));
        }

        let updated = match self.store.mark_no_show(session_id).await {
            Ok(session) => session,
            Err(StoreError::StaleStatus) => return Err(self.lost_status_race(session_id).await),
            Err(other) => return Err(map_store_error(other)),
        };

        info!("Session {} marked as no-show", session_id);
        Ok(updated)
    }
}
