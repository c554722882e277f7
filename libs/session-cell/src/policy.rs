use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::{Actor, ActorRole, SchedulingError, Session};

/// Clinic-wide scheduling rules. One instance is shared by every service
/// so the numbers stay consistent across booking, cancellation and
/// availability.
#[derive(Debug, Clone)]
pub struct SchedulingPolicy {
    /// First bookable hour of the day (UTC).
    pub day_start_hour: u32,
    /// End of the bookable day (UTC, exclusive).
    pub day_end_hour: u32,
    pub slot_duration_minutes: i32,
    /// Cancellations closer to the start than this are flagged late.
    pub late_cancellation_hours: i64,
    /// Offset for auto-created follow-up sessions.
    pub follow_up_days: i64,
    pub max_duration_minutes: i32,
    pub default_upcoming_hours: i64,
    pub max_upcoming_hours: i64,
    /// Upper bound on any single store call before the operation is
    /// reported as unavailable.
    pub store_timeout_ms: u64,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            day_start_hour: 9,
            day_end_hour: 17,
            slot_duration_minutes: 60,
            late_cancellation_hours: 24,
            follow_up_days: 7,
            max_duration_minutes: 240,
            default_upcoming_hours: 24,
            max_upcoming_hours: 168,
            store_timeout_ms: 5000,
        }
    }
}

impl SchedulingPolicy {
    /// Hourly slot starts for one working day, before subtracting booked
    /// sessions.
    pub fn daily_template(&self, date: NaiveDate) -> Vec<DateTime<Utc>> {
        (self.day_start_hour..self.day_end_hour)
            .filter_map(|hour| date.and_hms_opt(hour, 0, 0))
            .map(|naive| naive.and_utc())
            .collect()
    }

    pub fn is_late_cancellation(&self, start_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        start_time - now < Duration::hours(self.late_cancellation_hours)
    }

    pub fn follow_up_start(&self, start_time: DateTime<Utc>) -> DateTime<Utc> {
        start_time + Duration::days(self.follow_up_days)
    }

    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store_timeout_ms)
    }
}

// ==============================================================================
// AUTHORIZATION
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    View,
    Cancel,
    Reschedule,
    Complete,
    MarkNoShow,
    ViewHistory,
}

/// Single authorization check for operations on an existing session.
///
/// Admins may do anything. Therapists may act on their own sessions.
/// Patients may view and cancel their own sessions but never drive the
/// clinical transitions. Ownership mismatches come back as `NotFound`
/// so callers cannot probe for other people's sessions; role mismatches
/// come back as `Unauthorized`.
pub fn authorize(
    actor: &Actor,
    action: SessionAction,
    session: &Session,
) -> Result<(), SchedulingError> {
    match actor.role {
        ActorRole::Admin => Ok(()),
        ActorRole::Therapist => {
            if session.therapist_id == actor.id {
                Ok(())
            } else {
                Err(SchedulingError::NotFound)
            }
        }
        ActorRole::Patient => match action {
            SessionAction::View | SessionAction::ViewHistory | SessionAction::Cancel => {
                if session.patient_id == actor.id {
                    Ok(())
                } else {
                    Err(SchedulingError::NotFound)
                }
            }
            SessionAction::Reschedule | SessionAction::Complete | SessionAction::MarkNoShow => {
                Err(SchedulingError::Unauthorized)
            }
        },
    }
}

/// Booking has no session to check against yet: patients book for
/// themselves, therapists book into their own calendar, admins book for
/// anyone.
pub fn authorize_booking(
    actor: &Actor,
    patient_id: Uuid,
    therapist_id: Uuid,
) -> Result<(), SchedulingError> {
    match actor.role {
        ActorRole::Admin => Ok(()),
        ActorRole::Therapist => {
            if therapist_id == actor.id {
                Ok(())
            } else {
                Err(SchedulingError::Unauthorized)
            }
        }
        ActorRole::Patient => {
            if patient_id == actor.id {
                Ok(())
            } else {
                Err(SchedulingError::Unauthorized)
            }
        }
    }
}
