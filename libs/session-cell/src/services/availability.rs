use chrono::{DateTime, Duration, DurationRound, NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::models::{AvailabilityWindow, SchedulingError};
use crate::policy::SchedulingPolicy;
use crate::services::map_store_error;
use crate::store::SessionStore;

/// Derives open slots from the working-day template and whatever is
/// already booked. Nothing here is persisted.
pub struct AvailabilityService {
    store: Arc<dyn SessionStore>,
    policy: SchedulingPolicy,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn SessionStore>, policy: SchedulingPolicy) -> Self {
        Self { store, policy }
    }

    /// Open slots for one therapist and day: the hourly template minus
    /// every hour a non-cancelled session occupies. Sessions are
    /// matched at hour granularity, so a 10:30 start blocks the 10:00
    /// slot. Slots come back in ascending start order.
    pub async fn available_slots(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, SchedulingError> {
        let day_start = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| SchedulingError::ValidationError("Invalid date".to_string()))?
            .and_utc();
        let day_end = day_start + Duration::days(1);

        let booked = self
            .store
            .active_sessions_in_range(therapist_id, day_start, day_end)
            .await
            .map_err(map_store_error)?;

        let taken: HashSet<DateTime<Utc>> = booked
            .iter()
            .map(|s| {
                s.start_time
                    .duration_trunc(Duration::hours(1))
                    .unwrap_or(s.start_time)
            })
            .collect();

        let windows: Vec<AvailabilityWindow> = self
            .policy
            .daily_template(date)
            .into_iter()
            .filter(|slot| !taken.contains(slot))
            .map(|start_time| AvailabilityWindow {
                therapist_id,
                date,
                start_time,
                duration_minutes: self.policy.slot_duration_minutes,
            })
            .collect();

        debug!(
            "Found {} available slots for therapist {} on {}",
            windows.len(),
            therapist_id,
            date
        );
        Ok(windows)
    }

    /// Start times still open on the given day. Failures degrade to an
    /// empty list; used only to enrich slot conflicts.
    pub async fn open_starts(&self, therapist_id: Uuid, date: NaiveDate) -> Vec<DateTime<Utc>> {
        match self.available_slots(therapist_id, date).await {
            Ok(windows) => windows.into_iter().map(|w| w.start_time).collect(),
            Err(_) => Vec::new(),
        }
    }
}
