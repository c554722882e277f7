pub mod availability;
pub mod booking;
pub mod history;
pub mod lifecycle;
pub mod notify;

pub use availability::AvailabilityService;
pub use booking::BookingService;
pub use history::HistoryService;
pub use lifecycle::LifecycleService;
pub use notify::{
    DeliveryError, LogDispatcher, NotificationDispatcher, RecordingDispatcher, WebhookDispatcher,
};

use crate::models::SchedulingError;
use crate::store::StoreError;

/// Store faults translated for paths that do not expect a slot or
/// status race. Callers that can lose a race match those variants
/// before falling through to this. Backend faults and timeouts are
/// retryable, so they surface as `Unavailable` rather than an
/// internal error.
pub(crate) fn map_store_error(err: StoreError) -> SchedulingError {
    match err {
        StoreError::Missing => SchedulingError::NotFound,
        StoreError::Timeout => {
            SchedulingError::Unavailable("scheduling store timed out".to_string())
        }
        StoreError::Backend(msg) => SchedulingError::Unavailable(msg),
        StoreError::DuplicateSlot => {
            SchedulingError::DatabaseError("unexpected slot conflict".to_string())
        }
        StoreError::StaleStatus => {
            SchedulingError::DatabaseError("unexpected status change".to_string())
        }
    }
}
