use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tracing::info;

use crate::models::{NotificationRequest, NotificationType, Session};

#[derive(Debug, Clone, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Outbound notification port. Called only after the state change has
/// committed; a failed send never undoes scheduling work.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, request: &NotificationRequest) -> Result<(), DeliveryError>;
}

/// Posts each notification to a configured webhook as JSON.
pub struct WebhookDispatcher {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookDispatcher {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn send(&self, request: &NotificationRequest) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| DeliveryError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DeliveryError(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Logs instead of delivering. Default when no webhook is configured.
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send(&self, request: &NotificationRequest) -> Result<(), DeliveryError> {
        info!(
            "Notification for {}: {}",
            request.recipient_id, request.content
        );
        Ok(())
    }
}

/// Captures every notification for assertions. The failing variant
/// still records before erroring, so tests can see the attempt.
pub struct RecordingDispatcher {
    sent: Mutex<Vec<NotificationRequest>>,
    fail: bool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<NotificationRequest> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl Default for RecordingDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(&self, request: &NotificationRequest) -> Result<(), DeliveryError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(request.clone());
        }
        if self.fail {
            return Err(DeliveryError(
                "recording dispatcher set to fail".to_string(),
            ));
        }
        Ok(())
    }
}

// ==============================================================================
// NOTIFICATION CONTENT
// ==============================================================================

pub fn cancellation_notice(
    session: &Session,
    reason: &str,
    late: bool,
    reschedule_intent: bool,
) -> NotificationRequest {
    let when = session.start_time.format("%Y-%m-%d %H:%M");
    let mut content = if late {
        format!(
            "Late cancellation: your session on {} was cancelled. Reason: {}.",
            when, reason
        )
    } else {
        format!("Your session on {} was cancelled. Reason: {}.", when, reason)
    };
    if reschedule_intent {
        content.push_str(" A replacement session will be arranged for you.");
    } else {
        content.push_str(" Please book a new time that works for you.");
    }

    NotificationRequest {
        recipient_id: session.patient_id,
        notification_type: NotificationType::Cancellation,
        content,
        session_id: session.id,
    }
}

pub fn reschedule_notice(
    session: &Session,
    previous_start: DateTime<Utc>,
    new_start: DateTime<Utc>,
) -> NotificationRequest {
    NotificationRequest {
        recipient_id: session.patient_id,
        notification_type: NotificationType::Reschedule,
        content: format!(
            "Your session was moved from {} to {}.",
            previous_start.format("%Y-%m-%d %H:%M"),
            new_start.format("%Y-%m-%d %H:%M")
        ),
        session_id: session.id,
    }
}

pub fn follow_up_notice(follow_up: &Session) -> NotificationRequest {
    NotificationRequest {
        recipient_id: follow_up.patient_id,
        notification_type: NotificationType::FollowUp,
        content: format!(
            "A follow-up session was scheduled for {}.",
            follow_up.start_time.format("%Y-%m-%d %H:%M")
        ),
        session_id: follow_up.id,
    }
}
