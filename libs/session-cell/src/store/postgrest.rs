use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::PostgrestClient;

use crate::models::{ChangeRecord, CompleteSessionRequest, Session};
use crate::policy::SchedulingPolicy;
use crate::store::{SessionScope, SessionStore, StoreError};

/// PostgREST-backed store.
///
/// Slot uniqueness comes from a partial unique index on
/// `(therapist_id, start_time) where status <> 'cancelled'`, so the
/// losing insert surfaces as a 409 with sqlstate 23505. Cancellation
/// and reschedule go through the `cancel_session` and
/// `reschedule_session` rpc functions, which update the row and insert
/// the audit record in one transaction and raise sqlstate PT404 for a
/// missing session and PT409 for a stale status. Every call is bounded
/// by the policy's store timeout.
pub struct PostgrestSessionStore {
    client: PostgrestClient,
    timeout: Duration,
}

impl PostgrestSessionStore {
    pub fn new(config: &AppConfig, policy: &SchedulingPolicy) -> Self {
        Self {
            client: PostgrestClient::new(config),
            timeout: policy.store_timeout(),
        }
    }

    /// Used by tests to target a mock server with a short deadline.
    pub fn with_client(client: PostgrestClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        }
    }

    async fn fetch_rows<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, StoreError> {
        self.client
            .request(Method::GET, path, None)
            .await
            .map_err(request_fault)
    }

    async fn try_fetch(&self, session_id: Uuid) -> Result<Session, StoreError> {
        let path = format!("/sessions?id=eq.{}", session_id);
        let rows: Vec<Session> = self.fetch_rows(&path).await?;
        rows.into_iter().next().ok_or(StoreError::Missing)
    }

    /// A compare-and-set PATCH that matched no row is either a missing
    /// session or a lost status race; one follow-up read says which.
    async fn cas_miss(&self, session_id: Uuid) -> StoreError {
        match self.try_fetch(session_id).await {
            Ok(_) => StoreError::StaleStatus,
            Err(err) => err,
        }
    }

    async fn status_patch(&self, session_id: Uuid, body: Value) -> Result<Session, StoreError> {
        let path = format!("/sessions?id=eq.{}&status=eq.scheduled", session_id);
        let (status, value) = self
            .client
            .request_with_status(Method::PATCH, &path, Some(body), representation_headers())
            .await
            .map_err(request_fault)?;

        match status.as_u16() {
            200 | 201 => match first_row::<Session>(value) {
                Err(StoreError::Missing) => Err(self.cas_miss(session_id).await),
                other => other,
            },
            _ => Err(backend_fault(status, &value)),
        }
    }
}

fn representation_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}

fn request_fault(err: anyhow::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn backend_fault(status: StatusCode, body: &Value) -> StoreError {
    StoreError::Backend(format!("PostgREST error ({}): {}", status, body))
}

fn error_code(body: &Value) -> Option<&str> {
    body.get("code").and_then(Value::as_str)
}

fn first_row<T: DeserializeOwned>(value: Value) -> Result<T, StoreError> {
    let rows = value
        .as_array()
        .ok_or_else(|| StoreError::Backend(format!("Expected rows, got: {}", value)))?;
    let first = rows.first().ok_or(StoreError::Missing)?;
    serde_json::from_value(first.clone()).map_err(|e| StoreError::Backend(e.to_string()))
}

fn encode_ts(ts: &DateTime<Utc>) -> String {
    urlencoding::encode(&ts.to_rfc3339()).to_string()
}

#[async_trait]
impl SessionStore for PostgrestSessionStore {
    async fn insert_session(&self, session: &Session) -> Result<Session, StoreError> {
        self.bounded(async {
            let body =
                serde_json::to_value(session).map_err(|e| StoreError::Backend(e.to_string()))?;
            let (status, value) = self
                .client
                .request_with_status(
                    Method::POST,
                    "/sessions",
                    Some(body),
                    representation_headers(),
                )
                .await
                .map_err(request_fault)?;

            match status.as_u16() {
                200 | 201 => first_row(value),
                409 => Err(StoreError::DuplicateSlot),
                _ => Err(backend_fault(status, &value)),
            }
        })
        .await
    }

    async fn fetch_session(&self, session_id: Uuid) -> Result<Session, StoreError> {
        self.bounded(self.try_fetch(session_id)).await
    }

    async fn active_sessions_in_range(
        &self,
        therapist_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        self.bounded(async {
            let path = format!(
                "/sessions?therapist_id=eq.{}&start_time=gte.{}&start_time=lt.{}&status=neq.cancelled&order=start_time.asc",
                therapist_id,
                encode_ts(&from),
                encode_ts(&to),
            );
            self.fetch_rows(&path).await
        })
        .await
    }

    async fn cancel_session(
        &self,
        session_id: Uuid,
        reason: &str,
        cancelled_at: DateTime<Utc>,
        record: &ChangeRecord,
    ) -> Result<Session, StoreError> {
        self.bounded(async {
            let body = json!({
                "p_session_id": session_id,
                "p_reason": reason,
                "p_cancelled_at": cancelled_at.to_rfc3339(),
                "p_record_id": record.id,
                "p_actor_id": record.actor_id,
                "p_recorded_at": record.created_at.to_rfc3339(),
            });
            let (status, value) = self
                .client
                .request_with_status(
                    Method::POST,
                    "/rpc/cancel_session",
                    Some(body),
                    HeaderMap::new(),
                )
                .await
                .map_err(request_fault)?;

            match status.as_u16() {
                200 => serde_json::from_value(value)
                    .map_err(|e| StoreError::Backend(e.to_string())),
                404 => Err(StoreError::Missing),
                409 => Err(StoreError::StaleStatus),
                _ => Err(backend_fault(status, &value)),
            }
        })
        .await
    }

    async fn reschedule_session(
        &self,
        session_id: Uuid,
        new_start: DateTime<Utc>,
        new_duration_minutes: i32,
        record: &ChangeRecord,
    ) -> Result<Session, StoreError> {
        self.bounded(async {
            let body = json!({
                "p_session_id": session_id,
                "p_new_start": new_start.to_rfc3339(),
                "p_new_duration_minutes": new_duration_minutes,
                "p_record_id": record.id,
                "p_actor_id": record.actor_id,
                "p_previous_start": record.previous_start.map(|ts| ts.to_rfc3339()),
                "p_notes": record.notes,
                "p_recorded_at": record.created_at.to_rfc3339(),
            });
            let (status, value) = self
                .client
                .request_with_status(
                    Method::POST,
                    "/rpc/reschedule_session",
                    Some(body),
                    HeaderMap::new(),
                )
                .await
                .map_err(request_fault)?;

            match status.as_u16() {
                200 => serde_json::from_value(value)
                    .map_err(|e| StoreError::Backend(e.to_string())),
                404 => Err(StoreError::Missing),
                // The new slot losing its unique claim is the one 409
                // that is not a status race.
                409 if error_code(&value) == Some("23505") => Err(StoreError::DuplicateSlot),
                409 => Err(StoreError::StaleStatus),
                _ => Err(backend_fault(status, &value)),
            }
        })
        .await
    }

    async fn complete_session(
        &self,
        session_id: Uuid,
        payload: &CompleteSessionRequest,
    ) -> Result<Session, StoreError> {
        self.bounded(self.status_patch(
            session_id,
            json!({
                "status": "completed",
                "notes": payload.notes,
                "treatment_plan": payload.treatment_plan,
                "session_rating": payload.session_rating,
                "mood_rating": payload.mood_rating,
                "follow_up_needed": payload.follow_up_needed,
                "updated_at": Utc::now().to_rfc3339(),
            }),
        ))
        .await
    }

    async fn mark_no_show(&self, session_id: Uuid) -> Result<Session, StoreError> {
        self.bounded(self.status_patch(
            session_id,
            json!({
                "status": "no_show",
                "updated_at": Utc::now().to_rfc3339(),
            }),
        ))
        .await
    }

    async fn change_records(
        &self,
        session_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ChangeRecord>, StoreError> {
        self.bounded(async {
            let path = format!(
                "/session_change_records?session_id=eq.{}&order=created_at.desc&limit={}",
                session_id, limit,
            );
            self.fetch_rows(&path).await
        })
        .await
    }

    async fn recent_completed_sessions(
        &self,
        patient_id: Uuid,
        therapist_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Session>, StoreError> {
        self.bounded(async {
            let path = format!(
                "/sessions?patient_id=eq.{}&therapist_id=eq.{}&status=eq.completed&order=start_time.desc&limit={}",
                patient_id, therapist_id, limit,
            );
            self.fetch_rows(&path).await
        })
        .await
    }

    async fn scheduled_in_window(
        &self,
        scope: SessionScope,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        self.bounded(async {
            let scope_filter = match scope {
                SessionScope::Patient(id) => format!("&patient_id=eq.{}", id),
                SessionScope::Therapist(id) => format!("&therapist_id=eq.{}", id),
                SessionScope::All => String::new(),
            };
            let path = format!(
                "/sessions?status=eq.scheduled&start_time=gte.{}&start_time=lte.{}&order=start_time.asc{}",
                encode_ts(&from),
                encode_ts(&to),
                scope_filter,
            );
            self.fetch_rows(&path).await
        })
        .await
    }

    async fn next_scheduled_for_pair(
        &self,
        patient_id: Uuid,
        therapist_id: Uuid,
        after: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        self.bounded(async {
            let path = format!(
                "/sessions?patient_id=eq.{}&therapist_id=eq.{}&status=eq.scheduled&start_time=gt.{}&order=start_time.asc&limit=1",
                patient_id, therapist_id,
                encode_ts(&after),
            );
            let rows: Vec<Session> = self.fetch_rows(&path).await?;
            Ok(rows.into_iter().next())
        })
        .await
    }
}
