use assert_matches::assert_matches;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;
use tokio_test::assert_ok;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use session_cell::models::{
    ChangeRecord, ChangeType, CompleteSessionRequest, Session, SessionStatus, SessionType,
};
use session_cell::store::{
    PostgrestSessionStore, PostgrestTherapistDirectory, SessionStore, StoreError,
    TherapistDirectory,
};
use shared_database::PostgrestClient;
use shared_utils::test_utils::MockPostgrestResponses;

fn store_for(server: &MockServer) -> PostgrestSessionStore {
    let client = PostgrestClient::with_base_url(&server.uri(), "test-api-key");
    PostgrestSessionStore::with_client(client, Duration::from_millis(500))
}

fn directory_for(server: &MockServer) -> PostgrestTherapistDirectory {
    let client = PostgrestClient::with_base_url(&server.uri(), "test-api-key");
    PostgrestTherapistDirectory::with_client(client, Duration::from_millis(500))
}

fn sample_session() -> Session {
    let start_time: DateTime<Utc> = "2025-03-10T10:00:00Z".parse().unwrap();
    let created: DateTime<Utc> = "2025-01-01T00:00:00Z".parse().unwrap();
    Session {
        id: Uuid::new_v4(),
        patient_id: Uuid::new_v4(),
        therapist_id: Uuid::new_v4(),
        start_time,
        duration_minutes: 60,
        session_type: SessionType::Individual,
        status: SessionStatus::Scheduled,
        notes: None,
        treatment_plan: None,
        session_rating: None,
        mood_rating: None,
        follow_up_needed: None,
        cancellation_reason: None,
        cancelled_at: None,
        created_at: created,
        updated_at: created,
    }
}

fn session_row(session: &Session, status: &str) -> serde_json::Value {
    MockPostgrestResponses::session_row(
        session.id,
        session.patient_id,
        session.therapist_id,
        "2025-03-10T10:00:00Z",
        status,
    )
}

fn cancellation_record(session_id: Uuid) -> ChangeRecord {
    ChangeRecord {
        id: Uuid::new_v4(),
        session_id,
        change_type: ChangeType::Cancellation,
        actor_id: Uuid::new_v4(),
        notes: Some("Feeling unwell".to_string()),
        previous_start: None,
        new_start: None,
        created_at: Utc::now(),
    }
}

fn reschedule_record(session_id: Uuid) -> ChangeRecord {
    ChangeRecord {
        id: Uuid::new_v4(),
        session_id,
        change_type: ChangeType::Reschedule,
        actor_id: Uuid::new_v4(),
        notes: None,
        previous_start: Some("2025-03-10T10:00:00Z".parse().unwrap()),
        new_start: Some("2025-03-17T10:00:00Z".parse().unwrap()),
        created_at: Utc::now(),
    }
}

fn completion_payload() -> CompleteSessionRequest {
    CompleteSessionRequest {
        notes: "Session went well".to_string(),
        treatment_plan: None,
        session_rating: Some(8),
        mood_rating: Some(7),
        follow_up_needed: false,
    }
}

#[tokio::test]
async fn test_insert_session_returns_created_row() {
    let mock_server = MockServer::start().await;
    let session = sample_session();

    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!([session_row(&session, "scheduled")])),
        )
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server);
    let created = assert_ok!(store.insert_session(&session).await);

    assert_eq!(created.id, session.id);
    assert_eq!(created.status, SessionStatus::Scheduled);
    assert_eq!(created.start_time, session.start_time);
}

#[tokio::test]
async fn test_insert_conflict_maps_to_duplicate_slot() {
    let mock_server = MockServer::start().await;
    let session = sample_session();

    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(409).set_body_json(
            MockPostgrestResponses::error_response(
                "duplicate key value violates unique constraint \"uniq_sessions_slot\"",
                "23505",
            ),
        ))
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server);
    let result = store.insert_session(&session).await;

    assert_matches!(result, Err(StoreError::DuplicateSlot));
}

#[tokio::test]
async fn test_fetch_session_found_and_missing() {
    let mock_server = MockServer::start().await;
    let session = sample_session();

    Mock::given(method("GET"))
        .and(path("/sessions"))
        .and(query_param("id", format!("eq.{}", session.id)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([session_row(&session, "scheduled")])),
        )
        .mount(&mock_server)
        .await;

    let unknown = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/sessions"))
        .and(query_param("id", format!("eq.{}", unknown)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server);

    let found = store.fetch_session(session.id).await.unwrap();
    assert_eq!(found.id, session.id);

    let missing = store.fetch_session(unknown).await;
    assert_matches!(missing, Err(StoreError::Missing));
}

#[tokio::test]
async fn test_cancel_rpc_returns_updated_row() {
    let mock_server = MockServer::start().await;
    let session = sample_session();

    Mock::given(method("POST"))
        .and(path("/rpc/cancel_session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_row(&session, "cancelled")))
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server);
    let cancelled = store
        .cancel_session(
            session.id,
            "Feeling unwell",
            Utc::now(),
            &cancellation_record(session.id),
        )
        .await
        .unwrap();

    assert_eq!(cancelled.status, SessionStatus::Cancelled);
    assert_eq!(cancelled.id, session.id);
}

#[tokio::test]
async fn test_cancel_rpc_missing_session() {
    let mock_server = MockServer::start().await;
    let session_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rpc/cancel_session"))
        .respond_with(ResponseTemplate::new(404).set_body_json(
            MockPostgrestResponses::error_response("Session not found", "PT404"),
        ))
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server);
    let result = store
        .cancel_session(
            session_id,
            "Feeling unwell",
            Utc::now(),
            &cancellation_record(session_id),
        )
        .await;

    assert_matches!(result, Err(StoreError::Missing));
}

#[tokio::test]
async fn test_cancel_rpc_stale_status() {
    let mock_server = MockServer::start().await;
    let session_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rpc/cancel_session"))
        .respond_with(ResponseTemplate::new(409).set_body_json(
            MockPostgrestResponses::error_response("Session is not scheduled", "PT409"),
        ))
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server);
    let result = store
        .cancel_session(
            session_id,
            "Feeling unwell",
            Utc::now(),
            &cancellation_record(session_id),
        )
        .await;

    assert_matches!(result, Err(StoreError::StaleStatus));
}

#[tokio::test]
async fn test_reschedule_unique_violation_is_duplicate_slot() {
    let mock_server = MockServer::start().await;
    let session_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rpc/reschedule_session"))
        .respond_with(ResponseTemplate::new(409).set_body_json(
            MockPostgrestResponses::error_response(
                "duplicate key value violates unique constraint \"uniq_sessions_slot\"",
                "23505",
            ),
        ))
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server);
    let result = store
        .reschedule_session(
            session_id,
            "2025-03-17T10:00:00Z".parse().unwrap(),
            60,
            &reschedule_record(session_id),
        )
        .await;

    assert_matches!(result, Err(StoreError::DuplicateSlot));
}

#[tokio::test]
async fn test_reschedule_other_conflict_is_stale_status() {
    let mock_server = MockServer::start().await;
    let session_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rpc/reschedule_session"))
        .respond_with(ResponseTemplate::new(409).set_body_json(
            MockPostgrestResponses::error_response("Session is not scheduled", "P0001"),
        ))
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server);
    let result = store
        .reschedule_session(
            session_id,
            "2025-03-17T10:00:00Z".parse().unwrap(),
            60,
            &reschedule_record(session_id),
        )
        .await;

    assert_matches!(result, Err(StoreError::StaleStatus));
}

#[tokio::test]
async fn test_complete_patch_returns_updated_row() {
    let mock_server = MockServer::start().await;
    let session = sample_session();

    Mock::given(method("PATCH"))
        .and(path("/sessions"))
        .and(query_param("id", format!("eq.{}", session.id)))
        .and(query_param("status", "eq.scheduled"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([session_row(&session, "completed")])),
        )
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server);
    let completed = assert_ok!(store.complete_session(session.id, &completion_payload()).await);

    assert_eq!(completed.status, SessionStatus::Completed);
}

#[tokio::test]
async fn test_complete_patch_miss_with_live_row_is_stale() {
    let mock_server = MockServer::start().await;
    let session = sample_session();

    // The guarded update matches nothing, but the row still exists.
    Mock::given(method("PATCH"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sessions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([session_row(&session, "cancelled")])),
        )
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server);
    let result = store.complete_session(session.id, &completion_payload()).await;

    assert_matches!(result, Err(StoreError::StaleStatus));
}

#[tokio::test]
async fn test_complete_patch_miss_without_row_is_missing() {
    let mock_server = MockServer::start().await;
    let session_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server);
    let result = store.complete_session(session_id, &completion_payload()).await;

    assert_matches!(result, Err(StoreError::Missing));
}

#[tokio::test]
async fn test_mark_no_show_patch() {
    let mock_server = MockServer::start().await;
    let session = sample_session();

    Mock::given(method("PATCH"))
        .and(path("/sessions"))
        .and(query_param("status", "eq.scheduled"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([session_row(&session, "no_show")])),
        )
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server);
    let updated = store.mark_no_show(session.id).await.unwrap();

    assert_eq!(updated.status, SessionStatus::NoShow);
}

#[tokio::test]
async fn test_slow_backend_surfaces_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sessions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&mock_server)
        .await;

    let client = PostgrestClient::with_base_url(&mock_server.uri(), "test-api-key");
    let store = PostgrestSessionStore::with_client(client, Duration::from_millis(100));
    let result = store.fetch_session(Uuid::new_v4()).await;

    assert_matches!(result, Err(StoreError::Timeout));
}

#[tokio::test]
async fn test_change_records_deserialize() {
    let mock_server = MockServer::start().await;
    let session_id = Uuid::new_v4();
    let actor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/session_change_records"))
        .and(query_param("session_id", format!("eq.{}", session_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockPostgrestResponses::change_record_row(
                session_id,
                "cancellation",
                actor_id,
                "2025-03-02T09:00:00Z",
            ),
            MockPostgrestResponses::change_record_row(
                session_id,
                "reschedule",
                actor_id,
                "2025-03-01T09:00:00Z",
            ),
        ])))
        .mount(&mock_server)
        .await;

    let store = store_for(&mock_server);
    let records = store.change_records(session_id, 50).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].change_type, ChangeType::Cancellation);
    assert_eq!(records[1].change_type, ChangeType::Reschedule);
    assert!(records.iter().all(|r| r.session_id == session_id));
}

#[tokio::test]
async fn test_directory_reads_accepting_flag() {
    let mock_server = MockServer::start().await;
    let accepting = Uuid::new_v4();
    let paused = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/therapist_profiles"))
        .and(query_param("id", format!("eq.{}", accepting)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([MockPostgrestResponses::therapist_row(accepting, true)])),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/therapist_profiles"))
        .and(query_param("id", format!("eq.{}", paused)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([MockPostgrestResponses::therapist_row(paused, false)])),
        )
        .mount(&mock_server)
        .await;

    let directory = directory_for(&mock_server);
    assert!(directory.is_bookable(accepting).await.unwrap());
    assert!(!directory.is_bookable(paused).await.unwrap());
}

#[tokio::test]
async fn test_directory_treats_unknown_therapist_as_not_bookable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/therapist_profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let directory = directory_for(&mock_server);
    let bookable = directory.is_bookable(Uuid::new_v4()).await.unwrap();

    assert!(!bookable);
}
