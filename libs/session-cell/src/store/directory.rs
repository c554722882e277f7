use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::PostgrestClient;

use crate::policy::SchedulingPolicy;
use crate::store::StoreError;

/// Lookup for whether a therapist can take new sessions. Bookings are
/// refused for ids the directory does not vouch for.
#[async_trait]
pub trait TherapistDirectory: Send + Sync {
    async fn is_bookable(&self, therapist_id: Uuid) -> Result<bool, StoreError>;
}

#[derive(Debug, Deserialize)]
struct TherapistRow {
    is_accepting_patients: bool,
}

/// Reads the `therapist_profiles` table. A missing row and a row with
/// `is_accepting_patients = false` are both "not bookable".
pub struct PostgrestTherapistDirectory {
    client: PostgrestClient,
    timeout: Duration,
}

impl PostgrestTherapistDirectory {
    pub fn new(config: &AppConfig, policy: &SchedulingPolicy) -> Self {
        Self {
            client: PostgrestClient::new(config),
            timeout: policy.store_timeout(),
        }
    }

    pub fn with_client(client: PostgrestClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl TherapistDirectory for PostgrestTherapistDirectory {
    async fn is_bookable(&self, therapist_id: Uuid) -> Result<bool, StoreError> {
        let path = format!(
            "/therapist_profiles?id=eq.{}&select=is_accepting_patients",
            therapist_id
        );
        let request = self.client.request::<Vec<TherapistRow>>(Method::GET, &path, None);

        let rows = match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result.map_err(|e| StoreError::Backend(e.to_string()))?,
            Err(_) => return Err(StoreError::Timeout),
        };

        Ok(rows
            .first()
            .map(|row| row.is_accepting_patients)
            .unwrap_or(false))
    }
}

/// Fixed roster for tests.
pub struct StaticTherapistDirectory {
    accepting: HashSet<Uuid>,
}

impl StaticTherapistDirectory {
    pub fn new(accepting: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            accepting: accepting.into_iter().collect(),
        }
    }
}

#[async_trait]
impl TherapistDirectory for StaticTherapistDirectory {
    async fn is_bookable(&self, therapist_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.accepting.contains(&therapist_id))
    }
}

/// Accepts every id. Development wiring for the in-memory store, where
/// no profile table exists to consult.
pub struct OpenTherapistDirectory;

#[async_trait]
impl TherapistDirectory for OpenTherapistDirectory {
    async fn is_bookable(&self, _therapist_id: Uuid) -> Result<bool, StoreError> {
        Ok(true)
    }
}
