pub mod handlers;
pub mod models;
pub mod policy;
pub mod router;
pub mod services;
pub mod store;

pub use models::*;
pub use router::session_routes;

use std::sync::Arc;

use shared_config::AppConfig;

use policy::SchedulingPolicy;
use services::{LogDispatcher, NotificationDispatcher, WebhookDispatcher};
use store::{
    MemorySessionStore, OpenTherapistDirectory, PostgrestSessionStore,
    PostgrestTherapistDirectory, SessionStore, TherapistDirectory,
};

/// Shared wiring for the scheduling cell: configuration, the session
/// store, the therapist directory and the notification dispatcher.
pub struct SchedulingState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn SessionStore>,
    pub directory: Arc<dyn TherapistDirectory>,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
    pub policy: SchedulingPolicy,
}

impl SchedulingState {
    /// PostgREST adapters when a backend is configured, in-memory
    /// wiring otherwise.
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        let policy = SchedulingPolicy::default();

        let (store, directory): (Arc<dyn SessionStore>, Arc<dyn TherapistDirectory>) =
            if config.has_database() {
                (
                    Arc::new(PostgrestSessionStore::new(&config, &policy)),
                    Arc::new(PostgrestTherapistDirectory::new(&config, &policy)),
                )
            } else {
                (
                    Arc::new(MemorySessionStore::new()),
                    Arc::new(OpenTherapistDirectory),
                )
            };

        let dispatcher: Arc<dyn NotificationDispatcher> = if config.has_webhook() {
            Arc::new(WebhookDispatcher::new(&config.notify_webhook_url))
        } else {
            Arc::new(LogDispatcher)
        };

        Self {
            config,
            store,
            directory,
            dispatcher,
            policy,
        }
    }

    /// In-memory wiring regardless of configuration, for tests and
    /// local development.
    pub fn in_memory(config: Arc<AppConfig>) -> Self {
        Self {
            config,
            store: Arc::new(MemorySessionStore::new()),
            directory: Arc::new(OpenTherapistDirectory),
            dispatcher: Arc::new(LogDispatcher),
            policy: SchedulingPolicy::default(),
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn TherapistDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }
}
