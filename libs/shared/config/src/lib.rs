use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub postgrest_url: String,
    pub postgrest_api_key: String,
    pub app_jwt_secret: String,
    pub notify_webhook_url: String,
    pub bind_addr: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            postgrest_url: env::var("POSTGREST_URL")
                .unwrap_or_else(|_| {
                    warn!("POSTGREST_URL not set, using empty value");
                    String::new()
                }),
            postgrest_api_key: env::var("POSTGREST_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("POSTGREST_API_KEY not set, using empty value");
                    String::new()
                }),
            app_jwt_secret: env::var("APP_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("APP_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL")
                .unwrap_or_else(|_| {
                    warn!("NOTIFY_WEBHOOK_URL not set, notifications will be logged only");
                    String::new()
                }),
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| {
                    warn!("BIND_ADDR not set, using default");
                    "0.0.0.0:3000".to_string()
                }),
        };

        if !config.has_database() {
            warn!("No PostgREST backend configured - falling back to the in-memory store");
        }

        config
    }

    /// True when a PostgREST backend is configured; otherwise the api
    /// falls back to the in-memory store (development and tests).
    pub fn has_database(&self) -> bool {
        !self.postgrest_url.is_empty() && !self.postgrest_api_key.is_empty()
    }

    pub fn has_webhook(&self) -> bool {
        !self.notify_webhook_url.is_empty()
    }
}
