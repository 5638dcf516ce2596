use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub appointment_service_url: String,
    pub cabinet_service_url: String,
    pub collaborator_timeout_secs: u64,
    pub session_cache_capacity: u64,
    pub session_idle_ttl_minutes: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            appointment_service_url: env::var("APPOINTMENT_SERVICE_URL")
                .unwrap_or_else(|_| {
                    warn!("APPOINTMENT_SERVICE_URL not set, using empty value");
                    String::new()
                }),
            cabinet_service_url: env::var("CABINET_SERVICE_URL")
                .unwrap_or_else(|_| {
                    warn!("CABINET_SERVICE_URL not set, using empty value");
                    String::new()
                }),
            collaborator_timeout_secs: env::var("COLLABORATOR_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            session_cache_capacity: env::var("SESSION_CACHE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            session_idle_ttl_minutes: env::var("SESSION_IDLE_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.appointment_service_url.is_empty() && !self.cabinet_service_url.is_empty()
    }
}
