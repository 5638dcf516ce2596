// libs/assistant-cell/src/services/cabinet.rs
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use shared_config::AppConfig;

use crate::models::{Cabinet, SchedulingError};

pub struct CabinetClient {
    client: Client,
    base_url: String,
}

impl CabinetClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.collaborator_timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url: config.cabinet_service_url.clone(),
        }
    }

    pub async fn get_cabinet(&self, cabinet_id: i64) -> Result<Cabinet, SchedulingError> {
        let url = format!("{}/api/cabinets/{cabinet_id}", self.base_url);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SchedulingError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| SchedulingError::Transport(e.to_string())),
            StatusCode::NOT_FOUND => Err(SchedulingError::NotFound),
            status => {
                warn!("Cabinet service returned {} for id {}", status, cabinet_id);
                Err(SchedulingError::Transport(format!("unexpected status {status}")))
            }
        }
    }
}
