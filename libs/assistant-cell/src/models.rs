// libs/assistant-cell/src/models.rs
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ==============================================================================
// CHAT WIRE TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub patient_id: Option<i64>,
    pub cabinet_id: i64,
    /// Client-supplied token carrying multi-turn continuity for anonymous callers.
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ChatResponse {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            data: None,
        }
    }

    pub fn with_data(response: impl Into<String>, data: Value) -> Self {
        Self {
            response: response.into(),
            data: Some(data),
        }
    }
}

// ==============================================================================
// SCHEDULING COLLABORATOR TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id_rendez_vous: i64,
    pub date_rdv: NaiveDate,
    pub heure_rdv: NaiveTime,
    pub motif: Motive,
    pub statut: AppointmentStatus,
    #[serde(default)]
    pub notes: Option<String>,
    pub patient_id: i64,
    #[serde(default)]
    pub utilisateur_id: Option<i64>,
    pub cabinet_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookAppointmentRequest {
    pub date_rdv: NaiveDate,
    pub heure_rdv: NaiveTime,
    pub motif: Motive,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub patient_id: i64,
    pub utilisateur_id: i64,
    pub cabinet_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Motive {
    Consultation,
    Controle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Confirme,
    Annule,
    EnAttente,
    Termine,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Confirme => write!(f, "CONFIRME"),
            AppointmentStatus::Annule => write!(f, "ANNULE"),
            AppointmentStatus::EnAttente => write!(f, "EN_ATTENTE"),
            AppointmentStatus::Termine => write!(f, "TERMINE"),
        }
    }
}

// ==============================================================================
// CABINET COLLABORATOR TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cabinet {
    pub id: i64,
    #[serde(default)]
    pub nom: Option<String>,
    #[serde(default)]
    pub specialite: Option<String>,
    #[serde(default)]
    pub adresse: Option<String>,
    #[serde(default)]
    pub tel: Option<String>,
    #[serde(default)]
    pub date_creation: Option<NaiveDate>,
}

// ==============================================================================
// TAGGED COLLABORATOR OUTCOMES
// ==============================================================================

/// Every collaborator call resolves to a value or one of these tags; the
/// dialogue engine matches on the variant instead of inspecting exceptions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulingError {
    #[error("Validation rejected by scheduling service: {0}")]
    Validation(String),

    #[error("Slot already taken")]
    Conflict,

    #[error("Resource not found")]
    NotFound,

    #[error("Scheduling service unreachable: {0}")]
    Transport(String),
}

impl From<SchedulingError> for shared_models::AppError {
    fn from(err: SchedulingError) -> Self {
        match err {
            SchedulingError::Validation(reason) => shared_models::AppError::BadRequest(reason),
            SchedulingError::Conflict => {
                shared_models::AppError::Conflict("Slot already taken".to_string())
            }
            SchedulingError::NotFound => {
                shared_models::AppError::NotFound("Resource not found".to_string())
            }
            SchedulingError::Transport(reason) => shared_models::AppError::ExternalService(reason),
        }
    }
}
