use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

use shared_models::AppError;

use crate::models::{BookAppointmentRequest, ChatRequest, ChatResponse};
use crate::services::dialogue::DialogueService;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
    pub cabinet_id: i64,
}

/// One conversational turn. Always 200: conversational failures are replies,
/// not HTTP errors.
#[axum::debug_handler]
pub async fn process_message(
    State(service): State<Arc<DialogueService>>,
    Json(request): Json<ChatRequest>,
) -> Json<ChatResponse> {
    Json(service.process_message(request).await)
}

/// Free slots for a day, bypassing the conversation.
#[axum::debug_handler]
pub async fn get_disponibilites(
    State(service): State<Arc<DialogueService>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = service
        .scheduling()
        .free_slots(query.date, query.cabinet_id)
        .await?;
    let slots: Vec<String> = slots
        .iter()
        .map(|slot| slot.format("%H:%M").to_string())
        .collect();
    Ok(Json(json!(slots)))
}

/// Direct booking passthrough to the scheduling collaborator.
#[axum::debug_handler]
pub async fn book_rendez_vous(
    State(service): State<Arc<DialogueService>>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = service.scheduling().book_appointment(&request).await?;
    Ok(Json(json!(appointment)))
}

/// Direct cancellation passthrough.
#[axum::debug_handler]
pub async fn cancel_rendez_vous(
    State(service): State<Arc<DialogueService>>,
    Path(rdv_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    service.scheduling().cancel_appointment(rdv_id).await?;
    Ok(Json(json!({ "cancelled": rdv_id })))
}

#[axum::debug_handler]
pub async fn get_cabinet(
    State(service): State<Arc<DialogueService>>,
    Path(cabinet_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let cabinet = service.cabinet().get_cabinet(cabinet_id).await?;
    Ok(Json(json!(cabinet)))
}
