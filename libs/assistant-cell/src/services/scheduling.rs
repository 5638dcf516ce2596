// libs/assistant-cell/src/services/scheduling.rs
//
// Wrapper around the external scheduling service. HTTP status codes are
// folded into the tagged SchedulingError variants so the dialogue engine
// can branch on them explicitly.
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use reqwest::{Client, StatusCode};
use tracing::{debug, error};

use shared_config::AppConfig;

use crate::models::{Appointment, BookAppointmentRequest, SchedulingError};

pub const SLOT_MINUTES: i64 = 30;

/// 09:00, start of the clinic day.
pub fn opening() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap()
}

/// 17:00, end of the clinic day.
pub fn closing() -> NaiveTime {
    NaiveTime::from_hms_opt(17, 0, 0).unwrap()
}

/// The fixed daily template: 30-minute slots from 09:00 to 16:30 inclusive.
pub fn slot_template() -> Vec<NaiveTime> {
    let mut slots = Vec::new();
    let mut current = opening();
    while current <= closing() - chrono::Duration::minutes(SLOT_MINUTES) {
        slots.push(current);
        current += chrono::Duration::minutes(SLOT_MINUTES);
    }
    slots
}

/// Template minus the times already booked that day.
pub fn subtract_booked(booked: &[Appointment]) -> Vec<NaiveTime> {
    slot_template()
        .into_iter()
        .filter(|slot| !booked.iter().any(|rdv| rdv.heure_rdv == *slot))
        .collect()
}

/// Opening hours check, both bounds inclusive.
pub fn within_working_hours(time: NaiveTime) -> bool {
    time >= opening() && time <= closing()
}

pub struct SchedulingClient {
    client: Client,
    base_url: String,
}

impl SchedulingClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.collaborator_timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url: config.appointment_service_url.clone(),
        }
    }

    pub async fn book_appointment(
        &self,
        request: &BookAppointmentRequest,
    ) -> Result<Appointment, SchedulingError> {
        let url = format!("{}/api/rendez-vous", self.base_url);
        debug!("Booking appointment: {} {}", request.date_rdv, request.heure_rdv);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            status if status.is_success() => response.json().await.map_err(transport),
            StatusCode::BAD_REQUEST => {
                let body = response.text().await.unwrap_or_default();
                Err(SchedulingError::Validation(body))
            }
            StatusCode::CONFLICT => Err(SchedulingError::Conflict),
            status => {
                error!("Scheduling service returned {} for booking", status);
                Err(SchedulingError::Transport(format!("unexpected status {status}")))
            }
        }
    }

    pub async fn appointments_for_day(
        &self,
        date: NaiveDate,
        cabinet_id: i64,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let url = format!(
            "{}/api/rendez-vous/du-jour?date={}&cabinetId={}",
            self.base_url,
            date.format("%Y-%m-%d"),
            cabinet_id
        );
        self.get_json(&url).await
    }

    pub async fn appointments_for_patient(
        &self,
        patient_id: i64,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let url = format!("{}/api/rendez-vous/patient/{patient_id}", self.base_url);
        self.get_json(&url).await
    }

    /// Point check used right before a booking attempt to lose races early.
    pub async fn check_availability(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        cabinet_id: i64,
    ) -> Result<bool, SchedulingError> {
        let url = format!(
            "{}/api/rendez-vous/disponibilite?date={}&heure={}&cabinetId={}",
            self.base_url,
            date.format("%Y-%m-%d"),
            time.format("%H:%M:%S"),
            cabinet_id
        );
        self.get_json(&url).await
    }

    pub async fn cancel_appointment(&self, rdv_id: i64) -> Result<(), SchedulingError> {
        let url = format!("{}/api/rendez-vous/{rdv_id}/annuler", self.base_url);
        let response = self.client.patch(&url).send().await.map_err(transport)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(SchedulingError::NotFound),
            status => {
                error!("Scheduling service returned {} for cancellation", status);
                Err(SchedulingError::Transport(format!("unexpected status {status}")))
            }
        }
    }

    /// Free slots for a day: the fixed template minus booked times.
    pub async fn free_slots(
        &self,
        date: NaiveDate,
        cabinet_id: i64,
    ) -> Result<Vec<NaiveTime>, SchedulingError> {
        let booked = self.appointments_for_day(date, cabinet_id).await?;
        Ok(subtract_booked(&booked))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, SchedulingError> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await.map_err(transport)?;

        match response.status() {
            status if status.is_success() => response.json().await.map_err(transport),
            StatusCode::NOT_FOUND => Err(SchedulingError::NotFound),
            status => {
                error!("Scheduling service returned {} for {}", status, url);
                Err(SchedulingError::Transport(format!("unexpected status {status}")))
            }
        }
    }
}

fn transport(err: reqwest::Error) -> SchedulingError {
    SchedulingError::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppointmentStatus, Motive};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn booked_at(time: NaiveTime) -> Appointment {
        Appointment {
            id_rendez_vous: 1,
            date_rdv: NaiveDate::from_ymd_opt(2025, 6, 19).unwrap(),
            heure_rdv: time,
            motif: Motive::Consultation,
            statut: AppointmentStatus::Confirme,
            notes: None,
            patient_id: 100,
            utilisateur_id: Some(100),
            cabinet_id: 1,
        }
    }

    #[test]
    fn template_has_sixteen_half_hour_slots() {
        let slots = slot_template();
        assert_eq!(slots.len(), 16);
        assert_eq!(slots.first(), Some(&t(9, 0)));
        assert_eq!(slots.last(), Some(&t(16, 30)));
    }

    #[test]
    fn booking_one_slot_removes_exactly_that_entry() {
        let free = subtract_booked(&[booked_at(t(9, 0))]);
        assert_eq!(free.len(), 15);
        assert!(!free.contains(&t(9, 0)));
        assert!(free.contains(&t(9, 30)));
    }

    #[test]
    fn working_hours_bounds_are_inclusive() {
        assert!(within_working_hours(t(9, 0)));
        assert!(within_working_hours(t(17, 0)));
        assert!(!within_working_hours(t(8, 59)));
        assert!(!within_working_hours(t(17, 30)));
    }
}
