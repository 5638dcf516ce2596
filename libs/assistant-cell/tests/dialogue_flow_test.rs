// End-to-end dialogue flows against mocked collaborators.
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use assistant_cell::models::ChatRequest;
use assistant_cell::services::dialogue::DialogueService;
use assistant_cell::services::session::{ChatState, SessionStore};
use shared_config::AppConfig;

fn test_config(base_url: &str) -> AppConfig {
    AppConfig {
        appointment_service_url: base_url.to_string(),
        cabinet_service_url: base_url.to_string(),
        collaborator_timeout_secs: 5,
        session_cache_capacity: 100,
        session_idle_ttl_minutes: 5,
    }
}

fn build_service(base_url: &str) -> (DialogueService, Arc<SessionStore>) {
    let store = Arc::new(SessionStore::new(100, Duration::from_secs(300)));
    let service = DialogueService::new(&test_config(base_url), store.clone());
    (service, store)
}

fn chat(message: &str, patient_id: Option<i64>) -> ChatRequest {
    ChatRequest {
        message: message.to_string(),
        patient_id,
        cabinet_id: 1,
        session_id: None,
    }
}

fn appointment_json(id: i64, date: &str, time: &str) -> serde_json::Value {
    json!({
        "idRendezVous": id,
        "dateRdv": date,
        "heureRdv": time,
        "motif": "CONSULTATION",
        "statut": "CONFIRME",
        "notes": null,
        "patientId": 42,
        "utilisateurId": 42,
        "cabinetId": 1
    })
}

#[tokio::test]
async fn availability_subtracts_booked_slots() {
    let server = MockServer::start().await;
    let tomorrow = (Local::now().date_naive() + chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();

    Mock::given(method("GET"))
        .and(path("/api/rendez-vous/du-jour"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([appointment_json(1, &tomorrow, "09:00:00")])),
        )
        .mount(&server)
        .await;

    let (service, _) = build_service(&server.uri());
    let response = service
        .process_message(chat("Disponibilités pour demain", Some(42)))
        .await;

    assert!(response.response.contains("09:30"), "{}", response.response);
    assert!(
        !response.response.contains("09:00"),
        "booked slot still offered: {}",
        response.response
    );
}

#[tokio::test]
async fn three_turn_booking_reaches_confirmation() {
    let server = MockServer::start().await;
    let tomorrow = (Local::now().date_naive() + chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();

    Mock::given(method("GET"))
        .and(path("/api/rendez-vous/du-jour"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rendez-vous/disponibilite"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/rendez-vous"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(appointment_json(7, &tomorrow, "14:30:00")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (service, store) = build_service(&server.uri());

    let r1 = service.process_message(chat("Je veux un rdv", Some(42))).await;
    assert!(r1.response.contains("date"), "{}", r1.response);

    let r2 = service.process_message(chat("Demain", Some(42))).await;
    assert!(r2.response.contains("09:00"), "{}", r2.response);

    let r3 = service.process_message(chat("14h30", Some(42))).await;
    assert!(r3.response.contains("14:30"), "{}", r3.response);
    assert!(r3.response.contains("#7"), "{}", r3.response);

    let session = store.get_or_create("P:42").await;
    let session = session.lock().await;
    assert_eq!(session.state, ChatState::Idle);
    assert_eq!(session.pending_date, None);
    assert_eq!(session.pending_time, None);
}

#[tokio::test]
async fn cancel_intent_aborts_a_booking_in_progress() {
    let server = MockServer::start().await;
    let (service, store) = build_service(&server.uri());

    let r1 = service
        .process_message(chat("Je veux prendre rendez-vous", Some(42)))
        .await;
    assert!(r1.response.contains("date"), "{}", r1.response);

    let r2 = service.process_message(chat("Annuler", Some(42))).await;
    assert!(
        r2.response.contains("annulé l'opération"),
        "{}",
        r2.response
    );

    let session = store.get_or_create("P:42").await;
    let session = session.lock().await;
    assert_eq!(session.state, ChatState::Idle);
    assert_eq!(session.pending_date, None);
}

#[tokio::test]
async fn cancelling_an_unowned_appointment_never_reaches_the_collaborator() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/rendez-vous/patient/42"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([appointment_json(1, "2030-01-15", "10:00:00")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/rendez-vous/99/annuler"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (service, _) = build_service(&server.uri());
    let response = service
        .process_message(chat("Annuler le rdv 99", Some(42)))
        .await;

    assert!(
        response.response.contains("pas trouvé"),
        "{}",
        response.response
    );
}

#[tokio::test]
async fn owned_appointment_cancellation_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/rendez-vous/patient/42"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([appointment_json(3, "2030-01-15", "10:00:00")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/rendez-vous/3/annuler"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (service, _) = build_service(&server.uri());
    let response = service
        .process_message(chat("Annuler le rdv 3", Some(42)))
        .await;

    assert!(
        response.response.contains("annulé avec succès"),
        "{}",
        response.response
    );
}

#[tokio::test]
async fn booking_without_identity_never_calls_the_collaborator() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/rendez-vous/du-jour"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rendez-vous/disponibilite"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/rendez-vous"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (service, _) = build_service(&server.uri());
    let response = service
        .process_message(chat("Je veux un rdv demain à 14h30", None))
        .await;

    assert!(
        response.response.contains("identifier"),
        "{}",
        response.response
    );
}

#[tokio::test]
async fn lost_race_reoffers_remaining_slots() {
    let server = MockServer::start().await;
    let tomorrow = (Local::now().date_naive() + chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();

    // The point check says free but the booking itself hits a conflict;
    // afterwards 10:00 shows up as taken.
    Mock::given(method("GET"))
        .and(path("/api/rendez-vous/disponibilite"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/rendez-vous"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rendez-vous/du-jour"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([appointment_json(5, &tomorrow, "10:00:00")])),
        )
        .mount(&server)
        .await;

    let (service, store) = build_service(&server.uri());
    let response = service
        .process_message(chat("Je veux un rdv demain à 10h00", Some(42)))
        .await;

    assert!(
        response.response.contains("plus disponible"),
        "{}",
        response.response
    );
    assert!(response.response.contains("10:30"), "{}", response.response);

    // The user can answer with another time directly.
    let session = store.get_or_create("P:42").await;
    let session = session.lock().await;
    assert_eq!(session.state, ChatState::AwaitingTimeForBooking);
}

#[tokio::test]
async fn two_unparseable_dates_fall_back_to_idle() {
    let server = MockServer::start().await;
    let (service, store) = build_service(&server.uri());

    service
        .process_message(chat("Disponibilités", Some(42)))
        .await;
    service
        .process_message(chat("euh je ne sais pas", Some(42)))
        .await;
    let r3 = service
        .process_message(chat("toujours aucune idée", Some(42)))
        .await;

    assert!(r3.response.contains("aide"), "{}", r3.response);
    let session = store.get_or_create("P:42").await;
    let session = session.lock().await;
    assert_eq!(session.state, ChatState::Idle);
}

#[tokio::test]
async fn three_consecutive_collaborator_failures_reset_the_session() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/cabinets/1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (service, store) = build_service(&server.uri());

    let r1 = service
        .process_message(chat("Adresse du cabinet", Some(42)))
        .await;
    assert!(!r1.response.contains("recommencer"), "{}", r1.response);
    let r2 = service
        .process_message(chat("Adresse du cabinet", Some(42)))
        .await;
    assert!(!r2.response.contains("recommencer"), "{}", r2.response);

    let r3 = service
        .process_message(chat("Adresse du cabinet", Some(42)))
        .await;
    assert!(r3.response.contains("recommencer"), "{}", r3.response);

    let session = store.get_or_create("P:42").await;
    let session = session.lock().await;
    assert_eq!(session.state, ChatState::Idle);
    assert_eq!(session.technical_failures, 0);
}

#[tokio::test]
async fn successful_turns_break_the_collaborator_failure_streak() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/cabinets/1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (service, store) = build_service(&server.uri());

    // Two lookup failures, each followed by a healthy turn, then a third
    // failure: never three in a row, so no escalation.
    for _ in 0..2 {
        service
            .process_message(chat("Adresse du cabinet", Some(42)))
            .await;
        service.process_message(chat("Bonjour", Some(42))).await;
    }
    let r5 = service
        .process_message(chat("Adresse du cabinet", Some(42)))
        .await;

    assert!(!r5.response.contains("recommencer"), "{}", r5.response);

    let session = store.get_or_create("P:42").await;
    let session = session.lock().await;
    assert_eq!(session.technical_failures, 1);
}

#[tokio::test]
async fn anonymous_turns_without_token_do_not_share_state() {
    let server = MockServer::start().await;
    let (service, _store) = build_service(&server.uri());

    let r1 = service
        .process_message(chat("Je veux prendre rendez-vous", None))
        .await;
    assert!(r1.response.contains("date"), "{}", r1.response);

    // No patient id and no session token: the next turn lands in a fresh
    // session, back at the start of the flow.
    let r2 = service.process_message(chat("Demain à 19h", None)).await;
    assert!(
        !r2.response.contains("créneaux disponibles"),
        "{}",
        r2.response
    );
}
