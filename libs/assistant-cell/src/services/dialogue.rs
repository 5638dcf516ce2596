// libs/assistant-cell/src/services/dialogue.rs
//
// The dialogue state machine. `plan` is a pure transition function from
// (state, classified input) to a high-level Action, the single source of
// truth for the routing table; `DialogueService` interprets Actions,
// performing collaborator calls and mutating the session.
use std::sync::Arc;

use chrono::{Local, NaiveDate, NaiveTime};
use serde_json::json;
use tracing::{info, warn};

use shared_config::AppConfig;

use crate::models::{
    Appointment, BookAppointmentRequest, ChatRequest, ChatResponse, Motive, SchedulingError,
};
use crate::services::cabinet::CabinetClient;
use crate::services::extractor;
use crate::services::intent::{self, Intent};
use crate::services::scheduling::{self, SchedulingClient};
use crate::services::session::{derive_session_key, ChatState, SessionContext, SessionStore};

const DATE_FMT: &str = "%d/%m/%Y";
const TIME_FMT: &str = "%H:%M";

const MENU: &str = "Vous pouvez consulter les disponibilités, prendre un rendez-vous, \
voir vos rendez-vous, annuler un rendez-vous ou obtenir des informations sur le cabinet.";

// ==============================================================================
// CLASSIFIED TURN INPUT
// ==============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct DetectedIntents {
    pub availability: bool,
    pub booking: bool,
    pub cabinet_info: bool,
    pub cancellation: bool,
    pub greeting: bool,
    pub farewell: bool,
    pub thanks: bool,
    pub my_appointments: bool,
    pub help: bool,
}

impl DetectedIntents {
    pub fn scan(normalized: &str) -> Self {
        Self {
            availability: Intent::Availability.detected_in(normalized),
            booking: Intent::Booking.detected_in(normalized),
            cabinet_info: Intent::CabinetInfo.detected_in(normalized),
            cancellation: Intent::Cancellation.detected_in(normalized),
            greeting: Intent::Greeting.detected_in(normalized),
            farewell: Intent::Farewell.detected_in(normalized),
            thanks: Intent::Thanks.detected_in(normalized),
            my_appointments: Intent::MyAppointments.detected_in(normalized),
            help: Intent::Help.detected_in(normalized),
        }
    }
}

/// Everything extracted from one inbound message, computed once per turn.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub normalized: String,
    pub intents: DetectedIntents,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub rdv_id: Option<i64>,
    pub invalid_time: bool,
    pub today: NaiveDate,
}

impl TurnInput {
    pub fn classify(raw: &str, today: NaiveDate) -> Self {
        let normalized = intent::normalize(raw);
        Self {
            intents: DetectedIntents::scan(&normalized),
            date: extractor::extract_date(raw, today),
            time: extractor::extract_time(raw),
            rdv_id: extractor::extract_rdv_id(raw),
            invalid_time: extractor::contains_invalid_time(raw),
            normalized,
            today,
        }
    }
}

// ==============================================================================
// TRANSITION PLANNER
// ==============================================================================

/// Which entity a waiting state failed to parse; drives the 2-strike
/// escalation and its per-state fallback target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Awaiting {
    DateForAvailability,
    DateForBooking,
    TimeForBooking,
    RdvId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Greet,
    Farewell,
    Help,
    ListMyAppointments,
    /// Cancellation intent without an identifier: list, then await the id.
    BeginCancellation,
    CancelById(i64),
    /// Date and in-hours time in one message.
    DirectBooking { date: NaiveDate, time: NaiveTime },
    /// Stage a booking date and offer the day's slots.
    StageDateAndListSlots { date: NaiveDate, implicit: bool },
    AwaitBookingDate,
    AwaitAvailabilityDate,
    ShowAvailability { date: NaiveDate },
    /// Bare in-hours time with lexical cues but no date.
    PromptForDateGivenTime(NaiveTime),
    RejectPastDate(NaiveDate),
    RejectInvalidTime,
    RejectOutOfHours(NaiveTime),
    CabinetInfo,
    Thanks,
    Fallback,
    /// Cancel-current-operation while mid-flow.
    CancelOperation,
    /// A time arrived for the staged booking date.
    AttemptBookingAt(NaiveTime),
    ParseFailure(Awaiting),
    /// AwaitingConfirmation accepts anything and returns to Idle.
    ConfirmationFallthrough,
}

/// The routing table of the state machine. Pure: no I/O, no session access
/// beyond the current state.
pub fn plan(state: ChatState, input: &TurnInput) -> Action {
    // Mid-flow escape hatch, checked before anything else.
    if state != ChatState::Idle && input.intents.cancellation {
        return Action::CancelOperation;
    }

    match state {
        ChatState::Idle => plan_idle(input),
        ChatState::AwaitingDateForAvailability => match input.date {
            Some(date) if date < input.today => Action::RejectPastDate(date),
            Some(date) => Action::ShowAvailability { date },
            None => Action::ParseFailure(Awaiting::DateForAvailability),
        },
        ChatState::AwaitingDateForBooking => match input.date {
            Some(date) if date < input.today => Action::RejectPastDate(date),
            Some(date) => Action::StageDateAndListSlots { date, implicit: false },
            None => Action::ParseFailure(Awaiting::DateForBooking),
        },
        ChatState::AwaitingTimeForBooking => {
            if input.invalid_time {
                return Action::RejectInvalidTime;
            }
            match input.time {
                Some(time) if !scheduling::within_working_hours(time) => {
                    Action::RejectOutOfHours(time)
                }
                Some(time) => Action::AttemptBookingAt(time),
                None => Action::ParseFailure(Awaiting::TimeForBooking),
            }
        }
        ChatState::AwaitingRdvIdForCancellation => match input.rdv_id {
            Some(id) => Action::CancelById(id),
            None => Action::ParseFailure(Awaiting::RdvId),
        },
        ChatState::AwaitingConfirmation => Action::ConfirmationFallthrough,
    }
}

/// Idle routing priority, top to bottom; first match wins.
fn plan_idle(input: &TurnInput) -> Action {
    let intents = &input.intents;

    if intents.greeting {
        return Action::Greet;
    }
    if intents.farewell {
        return Action::Farewell;
    }
    if intents.help {
        return Action::Help;
    }
    if intents.my_appointments {
        return Action::ListMyAppointments;
    }
    if intents.cancellation {
        return match input.rdv_id {
            Some(id) => Action::CancelById(id),
            None => Action::BeginCancellation,
        };
    }
    if intents.booking {
        if let Some(date) = input.date {
            if date < input.today {
                return Action::RejectPastDate(date);
            }
        }
        if input.invalid_time {
            return Action::RejectInvalidTime;
        }
        return match (input.date, input.time) {
            (Some(date), Some(time)) => {
                if scheduling::within_working_hours(time) {
                    Action::DirectBooking { date, time }
                } else {
                    Action::RejectOutOfHours(time)
                }
            }
            (Some(date), None) => Action::StageDateAndListSlots { date, implicit: false },
            (None, _) => Action::AwaitBookingDate,
        };
    }
    if intents.availability {
        return match input.date {
            Some(date) if date < input.today => Action::RejectPastDate(date),
            Some(date) => Action::ShowAvailability { date },
            None => Action::AwaitAvailabilityDate,
        };
    }
    // A bare date with no recognized intent is an implicit booking
    // request, with the same past-date rejection as the explicit paths.
    if let Some(date) = input.date {
        return if date >= input.today {
            Action::StageDateAndListSlots { date, implicit: true }
        } else {
            Action::RejectPastDate(date)
        };
    }
    // A bare time with supporting lexical cues prompts for the missing date.
    if let Some(time) = input.time {
        if input.date.is_none() && has_time_cue(&input.normalized) {
            return if scheduling::within_working_hours(time) {
                Action::PromptForDateGivenTime(time)
            } else {
                Action::RejectOutOfHours(time)
            };
        }
    }
    if input.invalid_time {
        return Action::RejectInvalidTime;
    }
    if intents.cabinet_info {
        return Action::CabinetInfo;
    }
    if intents.thanks {
        return Action::Thanks;
    }
    Action::Fallback
}

fn has_time_cue(normalized: &str) -> bool {
    normalized.chars().count() > 2
        && (normalized.contains("heure")
            || normalized.contains('h')
            || normalized.chars().any(|c| c.is_ascii_digit()))
}

// ==============================================================================
// EFFECT INTERPRETER
// ==============================================================================

pub struct DialogueService {
    sessions: Arc<SessionStore>,
    scheduling: SchedulingClient,
    cabinet: CabinetClient,
}

impl DialogueService {
    pub fn new(config: &AppConfig, sessions: Arc<SessionStore>) -> Self {
        Self {
            sessions,
            scheduling: SchedulingClient::new(config),
            cabinet: CabinetClient::new(config),
        }
    }

    pub fn scheduling(&self) -> &SchedulingClient {
        &self.scheduling
    }

    pub fn cabinet(&self) -> &CabinetClient {
        &self.cabinet
    }

    /// One conversational turn. Never fails: every outcome, including
    /// collaborator breakage, becomes a user-facing reply.
    pub async fn process_message(&self, request: ChatRequest) -> ChatResponse {
        let key = derive_session_key(request.patient_id, request.session_id.as_deref());
        let session = self.sessions.get_or_create(&key).await;
        let mut session = session.lock().await;

        session.cabinet_id = request.cabinet_id;
        session.push_history(&request.message);

        let today = Local::now().date_naive();
        let input = TurnInput::classify(&request.message, today);
        let action = plan(session.state, &input);
        info!(session = %key, state = ?session.state, action = ?action, "turn planned");

        // Only consecutive collaborator failures accumulate: a turn that
        // completes without one breaks the streak.
        let failures_before = session.technical_failures;
        let response = self
            .execute(action, &mut session, &input, request.patient_id)
            .await;
        if session.technical_failures == failures_before {
            session.technical_failures = 0;
        }
        response
    }

    async fn execute(
        &self,
        action: Action,
        session: &mut SessionContext,
        input: &TurnInput,
        patient_id: Option<i64>,
    ) -> ChatResponse {
        match action {
            Action::Greet => {
                self.handled(session, "SALUTATION");
                ChatResponse::text(format!(
                    "Bonjour ! Je suis l'assistant virtuel du cabinet médical. {MENU} \
                     Comment puis-je vous aider aujourd'hui ?"
                ))
            }
            Action::Farewell => {
                self.handled(session, "AU_REVOIR");
                session.reset();
                ChatResponse::text(
                    "Au revoir ! N'hésitez pas à revenir si vous avez besoin d'aide. \
                     Prenez soin de vous !",
                )
            }
            Action::Help => {
                self.handled(session, "AIDE");
                ChatResponse::text(
                    "Bien sûr ! Je peux vous aider avec :\n\
                     - Prendre un rendez-vous : dites \"Je veux prendre rendez-vous\"\n\
                     - Voir les disponibilités : dites \"Disponibilités pour demain\"\n\
                     - Vos rendez-vous : dites \"Mes rendez-vous\"\n\
                     - Annuler un rendez-vous : dites \"Je veux annuler\" suivi du numéro\n\
                     - Informations cabinet : dites \"Adresse du cabinet\"\n\
                     Que souhaitez-vous faire ?",
                )
            }
            Action::ListMyAppointments => {
                self.handled(session, "MES_RDV");
                self.list_my_appointments(session, patient_id).await
            }
            Action::BeginCancellation => {
                self.handled(session, "ANNULATION");
                self.begin_cancellation(session, patient_id).await
            }
            Action::CancelById(rdv_id) => {
                self.handled(session, "ANNULATION");
                self.cancel_by_id(session, rdv_id, patient_id).await
            }
            Action::DirectBooking { date, time } => {
                self.handled(session, "RDV");
                session.pending_date = Some(date);
                self.attempt_booking(session, date, time, patient_id).await
            }
            Action::StageDateAndListSlots { date, implicit } => {
                self.handled(session, if implicit { "RDV_IMPLICITE" } else { "RDV" });
                self.stage_date_and_list_slots(session, date, implicit).await
            }
            Action::AwaitBookingDate => {
                self.handled(session, "RDV");
                session.state = ChatState::AwaitingDateForBooking;
                ChatResponse::text(
                    "Parfait ! Je vais vous aider à prendre un rendez-vous. \
                     Pour quelle date souhaitez-vous venir ? \
                     (ex: \"demain\", \"lundi\", \"25/12\", \"dans 3 jours\")",
                )
            }
            Action::AwaitAvailabilityDate => {
                self.handled(session, "DISPONIBILITE");
                session.state = ChatState::AwaitingDateForAvailability;
                ChatResponse::text(
                    "Pour quelle date souhaitez-vous connaître les disponibilités ? \
                     Vous pouvez indiquer : \"demain\", \"lundi\", \"25/12\", \
                     \"dans 3 jours\", \"après-demain\", etc.",
                )
            }
            Action::ShowAvailability { date } => {
                self.handled(session, "DISPONIBILITE");
                self.show_availability(session, date).await
            }
            Action::PromptForDateGivenTime(time) => {
                self.handled(session, "HEURE_IMPLICITE");
                ChatResponse::text(format!(
                    "Je comprends que vous mentionnez l'heure {}. Pour prendre rendez-vous \
                     à cette heure, j'ai besoin de connaître la date. Pour quelle date \
                     souhaitez-vous ce rendez-vous ? (ex: \"demain\", \"lundi\", \"25/12\")",
                    time.format(TIME_FMT)
                ))
            }
            // Domain rejections: reported verbatim, state untouched, no
            // counter movement.
            Action::RejectPastDate(date) => ChatResponse::text(format!(
                "La date indiquée ({}) est passée. Veuillez choisir une date future.",
                date.format(DATE_FMT)
            )),
            Action::RejectInvalidTime => ChatResponse::text(
                "L'heure indiquée n'est pas valide. Veuillez indiquer une heure correcte \
                 (ex: 14h30).",
            ),
            Action::RejectOutOfHours(time) => ChatResponse::text(format!(
                "Le cabinet est fermé à {}. Les horaires sont de 09h00 à 17h00.",
                time.format(TIME_FMT)
            )),
            Action::CabinetInfo => {
                self.handled(session, "INFO_CABINET");
                self.cabinet_info(session).await
            }
            Action::Thanks => {
                self.handled(session, "REMERCIEMENT");
                ChatResponse::text(
                    "De rien ! N'hésitez pas si vous avez besoin d'autre chose. Bonne journée !",
                )
            }
            Action::Fallback => {
                session.parse_failures += 1;
                if session.parse_failures >= 2 || input.normalized.chars().count() < 4 {
                    ChatResponse::text(format!(
                        "Je n'ai pas bien compris votre demande. {MENU} \
                         Dites \"aide\" pour plus d'informations."
                    ))
                } else {
                    ChatResponse::text(
                        "Je n'ai pas bien compris votre demande. Pouvez-vous reformuler ? \
                         Vous pouvez dire \"aide\" pour voir ce que je peux faire.",
                    )
                }
            }
            Action::CancelOperation => {
                session.reset();
                ChatResponse::text(format!(
                    "D'accord, j'ai annulé l'opération en cours. Que puis-je faire pour vous ? {MENU}"
                ))
            }
            Action::AttemptBookingAt(time) => {
                let Some(date) = session.pending_date else {
                    // Staged date lost; nothing sensible left to do mid-flow.
                    session.reset();
                    return ChatResponse::text(format!(
                        "Je n'ai plus la date de votre demande. Reprenons depuis le début : {MENU}"
                    ));
                };
                session.pending_time = Some(time);
                self.book_after_recheck(session, date, time, patient_id).await
            }
            Action::ParseFailure(awaiting) => self.parse_failure(session, awaiting),
            Action::ConfirmationFallthrough => {
                session.state = ChatState::Idle;
                ChatResponse::text("Opération confirmée. Que souhaitez-vous faire maintenant ?")
            }
        }
    }

    /// Any successfully routed intent clears the per-state strike counter.
    fn handled(&self, session: &mut SessionContext, label: &'static str) {
        session.last_intent = Some(label);
        session.parse_failures = 0;
    }

    // --------------------------------------------------------------------------
    // COLLABORATOR-BACKED EFFECTS
    // --------------------------------------------------------------------------

    async fn list_my_appointments(
        &self,
        session: &mut SessionContext,
        patient_id: Option<i64>,
    ) -> ChatResponse {
        let Some(patient_id) = patient_id else {
            return identity_required("accéder à vos rendez-vous");
        };
        match self.scheduling.appointments_for_patient(patient_id).await {
            Ok(appointments) if appointments.is_empty() => ChatResponse::text(
                "Vous n'avez actuellement aucun rendez-vous programmé. \
                 Souhaitez-vous en prendre un ?",
            ),
            Ok(appointments) => ChatResponse::with_data(
                format!(
                    "Vos rendez-vous :\n{}\nSouhaitez-vous annuler l'un de ces rendez-vous \
                     ou prendre un nouveau rendez-vous ?",
                    format_appointments(&appointments)
                ),
                json!(appointments),
            ),
            Err(err) => self.technical_reply(
                session,
                &err,
                "Désolé, je ne peux pas accéder à vos rendez-vous pour le moment.",
            ),
        }
    }

    async fn begin_cancellation(
        &self,
        session: &mut SessionContext,
        patient_id: Option<i64>,
    ) -> ChatResponse {
        let Some(patient_id) = patient_id else {
            return identity_required("annuler de rendez-vous");
        };
        match self.scheduling.appointments_for_patient(patient_id).await {
            Ok(appointments) if appointments.is_empty() => {
                ChatResponse::text("Vous n'avez actuellement aucun rendez-vous à annuler.")
            }
            Ok(appointments) => {
                session.state = ChatState::AwaitingRdvIdForCancellation;
                ChatResponse::with_data(
                    format!(
                        "Voici vos rendez-vous :\n{}\nQuel rendez-vous souhaitez-vous annuler ? \
                         Indiquez le numéro.",
                        format_appointments(&appointments)
                    ),
                    json!(appointments),
                )
            }
            Err(err) => self.technical_reply(
                session,
                &err,
                "Désolé, je ne peux pas accéder à vos rendez-vous pour le moment.",
            ),
        }
    }

    /// Ownership check before any cancel call: an id outside the caller's
    /// own list is reported as not found and never forwarded.
    async fn cancel_by_id(
        &self,
        session: &mut SessionContext,
        rdv_id: i64,
        patient_id: Option<i64>,
    ) -> ChatResponse {
        let Some(patient_id) = patient_id else {
            return identity_required("annuler de rendez-vous");
        };

        let owned = match self.scheduling.appointments_for_patient(patient_id).await {
            Ok(appointments) => appointments,
            Err(err) => {
                return self.technical_reply(
                    session,
                    &err,
                    "Désolé, je ne peux pas vérifier vos rendez-vous pour le moment.",
                )
            }
        };

        if !owned.iter().any(|rdv| rdv.id_rendez_vous == rdv_id) {
            return ChatResponse::text(format!(
                "Désolé, je n'ai pas trouvé de rendez-vous avec le numéro #{rdv_id} dans votre \
                 liste. Pouvez-vous vérifier le numéro ?"
            ));
        }

        match self.scheduling.cancel_appointment(rdv_id).await {
            Ok(()) => {
                session.state = ChatState::Idle;
                session.parse_failures = 0;
                ChatResponse::text(format!(
                    "Votre rendez-vous #{rdv_id} a été annulé avec succès. \
                     Souhaitez-vous prendre un nouveau rendez-vous ou faire autre chose ?"
                ))
            }
            Err(SchedulingError::NotFound) => ChatResponse::text(format!(
                "Désolé, je n'ai pas trouvé de rendez-vous avec le numéro #{rdv_id}. \
                 Pouvez-vous vérifier le numéro ?"
            )),
            Err(err) => self.technical_reply(
                session,
                &err,
                "Désolé, une erreur s'est produite lors de l'annulation. Veuillez réessayer \
                 ou contacter le cabinet directement.",
            ),
        }
    }

    async fn show_availability(
        &self,
        session: &mut SessionContext,
        date: NaiveDate,
    ) -> ChatResponse {
        session.state = ChatState::Idle;
        let date_str = date.format(DATE_FMT);
        match self.scheduling.free_slots(date, session.cabinet_id).await {
            Ok(slots) if slots.is_empty() => ChatResponse::with_data(
                format!(
                    "Désolé, il n'y a plus de créneaux disponibles pour le {date_str}. \
                     Souhaitez-vous choisir une autre date ?"
                ),
                json!([]),
            ),
            Ok(slots) => ChatResponse::with_data(
                format!(
                    "Voici les créneaux disponibles pour le {date_str} :\n{}\n\
                     Souhaitez-vous réserver l'un de ces créneaux ?",
                    format_slots(&slots)
                ),
                slots_json(&slots),
            ),
            Err(err) => self.technical_reply(
                session,
                &err,
                "Désolé, je ne peux pas vérifier les disponibilités pour le moment. \
                 Veuillez réessayer plus tard.",
            ),
        }
    }

    async fn stage_date_and_list_slots(
        &self,
        session: &mut SessionContext,
        date: NaiveDate,
        implicit: bool,
    ) -> ChatResponse {
        session.pending_date = Some(date);
        session.state = ChatState::AwaitingTimeForBooking;
        let date_str = date.format(DATE_FMT);

        match self.scheduling.free_slots(date, session.cabinet_id).await {
            Ok(slots) if slots.is_empty() => {
                session.state = ChatState::AwaitingDateForBooking;
                session.pending_date = None;
                ChatResponse::text(format!(
                    "Désolé, il n'y a plus de créneaux disponibles pour le {date_str}. \
                     Souhaitez-vous choisir une autre date ?"
                ))
            }
            Ok(slots) => {
                let lead = if implicit {
                    format!("Je comprends que vous souhaitez prendre rendez-vous pour le {date_str}.")
                } else {
                    format!("Parfait ! Pour le {date_str}, voici les heures disponibles :")
                };
                ChatResponse::with_data(
                    format!(
                        "{lead}\n{}\nQuelle heure vous convient ?",
                        format_slots(&slots)
                    ),
                    slots_json(&slots),
                )
            }
            Err(err) => {
                session.state = ChatState::Idle;
                session.pending_date = None;
                self.technical_reply(
                    session,
                    &err,
                    "Désolé, je ne peux pas vérifier les disponibilités pour le moment. \
                     Veuillez réessayer plus tard.",
                )
            }
        }
    }

    /// Re-check the slot right before booking; a lost race re-offers what
    /// remains instead of failing the conversation.
    async fn book_after_recheck(
        &self,
        session: &mut SessionContext,
        date: NaiveDate,
        time: NaiveTime,
        patient_id: Option<i64>,
    ) -> ChatResponse {
        match self
            .scheduling
            .check_availability(date, time, session.cabinet_id)
            .await
        {
            Ok(false) => self.reoffer_slots(session, date).await,
            // Available, or the point check itself failed: let the booking
            // endpoint be the arbiter.
            Ok(true) | Err(_) => self.attempt_booking(session, date, time, patient_id).await,
        }
    }

    async fn attempt_booking(
        &self,
        session: &mut SessionContext,
        date: NaiveDate,
        time: NaiveTime,
        patient_id: Option<i64>,
    ) -> ChatResponse {
        let Some(patient_id) = patient_id else {
            return identity_required("prendre de rendez-vous");
        };

        let request = BookAppointmentRequest {
            date_rdv: date,
            heure_rdv: time,
            motif: Motive::Consultation,
            notes: None,
            patient_id,
            utilisateur_id: patient_id,
            cabinet_id: session.cabinet_id,
        };

        match self.scheduling.book_appointment(&request).await {
            Ok(appointment) => {
                session.state = ChatState::Idle;
                session.pending_date = None;
                session.pending_time = None;
                session.parse_failures = 0;
                info!(rdv = appointment.id_rendez_vous, "appointment booked");
                ChatResponse::with_data(
                    format!(
                        "Parfait ! Votre rendez-vous est confirmé pour le {} à {}.\n\
                         Numéro de rendez-vous : #{}\nStatut : {}\n\
                         N'oubliez pas de venir à l'heure. À bientôt !",
                        appointment.date_rdv.format(DATE_FMT),
                        appointment.heure_rdv.format(TIME_FMT),
                        appointment.id_rendez_vous,
                        appointment.statut,
                    ),
                    json!(appointment),
                )
            }
            Err(SchedulingError::Validation(reason)) => {
                warn!("Booking rejected by scheduling service: {}", reason);
                ChatResponse::text(
                    "Je n'ai pas pu réserver ce rendez-vous. Il semble y avoir un problème \
                     avec les informations fournies ou le créneau n'est pas valide.",
                )
            }
            Err(SchedulingError::Conflict) => {
                info!("Slot taken in a race: {} {}", date, time);
                self.reoffer_slots(session, date).await
            }
            Err(err) => self.technical_reply(
                session,
                &err,
                "Une erreur technique est survenue lors de la réservation. \
                 Veuillez réessayer plus tard.",
            ),
        }
    }

    /// After a lost race: remaining slots keep the user in the time-waiting
    /// state; an empty day falls back to choosing another date.
    async fn reoffer_slots(&self, session: &mut SessionContext, date: NaiveDate) -> ChatResponse {
        session.pending_time = None;
        match self.scheduling.free_slots(date, session.cabinet_id).await {
            Ok(slots) if slots.is_empty() => {
                session.state = ChatState::AwaitingDateForBooking;
                session.pending_date = None;
                ChatResponse::text(
                    "Désolé, ce créneau vient d'être réservé et il n'y a plus d'autres \
                     créneaux pour cette date. Souhaitez-vous choisir une autre date ?",
                )
            }
            Ok(slots) => {
                session.state = ChatState::AwaitingTimeForBooking;
                session.pending_date = Some(date);
                ChatResponse::with_data(
                    format!(
                        "Désolé, ce créneau n'est plus disponible. Voici les créneaux encore \
                         disponibles pour le {} :\n{}\nQuelle heure vous convient ?",
                        date.format(DATE_FMT),
                        format_slots(&slots)
                    ),
                    slots_json(&slots),
                )
            }
            Err(_) => ChatResponse::text(
                "Désolé, ce créneau n'est plus disponible et je ne peux pas récupérer les \
                 autres créneaux pour le moment.",
            ),
        }
    }

    async fn cabinet_info(&self, session: &mut SessionContext) -> ChatResponse {
        match self.cabinet.get_cabinet(session.cabinet_id).await {
            Ok(cabinet) => {
                let mut response = String::from("Informations du cabinet :\n");
                response.push_str(&format!(
                    "Nom : {}\n",
                    cabinet.nom.as_deref().unwrap_or("Non renseigné")
                ));
                if let Some(specialite) = cabinet.specialite.as_deref().filter(|s| !s.is_empty()) {
                    response.push_str(&format!("Spécialité : {specialite}\n"));
                }
                response.push_str(&format!(
                    "Adresse : {}\n",
                    cabinet.adresse.as_deref().unwrap_or("Non renseignée")
                ));
                response.push_str(&format!(
                    "Téléphone : {}\n",
                    cabinet.tel.as_deref().unwrap_or("Non renseigné")
                ));
                if let Some(created) = cabinet.date_creation {
                    response.push_str(&format!("Créé le : {}\n", created.format(DATE_FMT)));
                }
                ChatResponse::with_data(response, json!(cabinet))
            }
            Err(SchedulingError::NotFound) => ChatResponse::text(
                "Désolé, je n'ai pas pu récupérer les informations du cabinet. \
                 Le cabinet demandé n'existe peut-être pas.",
            ),
            Err(err) => self.technical_reply(
                session,
                &err,
                "Désolé, je n'ai pas pu récupérer les informations du cabinet pour le moment. \
                 Veuillez réessayer plus tard.",
            ),
        }
    }

    // --------------------------------------------------------------------------
    // FAILURE BOOKKEEPING
    // --------------------------------------------------------------------------

    /// Parse failure in a waiting state: re-prompt once, then fall back to
    /// the per-state target on the second strike.
    fn parse_failure(&self, session: &mut SessionContext, awaiting: Awaiting) -> ChatResponse {
        session.parse_failures += 1;
        let escalate = session.parse_failures >= 2;
        if escalate {
            session.parse_failures = 0;
        }

        match awaiting {
            Awaiting::DateForAvailability if escalate => {
                session.state = ChatState::Idle;
                ChatResponse::text(
                    "Je n'ai pas pu comprendre la date que vous avez indiquée. Vous pouvez \
                     essayer avec : \"demain\", \"lundi\", \"25/12\", \"dans 3 jours\", etc. \
                     Ou dites \"aide\" pour plus d'informations.",
                )
            }
            Awaiting::DateForBooking if escalate => {
                session.state = ChatState::Idle;
                session.pending_date = None;
                ChatResponse::text(
                    "Je n'ai pas pu comprendre la date. Voulez-vous recommencer ou \
                     avez-vous besoin d'aide ?",
                )
            }
            Awaiting::DateForAvailability | Awaiting::DateForBooking => ChatResponse::text(
                "Je n'ai pas compris la date. Pouvez-vous la reformuler ?\n\
                 Exemples : \"demain\", \"lundi\", \"25/12\", \"dans 3 jours\", \"après-demain\"",
            ),
            Awaiting::TimeForBooking if escalate => {
                session.state = ChatState::AwaitingDateForBooking;
                let date_str = session
                    .pending_date
                    .map(|d| d.format(DATE_FMT).to_string())
                    .unwrap_or_else(|| "cette date".to_string());
                session.pending_date = None;
                session.pending_time = None;
                ChatResponse::text(format!(
                    "Je n'ai pas pu comprendre l'heure que vous avez indiquée. Pour le \
                     {date_str}, veuillez indiquer une heure valide comme \"14h30\", \"10:00\", \
                     \"9h\", \"matin\", \"midi\" ou \"soir\". Souhaitez-vous choisir une \
                     autre date ?"
                ))
            }
            Awaiting::TimeForBooking => ChatResponse::text(
                "Je n'ai pas compris l'heure. Pouvez-vous la reformuler ?\n\
                 Exemples : \"14h30\", \"10:00\", \"9h\", \"matin\", \"midi\", \"soir\"",
            ),
            Awaiting::RdvId if escalate => {
                session.state = ChatState::Idle;
                ChatResponse::text(
                    "Je n'ai pas pu identifier le numéro de rendez-vous à annuler. \
                     Pouvez-vous consulter vos rendez-vous et réessayer avec le numéro correct ?",
                )
            }
            Awaiting::RdvId => ChatResponse::text(
                "Je n'ai pas compris le numéro de rendez-vous. Pouvez-vous l'indiquer à \
                 nouveau ? Exemple : \"Annuler le rdv 1\" ou simplement \"1\". \
                 Dites \"mes rendez-vous\" pour voir la liste avec les numéros.",
            ),
        }
    }

    /// Collaborator failure: generic reply, whole-conversation counter; the
    /// third one resets the session.
    fn technical_reply(
        &self,
        session: &mut SessionContext,
        err: &SchedulingError,
        message: &str,
    ) -> ChatResponse {
        warn!("Collaborator failure: {}", err);
        session.technical_failures += 1;
        if session.technical_failures >= 3 {
            session.reset();
            ChatResponse::text(format!(
                "{message} Voulez-vous recommencer ou avez-vous besoin d'aide ?"
            ))
        } else {
            ChatResponse::text(message)
        }
    }
}

// ==============================================================================
// FORMATTING
// ==============================================================================

fn identity_required(verb: &str) -> ChatResponse {
    ChatResponse::text(format!(
        "Je ne peux pas {verb} car je ne parviens pas à vous identifier. \
         Veuillez vous connecter ou fournir votre identifiant."
    ))
}

fn format_appointments(appointments: &[Appointment]) -> String {
    appointments
        .iter()
        .enumerate()
        .map(|(i, rdv)| {
            format!(
                "{}. RDV #{} - {} à {} ({})",
                i + 1,
                rdv.id_rendez_vous,
                rdv.date_rdv.format(DATE_FMT),
                rdv.heure_rdv.format(TIME_FMT),
                rdv.statut
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_slots(slots: &[NaiveTime]) -> String {
    slots
        .iter()
        .map(|slot| slot.format(TIME_FMT).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn slots_json(slots: &[NaiveTime]) -> serde_json::Value {
    json!(slots
        .iter()
        .map(|slot| slot.format(TIME_FMT).to_string())
        .collect::<Vec<_>>())
}

// ==============================================================================
// PLANNER TESTS
// ==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn today() -> NaiveDate {
        d(2025, 6, 18)
    }

    fn classify(raw: &str) -> TurnInput {
        TurnInput::classify(raw, today())
    }

    #[test]
    fn cancellation_intent_short_circuits_every_waiting_state() {
        let input = classify("Annuler");
        for state in [
            ChatState::AwaitingDateForAvailability,
            ChatState::AwaitingDateForBooking,
            ChatState::AwaitingTimeForBooking,
            ChatState::AwaitingRdvIdForCancellation,
            ChatState::AwaitingConfirmation,
        ] {
            assert_eq!(plan(state, &input), Action::CancelOperation, "{state:?}");
        }
    }

    #[test]
    fn idle_priority_greeting_wins_over_booking() {
        let input = classify("Bonjour, je veux un rendez-vous");
        assert_eq!(plan(ChatState::Idle, &input), Action::Greet);
    }

    #[test]
    fn idle_booking_with_date_and_time_books_directly() {
        let input = classify("Je veux un rdv demain à 14h30");
        assert_matches!(
            plan(ChatState::Idle, &input),
            Action::DirectBooking { date, time }
                if date == d(2025, 6, 19) && time == NaiveTime::from_hms_opt(14, 30, 0).unwrap()
        );
    }

    #[test]
    fn idle_booking_with_date_only_stages_it() {
        let input = classify("Je veux un rdv demain");
        assert_matches!(
            plan(ChatState::Idle, &input),
            Action::StageDateAndListSlots { date, implicit: false } if date == d(2025, 6, 19)
        );
    }

    #[test]
    fn idle_booking_without_entities_awaits_a_date() {
        let input = classify("Je veux prendre rendez-vous");
        assert_eq!(plan(ChatState::Idle, &input), Action::AwaitBookingDate);
    }

    #[test]
    fn idle_booking_rejects_past_dates_uniformly() {
        let input = classify("Je veux un rdv hier");
        assert_matches!(plan(ChatState::Idle, &input), Action::RejectPastDate(_));
        // Same check applies in the waiting state.
        assert_matches!(
            plan(ChatState::AwaitingDateForBooking, &input),
            Action::RejectPastDate(_)
        );
    }

    #[test]
    fn idle_booking_rejects_out_of_hours_time() {
        let input = classify("Je veux un rdv demain à 19h");
        assert_matches!(plan(ChatState::Idle, &input), Action::RejectOutOfHours(_));
    }

    #[test]
    fn idle_availability_with_date() {
        let input = classify("Disponibilités pour demain");
        assert_matches!(
            plan(ChatState::Idle, &input),
            Action::ShowAvailability { date } if date == d(2025, 6, 19)
        );
    }

    #[test]
    fn bare_date_is_an_implicit_booking_request() {
        let input = classify("demain");
        assert_matches!(
            plan(ChatState::Idle, &input),
            Action::StageDateAndListSlots { implicit: true, .. }
        );
    }

    #[test]
    fn bare_past_date_is_rejected_like_the_explicit_paths() {
        let input = classify("hier");
        assert_matches!(plan(ChatState::Idle, &input), Action::RejectPastDate(_));
    }

    #[test]
    fn bare_time_prompts_for_the_missing_date() {
        let input = classify("14h30");
        assert_matches!(plan(ChatState::Idle, &input), Action::PromptForDateGivenTime(_));
    }

    #[test]
    fn invalid_time_is_reported_not_swallowed() {
        let input = classify("25h00");
        assert_eq!(plan(ChatState::Idle, &input), Action::RejectInvalidTime);
        assert_eq!(
            plan(ChatState::AwaitingTimeForBooking, &input),
            Action::RejectInvalidTime
        );
    }

    #[test]
    fn cancellation_with_id_in_the_same_message_cancels_immediately() {
        let input = classify("Je veux annuler le rdv 12");
        assert_eq!(plan(ChatState::Idle, &input), Action::CancelById(12));
    }

    #[test]
    fn cancellation_without_id_begins_the_flow() {
        let input = classify("Je veux annuler");
        assert_eq!(plan(ChatState::Idle, &input), Action::BeginCancellation);
    }

    #[test]
    fn waiting_states_report_parse_failures() {
        let input = classify("euh je ne sais pas trop");
        assert_eq!(
            plan(ChatState::AwaitingDateForBooking, &input),
            Action::ParseFailure(Awaiting::DateForBooking)
        );
        assert_eq!(
            plan(ChatState::AwaitingTimeForBooking, &input),
            Action::ParseFailure(Awaiting::TimeForBooking)
        );
        assert_eq!(
            plan(ChatState::AwaitingRdvIdForCancellation, &input),
            Action::ParseFailure(Awaiting::RdvId)
        );
    }

    #[test]
    fn time_waiting_state_accepts_an_in_hours_time() {
        let input = classify("14h30");
        assert_matches!(
            plan(ChatState::AwaitingTimeForBooking, &input),
            Action::AttemptBookingAt(t) if t == NaiveTime::from_hms_opt(14, 30, 0).unwrap()
        );
    }

    #[test]
    fn confirmation_state_accepts_anything() {
        let input = classify("euh d'accord");
        assert_eq!(
            plan(ChatState::AwaitingConfirmation, &input),
            Action::ConfirmationFallthrough
        );
    }

    #[test]
    fn planning_is_pure_and_repeatable() {
        let input = classify("Disponibilités pour demain");
        assert_eq!(plan(ChatState::Idle, &input), plan(ChatState::Idle, &input));
    }
}
