// libs/assistant-cell/src/services/session.rs
//
// Per-conversation state. Sessions live in a bounded cache with an idle TTL
// instead of a grow-forever map; each entry carries its own mutex so turns
// for the same key serialize while different conversations run in parallel.
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use moka::future::Cache;
use tokio::sync::Mutex;
use uuid::Uuid;

const HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Idle,
    AwaitingDateForAvailability,
    AwaitingDateForBooking,
    AwaitingTimeForBooking,
    AwaitingRdvIdForCancellation,
    AwaitingConfirmation,
}

#[derive(Debug)]
pub struct SessionContext {
    pub state: ChatState,
    pub pending_date: Option<NaiveDate>,
    pub pending_time: Option<NaiveTime>,
    /// Refreshed from every inbound request, never trusted from history.
    pub cabinet_id: i64,
    /// Per-state counter driving the 2-strike re-prompt escalation.
    pub parse_failures: u32,
    /// Whole-conversation counter of collaborator/internal failures;
    /// the session resets once it reaches 3.
    pub technical_failures: u32,
    pub last_intent: Option<&'static str>,
    history: VecDeque<String>,
}

impl SessionContext {
    fn new() -> Self {
        Self {
            state: ChatState::Idle,
            pending_date: None,
            pending_time: None,
            cabinet_id: 0,
            parse_failures: 0,
            technical_failures: 0,
            last_intent: None,
            history: VecDeque::new(),
        }
    }

    /// Back to Idle, dropping staged values and counters. The session
    /// identity (and history) survives.
    pub fn reset(&mut self) {
        self.state = ChatState::Idle;
        self.pending_date = None;
        self.pending_time = None;
        self.parse_failures = 0;
        self.technical_failures = 0;
    }

    pub fn push_history(&mut self, message: &str) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(message.to_string());
    }

    /// Raw user messages of the last turns, oldest first. Diagnostics only;
    /// no routing logic reads this.
    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }
}

/// Session key precedence: authenticated patient id, then client token,
/// then a fresh random key per message. Fully anonymous un-tokened callers
/// therefore get no multi-turn continuity.
pub fn derive_session_key(patient_id: Option<i64>, session_id: Option<&str>) -> String {
    if let Some(patient_id) = patient_id {
        return format!("P:{patient_id}");
    }
    if let Some(token) = session_id.map(str::trim).filter(|t| !t.is_empty()) {
        return format!("S:{token}");
    }
    format!("ANON:{}", Uuid::new_v4())
}

pub struct SessionStore {
    sessions: Cache<String, Arc<Mutex<SessionContext>>>,
}

impl SessionStore {
    pub fn new(capacity: u64, idle_ttl: Duration) -> Self {
        Self {
            sessions: Cache::builder()
                .max_capacity(capacity)
                .time_to_idle(idle_ttl)
                .build(),
        }
    }

    /// Fetch the session for `key`, creating it lazily on first use.
    pub async fn get_or_create(&self, key: &str) -> Arc<Mutex<SessionContext>> {
        self.sessions
            .get_with(key.to_string(), async { Arc::new(Mutex::new(SessionContext::new())) })
            .await
    }

    pub fn entry_count(&self) -> u64 {
        self.sessions.entry_count()
    }
}
