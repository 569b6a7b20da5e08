//! Session store: bounded conversation history, one in-flight turn.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use vigil_types::{ChatMessage, ChatRole, GatewayError, SessionId};

/// Hard bound on a session transcript. The oldest non-system messages are
/// evicted first.
pub const MAX_SESSION_MESSAGES: usize = 200;

/// One chat session.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    messages: VecDeque<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    in_flight: bool,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: VecDeque::new(),
            created_at: now,
            last_active: now,
            in_flight: false,
        }
    }

    /// Append a message, evicting the oldest non-system message once the
    /// bound is reached.
    pub fn push(&mut self, message: ChatMessage) {
        if self.messages.len() >= MAX_SESSION_MESSAGES {
            if let Some(idx) = self
                .messages
                .iter()
                .position(|m| m.role != ChatRole::System)
            {
                self.messages.remove(idx);
            } else {
                self.messages.pop_front();
            }
        }
        self.messages.push_back(message);
        self.last_active = Utc::now();
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// One-line transcript summary for diagnostics.
    pub fn summary(&self) -> String {
        let users = self
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::User)
            .count();
        let assistants = self
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::Assistant)
            .count();
        format!(
            "{}: {} messages ({users} user / {assistants} assistant), last active {}",
            self.id,
            self.messages.len(),
            self.last_active.to_rfc3339()
        )
    }
}

/// Releases the session's in-flight flag when the turn ends, however it
/// ends.
#[derive(Debug)]
pub struct TurnGuard {
    session: Arc<Mutex<Session>>,
}

impl TurnGuard {
    pub fn session(&self) -> &Arc<Mutex<Session>> {
        &self.session
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if let Ok(mut session) = self.session.lock() {
            session.in_flight = false;
        }
    }
}

/// Process-wide session map.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, id: &SessionId) -> Arc<Mutex<Session>> {
        if let Some(session) = self
            .sessions
            .read()
            .expect("session map poisoned")
            .get(id)
        {
            return session.clone();
        }
        let mut map = self.sessions.write().expect("session map poisoned");
        map.entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(id.clone()))))
            .clone()
    }

    /// Claim the session for one turn. A busy session rejects the new
    /// request instead of interleaving turns.
    pub fn begin_turn(&self, id: &SessionId) -> Result<TurnGuard, GatewayError> {
        let session = self.get_or_create(id);
        {
            let mut guard = session.lock().expect("session poisoned");
            if guard.in_flight {
                return Err(GatewayError::SessionBusy(id.to_string()));
            }
            guard.in_flight = true;
        }
        Ok(TurnGuard { session })
    }

    pub fn len(&self) -> usize {
        self.sessions.read().expect("session map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
