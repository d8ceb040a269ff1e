//! Dialog sessions and their store.
//!
//! One store per process, created at startup and injected into the
//! dispatcher. Sessions are wrapped in their own mutex so two concurrent
//! chat turns against the same session serialize while turns against
//! different sessions proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use capsheet_protocol::SlotValues;

use crate::dialog::SlotKey;

/// Dialog phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialogState {
    /// No round collection in flight; messages are direct commands.
    #[default]
    Idle,
    /// Collecting the four round parameters turn-by-turn.
    Collecting,
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub role: &'static str,
    pub message: String,
}

/// One conversation with its collected slots.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub session_id: String,
    pub state: DialogState,
    pub slots: SlotValues,
    pub history: Vec<HistoryEntry>,
    /// The slot the last question asked about. Bare answers ("10") are
    /// attributed here by the extraction prompt. Cleared on completion.
    pub last_prompted: Option<SlotKey>,
}

impl Session {
    pub fn new() -> Self {
        Session { session_id: uuid::Uuid::new_v4().to_string(), ..Default::default() }
    }

    pub fn push_user(&mut self, message: &str) {
        self.history.push(HistoryEntry { role: "user", message: message.to_string() });
    }

    pub fn push_assistant(&mut self, message: &str) {
        self.history.push(HistoryEntry { role: "assistant", message: message.to_string() });
    }

    /// Render the conversation for prompt embedding, one turn per line.
    pub fn history_text(&self) -> String {
        self.history
            .iter()
            .map(|e| format!("{}: {}", e.role, e.message))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Process-wide session table.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<Session>>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a session by id, or create a fresh one when the id is absent
    /// or unknown. Returns the handle to lock for the duration of a turn.
    pub fn get_or_create(&self, session_id: Option<&str>) -> Arc<Mutex<Session>> {
        let mut table = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = session_id {
            if let Some(existing) = table.get(id) {
                return Arc::clone(existing);
            }
        }
        let session = Session::new();
        let id = session.session_id.clone();
        let handle = Arc::new(Mutex::new(session));
        table.insert(id, Arc::clone(&handle));
        handle
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        let table = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        table.get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_id_creates_fresh_session() {
        let store = SessionStore::new();
        let handle = store.get_or_create(Some("nonexistent"));
        let session = handle.lock().unwrap();
        assert_ne!(session.session_id, "nonexistent");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_known_id_returns_same_session() {
        let store = SessionStore::new();
        let first = store.get_or_create(None);
        let id = first.lock().unwrap().session_id.clone();
        first.lock().unwrap().slots.amount = Some("5000000".to_string());

        let second = store.get_or_create(Some(&id));
        assert_eq!(second.lock().unwrap().slots.amount.as_deref(), Some("5000000"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_session_isolation() {
        let store = SessionStore::new();
        let a = store.get_or_create(None);
        let b = store.get_or_create(None);

        a.lock().unwrap().slots.round_type = Some("Seed".to_string());
        assert!(b.lock().unwrap().slots.round_type.is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_history_text_format() {
        let mut session = Session::new();
        session.push_user("hello");
        session.push_assistant("What type of round is this?");
        assert_eq!(session.history_text(), "user: hello\nassistant: What type of round is this?");
    }
}
