//! Context blocks for the chat model, and per-session conversation history.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::store::{Metadata, ScoredRecord, keys};
use crate::types::ConversationTurn;

const MISSING: &str = "None";

fn field<'a>(metadata: &'a Metadata, key: &str) -> &'a str {
    match metadata.get(key) {
        Some(value) if !value.is_empty() => value,
        _ => MISSING,
    }
}

/// Render ranked hits as numbered text blocks, best first.
///
/// An empty result renders as the empty string.
pub fn build_context(hits: &[ScoredRecord]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let description = if hit.document.is_empty() {
                MISSING
            } else {
                hit.document.as_str()
            };
            format!(
                "Document {}:\nDescription: {}\nDetected Objects: {}\nTags: {}\nPotential Use Cases: {}\n",
                i + 1,
                description,
                field(&hit.metadata, keys::DETECTED_OBJECTS),
                field(&hit.metadata, keys::TAGS),
                field(&hit.metadata, keys::POTENTIAL_USE_CASES),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// One chat session's append-only history.
///
/// There is no size bound; callers that need one truncate before appending.
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    id: String,
    history: Vec<ConversationTurn>,
}

impl ChatSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn append_turn(&mut self, turn: ConversationTurn) {
        self.history.push(turn);
    }

    /// Clear the history. Calling it on an empty session is a no-op.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// A session shared between the registry and the request using it.
pub type SharedSession = Arc<tokio::sync::Mutex<ChatSession>>;

/// Sessions addressed by id. Each session has its own lock, so a long chat
/// turn in one session never blocks another.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SharedSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session for `id`, creating it if needed. Without an id a
    /// fresh session with a random id is created.
    pub fn get_or_create(&self, id: Option<&str>) -> (String, SharedSession) {
        let id = match id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(ChatSession::new(id.clone()))))
            .clone();
        (id, session)
    }

    pub fn get(&self, id: &str) -> Option<SharedSession> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    /// Drop the session from the registry. Requests already holding it
    /// keep their handle until they finish.
    pub fn remove(&self, id: &str) -> Option<SharedSession> {
        self.sessions.lock().unwrap().remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
