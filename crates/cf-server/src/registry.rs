//! In-memory registry of live ingestion sessions.
//!
//! The registry holds only descriptive metadata (id, display name, start
//! time). Encoder handles stay with the session task that owns them, so no
//! lock here is ever held across process or filesystem I/O.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use cf_core::SessionId;

/// Display name used until the client sends a control frame.
pub const DEFAULT_STREAM_NAME: &str = "Untitled Stream";

/// One registered live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEntry {
    pub id: SessionId,
    pub name: String,
    pub started_at: DateTime<Utc>,
}

impl LiveEntry {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            name: DEFAULT_STREAM_NAME.to_string(),
            started_at: Utc::now(),
        }
    }
}

/// Concurrent map of active sessions shared by ingestion and HTTP handlers.
#[derive(Debug, Default)]
pub struct LiveRegistry {
    sessions: RwLock<HashMap<SessionId, LiveEntry>>,
}

impl LiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session unless `max_sessions` are already registered.
    ///
    /// The capacity check and the insertion happen under one write lock.
    pub fn try_register(&self, entry: LiveEntry, max_sessions: usize) -> cf_core::Result<()> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= max_sessions {
            return Err(cf_core::Error::Unavailable(format!(
                "live session limit of {max_sessions} reached"
            )));
        }
        if sessions.contains_key(&entry.id) {
            return Err(cf_core::Error::Internal(format!(
                "session {} is already registered",
                entry.id
            )));
        }
        sessions.insert(entry.id, entry);
        Ok(())
    }

    /// Update a session's display name. Returns `false` if it is not registered.
    pub fn rename(&self, id: SessionId, name: impl Into<String>) -> bool {
        match self.sessions.write().get_mut(&id) {
            Some(entry) => {
                entry.name = name.into();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: SessionId) -> Option<LiveEntry> {
        self.sessions.write().remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<LiveEntry> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Copy of every entry, oldest session first.
    pub fn snapshot(&self) -> Vec<LiveEntry> {
        let mut entries: Vec<LiveEntry> = self.sessions.read().values().cloned().collect();
        entries.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        entries
    }
}
