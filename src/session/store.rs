// Remote session store abstraction
// The shared record collection lives with the primary application; this core
// queries pending sessions by owner and writes status transitions, nothing
// else. The in-memory implementation backs tests and local development.

use super::types::{LoginSession, SessionStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Session store errors
#[derive(Debug, Clone)]
pub enum SessionStoreError {
    NotFound,
    ConnectionError(String),
    InvalidData(String),
}

impl std::fmt::Display for SessionStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStoreError::NotFound => write!(f, "Session not found"),
            SessionStoreError::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            SessionStoreError::InvalidData(msg) => write!(f, "Invalid session data: {}", msg),
        }
    }
}

impl std::error::Error for SessionStoreError {}

/// Keyed access to the shared login-session collection
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// All sessions for the owner that are still pending. May return more
    /// than one; callers decide the tie-break.
    async fn find_pending(&self, owner_identity: &str)
    -> Result<Vec<LoginSession>, SessionStoreError>;

    /// Transition a session's status. Re-writing the same status must be a
    /// safe no-op so interrupted writes can be retried.
    async fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), SessionStoreError>;
}

/// In-memory session store for tests and local development
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, LoginSession>>,
    unavailable: AtomicBool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Insert a session the way the primary application would.
    pub async fn insert(&self, session: LoginSession) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), session);
    }

    pub async fn get(&self, session_id: &str) -> Option<LoginSession> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned()
    }

    /// Simulate a lost connection to the remote store.
    pub fn set_unavailable(&self, broken: bool) {
        self.unavailable.store(broken, Ordering::SeqCst);
    }

    fn check_connected(&self) -> Result<(), SessionStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(SessionStoreError::ConnectionError(
                "remote store unreachable".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_pending(
        &self,
        owner_identity: &str,
    ) -> Result<Vec<LoginSession>, SessionStoreError> {
        self.check_connected()?;
        let sessions = self.sessions.read().await;

        let pending: Vec<LoginSession> = sessions
            .values()
            .filter(|s| s.owner_identity == owner_identity && s.is_pending())
            .cloned()
            .collect();

        debug!(
            owner = owner_identity,
            count = pending.len(),
            "pending session lookup"
        );
        Ok(pending)
    }

    async fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), SessionStoreError> {
        self.check_connected()?;
        let mut sessions = self.sessions.write().await;

        let session = sessions
            .get_mut(session_id)
            .ok_or(SessionStoreError::NotFound)?;

        if session.status == status {
            // Idempotent re-write, e.g. a retried "authenticated" update
            return Ok(());
        }

        debug!(
            session = session_id,
            from = ?session.status,
            to = ?status,
            "session status transition"
        );
        session.status = status;
        Ok(())
    }
}
