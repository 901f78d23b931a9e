// Session types and data structures
// A login session is created by the primary (web) application when a login is
// attempted; this core only reads it and resolves its status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Login session status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting for the companion device to approve or reject
    Pending,
    /// Approved: PIN matched and biometric succeeded, in that order
    Authenticated,
    /// Rejected or expired by policy
    Failed,
}

/// A cross-device login approval request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginSession {
    /// Unique session identifier (document id in the remote store)
    pub id: String,
    /// Identity of the account owner who attempted the login
    pub owner_identity: String,
    /// Current approval status
    pub status: SessionStatus,
    /// When the primary application created the session
    pub created_at: DateTime<Utc>,
}

impl LoginSession {
    /// Build a fresh pending session the way the primary application does.
    /// Provided for store implementations and test fixtures; the core itself
    /// never creates sessions.
    pub fn pending(owner_identity: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_identity: owner_identity.to_string(),
            status: SessionStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == SessionStatus::Pending
    }
}
