// Enrollment data lookup
// The primary application stores each account's salted backup-code digests;
// this core only reads them, and only during enrollment.

use crate::codes::{CODE_COUNT, StoredCode};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Enrollment data errors. Lookup problems are recoverable (the user can
/// retry); connection problems are infrastructure and reported as such.
#[derive(Debug, Clone)]
pub enum EnrollmentDataError {
    /// No record for the identity
    IdentityNotFound,
    /// Record exists but carries no backup codes
    CodesMissing,
    /// Record carries a code set of the wrong size
    WrongCodeCount(usize),
    ConnectionError(String),
}

impl std::fmt::Display for EnrollmentDataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrollmentDataError::IdentityNotFound => write!(f, "Identity not found"),
            EnrollmentDataError::CodesMissing => write!(f, "Backup codes not found"),
            EnrollmentDataError::WrongCodeCount(n) => {
                write!(f, "Expected {} backup codes, found {}", CODE_COUNT, n)
            }
            EnrollmentDataError::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
        }
    }
}

impl std::error::Error for EnrollmentDataError {}

/// Read-only lookup of an identity's stored backup codes
#[async_trait]
pub trait EnrollmentDataStore: Send + Sync {
    async fn fetch_backup_codes(
        &self,
        identity: &str,
    ) -> Result<Vec<StoredCode>, EnrollmentDataError>;
}

/// In-memory enrollment data for tests and local development
pub struct MemoryEnrollmentStore {
    codes: RwLock<HashMap<String, Vec<StoredCode>>>,
}

impl MemoryEnrollmentStore {
    pub fn new() -> Self {
        Self {
            codes: RwLock::new(HashMap::new()),
        }
    }

    /// Seed an identity's code set, as the primary application would at
    /// registration time.
    pub async fn seed(&self, identity: &str, stored: Vec<StoredCode>) {
        let mut codes = self.codes.write().await;
        codes.insert(identity.to_string(), stored);
    }
}

impl Default for MemoryEnrollmentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnrollmentDataStore for MemoryEnrollmentStore {
    async fn fetch_backup_codes(
        &self,
        identity: &str,
    ) -> Result<Vec<StoredCode>, EnrollmentDataError> {
        let codes = self.codes.read().await;
        let stored = codes
            .get(identity)
            .ok_or(EnrollmentDataError::IdentityNotFound)?;

        if stored.is_empty() {
            return Err(EnrollmentDataError::CodesMissing);
        }
        if stored.len() != CODE_COUNT {
            return Err(EnrollmentDataError::WrongCodeCount(stored.len()));
        }

        Ok(stored.clone())
    }
}
