// Local secret storage for the device PIN
// The platform supplies a confidentiality-protected key/value store (e.g.
// encrypted preferences backed by hardware key material); this module owns
// the PIN key and the comparison contract on top of it.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Key under which the enrolled PIN is persisted
pub const PIN_KEY: &str = "pin";

/// Confidentiality-protected key/value persistence supplied by the platform.
/// Values must survive process restart and must not be readable by other
/// principals on the device.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> Result<(), SecretStoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, SecretStoreError>;

    async fn contains(&self, key: &str) -> Result<bool, SecretStoreError>;
}

/// Secret store errors. `Unavailable` means the persistence layer itself is
/// broken (key material inaccessible, backing file unreadable) and must never
/// be conflated with "no value set", which is `Ok(None)` from `get`.
#[derive(Debug, Clone)]
pub enum SecretStoreError {
    Unavailable(String),
}

impl std::fmt::Display for SecretStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretStoreError::Unavailable(msg) => write!(f, "Secret store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for SecretStoreError {}

/// High-level PIN access over a `SecretStore`.
///
/// Callers validate PIN format before `set_pin` (see the enrollment flow);
/// the vault only persists and compares. `matches` never exposes the stored
/// value, only whether the candidate equals it.
#[derive(Clone)]
pub struct PinVault {
    store: Arc<dyn SecretStore>,
}

impl PinVault {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Persist the PIN. Overwrites any previously set PIN.
    pub async fn set_pin(&self, pin: &str) -> Result<(), SecretStoreError> {
        self.store.put(PIN_KEY, pin).await?;
        debug!("PIN persisted to secret store");
        Ok(())
    }

    /// Whether a PIN has been enrolled on this device.
    pub async fn pin_is_set(&self) -> Result<bool, SecretStoreError> {
        self.store.contains(PIN_KEY).await
    }

    /// Compare a candidate against the stored PIN. Absent never matches,
    /// for any candidate including the empty string.
    pub async fn matches(&self, candidate: &str) -> Result<bool, SecretStoreError> {
        match self.store.get(PIN_KEY).await? {
            Some(stored) => Ok(stored == candidate),
            None => {
                warn!("PIN comparison attempted with no PIN enrolled");
                Ok(false)
            }
        }
    }
}
