// In-memory secret store
// Reference implementation for tests and local development. Production
// deployments supply a platform-backed store (encrypted preferences,
// keychain) behind the same trait.

use super::{SecretStore, SecretStoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

pub struct MemorySecretStore {
    values: RwLock<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate a broken persistence layer (inaccessible key material).
    pub fn set_unavailable(&self, broken: bool) {
        self.unavailable.store(broken, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), SecretStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(SecretStoreError::Unavailable(
                "key material inaccessible".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), SecretStoreError> {
        self.check_available()?;
        let mut values = self.values.write().await;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SecretStoreError> {
        self.check_available()?;
        let values = self.values.read().await;
        Ok(values.get(key).cloned())
    }

    async fn contains(&self, key: &str) -> Result<bool, SecretStoreError> {
        self.check_available()?;
        let values = self.values.read().await;
        Ok(values.contains_key(key))
    }
}
