// Single-flight guard for per-identity flows
// At most one enrollment and one handshake may run per identity at a time;
// a second begin for the same identity is rejected rather than interleaved.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Kind of flow being guarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    Enrollment,
    Handshake,
}

/// Returned when a flow of the same kind is already active for the identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowInProgress {
    pub kind: FlowKind,
    pub identity: String,
}

impl std::fmt::Display for FlowInProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} flow already in progress for identity {}",
            self.kind, self.identity
        )
    }
}

impl std::error::Error for FlowInProgress {}

/// Registry of active flows, shared across the process. Also tracks PIN
/// failures per session so an optional lockout limit can span handshake
/// attempts (each PIN rejection resolves its handshake instance).
#[derive(Clone, Default)]
pub struct FlowRegistry {
    active: Arc<Mutex<HashSet<(FlowKind, String)>>>,
    pin_failures: Arc<Mutex<HashMap<String, PinFailures>>>,
}

#[derive(Debug, Clone, Copy)]
struct PinFailures {
    count: u32,
    last_failure: DateTime<Utc>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the (kind, identity) slot. The returned guard releases the slot
    /// when dropped, so a flow that errors out never wedges its identity.
    pub fn begin(&self, kind: FlowKind, identity: &str) -> Result<FlowGuard, FlowInProgress> {
        let key = (kind, identity.to_string());
        let mut active = self.active.lock().expect("flow registry poisoned");

        if !active.insert(key.clone()) {
            return Err(FlowInProgress {
                kind,
                identity: identity.to_string(),
            });
        }

        debug!(?kind, identity, "flow slot claimed");
        Ok(FlowGuard {
            registry: Arc::clone(&self.active),
            key,
        })
    }

    /// Record a PIN failure against a session and return the running count.
    pub fn record_pin_failure(&self, session_id: &str) -> u32 {
        let mut failures = self.pin_failures.lock().expect("flow registry poisoned");
        let entry = failures
            .entry(session_id.to_string())
            .or_insert(PinFailures {
                count: 0,
                last_failure: Utc::now(),
            });
        entry.count += 1;
        entry.last_failure = Utc::now();
        entry.count
    }

    /// Forget a session's PIN failures (on success or session resolution).
    pub fn clear_pin_failures(&self, session_id: &str) {
        let mut failures = self.pin_failures.lock().expect("flow registry poisoned");
        failures.remove(session_id);
    }

    /// Drop failure counters whose last failure is older than `max_age`.
    /// Abandoned sessions never call `clear_pin_failures`, so the embedding
    /// application should run this periodically. Returns the number removed.
    pub fn cleanup_stale_pin_failures(&self, max_age: Duration) -> usize {
        let mut failures = self.pin_failures.lock().expect("flow registry poisoned");
        let cutoff = Utc::now() - max_age;
        let before = failures.len();
        failures.retain(|_, entry| entry.last_failure > cutoff);
        let removed = before - failures.len();
        if removed > 0 {
            debug!(removed, "stale PIN failure counters dropped");
        }
        removed
    }
}

/// Releases its registry slot on drop
#[derive(Debug)]
pub struct FlowGuard {
    registry: Arc<Mutex<HashSet<(FlowKind, String)>>>,
    key: (FlowKind, String),
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.registry.lock() {
            active.remove(&self.key);
        }
    }
}
