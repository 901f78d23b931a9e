// Login handshake state machine
// Correlates a pending remote session with a locally verified PIN and a
// biometric confirmation, then resolves the session. The status write to
// `authenticated` is the single external side effect the primary application
// observes; infrastructure failures are always reported as such, never
// disguised as credential rejections.

use crate::biometric::{BiometricGate, BiometricOutcome, UnavailableReason};
use crate::config::HandshakeConfig;
use crate::registry::{FlowGuard, FlowInProgress, FlowKind, FlowRegistry};
use crate::secret::PinVault;
use crate::session::{LoginSession, SessionStatus, SessionStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Handshake progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingPinEntry,
    AwaitingBiometric,
    Resolved(HandshakeOutcome),
}

/// Terminal and per-attempt outcomes reported to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// No pending session exists for the identity; nothing to approve
    NoPendingSession,
    /// Entered PIN did not match; the session stays pending for retry
    PinRejected,
    /// PIN attempt limit reached; the session was marked failed
    LockedOut,
    /// Biometric prompt failed or errored; session untouched, retryable
    BiometricRejected { platform_error: Option<String> },
    /// Biometric capability cannot run on this device
    BiometricUnavailable(UnavailableReason),
    /// Session resolved: the primary application may complete its login
    Authenticated,
    /// Local secret store is broken (distinct from "no PIN set")
    StoreUnavailable(String),
    /// Pending-session lookup failed at the remote store
    SessionLookupFailed(String),
    /// The `authenticated` status write failed; retryable without
    /// re-running biometrics
    SessionWriteFailed(String),
    /// A remote round trip exceeded the configured bound
    TimedOut,
}

/// Handshake precondition and sequencing errors
#[derive(Debug)]
pub enum HandshakeError {
    /// No PIN is enrolled on this device; enrollment must run first
    SetupIncomplete,
    /// Another handshake is already running for this identity
    AlreadyInProgress(FlowInProgress),
    /// A step was driven out of order
    OutOfOrder {
        expected: HandshakeState,
        actual: HandshakeState,
    },
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeError::SetupIncomplete => {
                write!(f, "Device setup incomplete: no PIN enrolled")
            }
            HandshakeError::AlreadyInProgress(e) => write!(f, "{}", e),
            HandshakeError::OutOfOrder { expected, actual } => {
                write!(f, "Handshake step out of order: expected {:?}, in {:?}", expected, actual)
            }
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Drives one login approval attempt for an identity
pub struct LoginHandshake {
    sessions: Arc<dyn SessionStore>,
    vault: PinVault,
    gate: BiometricGate,
    registry: FlowRegistry,
    config: HandshakeConfig,
    state: HandshakeState,
    session: Option<LoginSession>,
    /// Biometric already succeeded; only the status write remains
    write_pending: bool,
    _slot: Option<FlowGuard>,
}

impl LoginHandshake {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        vault: PinVault,
        gate: BiometricGate,
        registry: FlowRegistry,
        config: HandshakeConfig,
    ) -> Self {
        Self {
            sessions,
            vault,
            gate,
            registry,
            config,
            state: HandshakeState::Idle,
            session: None,
            write_pending: false,
            _slot: None,
        }
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// The session this handshake is resolving, once located.
    pub fn session(&self) -> Option<&LoginSession> {
        self.session.as_ref()
    }

    fn require_state(&self, expected: HandshakeState) -> Result<(), HandshakeError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(HandshakeError::OutOfOrder {
                expected,
                actual: self.state.clone(),
            })
        }
    }

    fn resolve(&mut self, outcome: HandshakeOutcome) -> HandshakeState {
        self.state = HandshakeState::Resolved(outcome);
        self.state.clone()
    }

    async fn bounded<F, T>(&self, fut: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(Duration::from_secs(self.config.remote_timeout_secs), fut)
            .await
            .ok()
    }

    /// Locate the pending session for the identity. Requires an enrolled PIN;
    /// a device that never completed enrollment is routed back to setup.
    ///
    /// When several sessions are pending, the most recently created wins.
    pub async fn begin(&mut self, identity: &str) -> Result<HandshakeState, HandshakeError> {
        self.require_state(HandshakeState::Idle)?;

        match self.vault.pin_is_set().await {
            Ok(true) => {}
            Ok(false) => return Err(HandshakeError::SetupIncomplete),
            Err(e) => return Ok(self.resolve(HandshakeOutcome::StoreUnavailable(e.to_string()))),
        }

        let slot = self
            .registry
            .begin(FlowKind::Handshake, identity)
            .map_err(HandshakeError::AlreadyInProgress)?;
        self._slot = Some(slot);

        let lookup = match self.bounded(self.sessions.find_pending(identity)).await {
            Some(result) => result,
            None => {
                warn!(identity, "pending session lookup timed out");
                return Ok(self.resolve(HandshakeOutcome::TimedOut));
            }
        };

        let mut pending = match lookup {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(identity, error = %e, "pending session lookup failed");
                return Ok(self.resolve(HandshakeOutcome::SessionLookupFailed(e.to_string())));
            }
        };

        if pending.is_empty() {
            info!(identity, "no pending login session");
            return Ok(self.resolve(HandshakeOutcome::NoPendingSession));
        }

        if pending.len() > 1 {
            warn!(
                identity,
                count = pending.len(),
                "multiple pending sessions; taking the most recent"
            );
        }
        pending.sort_by_key(|s| s.created_at);
        self.session = pending.pop();
        self.state = HandshakeState::AwaitingPinEntry;
        Ok(self.state.clone())
    }

    /// Check the entered PIN against the vault. A mismatch resolves this
    /// attempt as `PinRejected` and leaves the session pending; with a
    /// configured attempt limit, exhausting it marks the session failed.
    pub async fn submit_pin(&mut self, entered: &str) -> Result<HandshakeState, HandshakeError> {
        self.require_state(HandshakeState::AwaitingPinEntry)?;

        let matched = match self.vault.matches(entered).await {
            Ok(matched) => matched,
            Err(e) => return Ok(self.resolve(HandshakeOutcome::StoreUnavailable(e.to_string()))),
        };

        let session_id = self
            .session
            .as_ref()
            .map(|s| s.id.clone())
            .unwrap_or_default();

        if !matched {
            if let Some(limit) = self.config.max_pin_attempts {
                let failures = self.registry.record_pin_failure(&session_id);
                if failures >= limit {
                    warn!(session = %session_id, failures, "PIN attempt limit reached");
                    // Best effort; the lockout stands even if the write fails
                    if let Some(Ok(())) = self
                        .bounded(self.sessions.update_status(&session_id, SessionStatus::Failed))
                        .await
                    {
                        self.registry.clear_pin_failures(&session_id);
                    }
                    return Ok(self.resolve(HandshakeOutcome::LockedOut));
                }
            }
            info!(session = %session_id, "PIN rejected");
            return Ok(self.resolve(HandshakeOutcome::PinRejected));
        }

        self.registry.clear_pin_failures(&session_id);
        self.state = HandshakeState::AwaitingBiometric;
        Ok(self.state.clone())
    }

    /// Run the biometric prompt and, on success, write the session to
    /// `authenticated`. `Failed`/`Error` outcomes leave the session pending
    /// and the state unchanged so the prompt can be retried. A failed or
    /// timed-out status write is also retryable here without re-running the
    /// prompt.
    pub async fn confirm_biometric(&mut self) -> Result<HandshakeOutcome, HandshakeError> {
        self.require_state(HandshakeState::AwaitingBiometric)?;

        if !self.write_pending {
            match self.gate.invoke().await {
                Ok(BiometricOutcome::Succeeded) => {
                    self.write_pending = true;
                }
                Ok(BiometricOutcome::Failed) => {
                    info!("biometric prompt failed; session left pending");
                    return Ok(HandshakeOutcome::BiometricRejected {
                        platform_error: None,
                    });
                }
                Ok(BiometricOutcome::Error { code, message }) => {
                    warn!(code, %message, "biometric prompt errored; session left pending");
                    return Ok(HandshakeOutcome::BiometricRejected {
                        platform_error: Some(message),
                    });
                }
                Err(reason) => {
                    warn!(%reason, "biometric capability unavailable");
                    self.resolve(HandshakeOutcome::BiometricUnavailable(reason.clone()));
                    return Ok(HandshakeOutcome::BiometricUnavailable(reason));
                }
            }
        }

        let session_id = self
            .session
            .as_ref()
            .map(|s| s.id.clone())
            .unwrap_or_default();

        let write = match self
            .bounded(
                self.sessions
                    .update_status(&session_id, SessionStatus::Authenticated),
            )
            .await
        {
            Some(result) => result,
            None => {
                warn!(session = %session_id, "authenticated write timed out; retryable");
                return Ok(HandshakeOutcome::TimedOut);
            }
        };

        match write {
            Ok(()) => {
                info!(session = %session_id, "login session authenticated");
                self.resolve(HandshakeOutcome::Authenticated);
                Ok(HandshakeOutcome::Authenticated)
            }
            Err(e) => {
                warn!(session = %session_id, error = %e, "authenticated write failed; retryable");
                Ok(HandshakeOutcome::SessionWriteFailed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biometric::ScriptedBiometric;
    use crate::secret::memory::MemorySecretStore;
    use crate::session::store::SessionStoreError;
    use crate::session::MemorySessionStore;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        sessions: Arc<MemorySessionStore>,
        secret: Arc<MemorySecretStore>,
        registry: FlowRegistry,
    }

    async fn fixture_with_pin() -> Fixture {
        let secret = Arc::new(MemorySecretStore::new());
        let vault = PinVault::new(Arc::clone(&secret) as _);
        vault.set_pin("482913").await.unwrap();

        Fixture {
            sessions: Arc::new(MemorySessionStore::new()),
            secret,
            registry: FlowRegistry::new(),
        }
    }

    fn handshake(
        fx: &Fixture,
        outcomes: Vec<BiometricOutcome>,
        config: HandshakeConfig,
    ) -> LoginHandshake {
        LoginHandshake::new(
            Arc::clone(&fx.sessions) as Arc<dyn SessionStore>,
            PinVault::new(Arc::clone(&fx.secret) as _),
            BiometricGate::new(Arc::new(ScriptedBiometric::available(outcomes))),
            fx.registry.clone(),
            config,
        )
    }

    async fn insert_pending(fx: &Fixture, owner: &str) -> String {
        let session = LoginSession::pending(owner);
        let id = session.id.clone();
        fx.sessions.insert(session).await;
        id
    }

    #[tokio::test]
    async fn test_setup_incomplete_without_pin() {
        let fx = fixture_with_pin().await;
        let secret = Arc::new(MemorySecretStore::new());
        let mut flow = LoginHandshake::new(
            Arc::clone(&fx.sessions) as _,
            PinVault::new(secret as _),
            BiometricGate::new(Arc::new(ScriptedBiometric::available(vec![]))),
            fx.registry.clone(),
            HandshakeConfig::default(),
        );

        assert!(matches!(
            flow.begin("user-1").await,
            Err(HandshakeError::SetupIncomplete)
        ));
    }

    #[tokio::test]
    async fn test_no_pending_session_is_a_distinct_outcome() {
        let fx = fixture_with_pin().await;
        let mut flow = handshake(&fx, vec![], HandshakeConfig::default());

        let state = flow.begin("user-1").await.unwrap();
        assert_eq!(
            state,
            HandshakeState::Resolved(HandshakeOutcome::NoPendingSession)
        );
    }

    #[tokio::test]
    async fn test_pin_rejected_leaves_session_pending() {
        let fx = fixture_with_pin().await;
        let id = insert_pending(&fx, "user-1").await;
        let mut flow = handshake(&fx, vec![], HandshakeConfig::default());

        flow.begin("user-1").await.unwrap();
        let state = flow.submit_pin("482914").await.unwrap();

        assert_eq!(state, HandshakeState::Resolved(HandshakeOutcome::PinRejected));
        assert_eq!(
            fx.sessions.get(&id).await.unwrap().status,
            SessionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_biometric_failure_leaves_session_pending_and_retries() {
        let fx = fixture_with_pin().await;
        let id = insert_pending(&fx, "user-1").await;
        let mut flow = handshake(
            &fx,
            vec![BiometricOutcome::Failed, BiometricOutcome::Succeeded],
            HandshakeConfig::default(),
        );

        flow.begin("user-1").await.unwrap();
        flow.submit_pin("482913").await.unwrap();

        let outcome = flow.confirm_biometric().await.unwrap();
        assert_eq!(
            outcome,
            HandshakeOutcome::BiometricRejected {
                platform_error: None
            }
        );
        assert_eq!(*flow.state(), HandshakeState::AwaitingBiometric);
        assert_eq!(
            fx.sessions.get(&id).await.unwrap().status,
            SessionStatus::Pending
        );

        // Retry succeeds without re-entering the PIN
        let outcome = flow.confirm_biometric().await.unwrap();
        assert_eq!(outcome, HandshakeOutcome::Authenticated);
        assert_eq!(
            fx.sessions.get(&id).await.unwrap().status,
            SessionStatus::Authenticated
        );
    }

    #[tokio::test]
    async fn test_biometric_error_carries_platform_reason() {
        let fx = fixture_with_pin().await;
        insert_pending(&fx, "user-1").await;
        let mut flow = handshake(
            &fx,
            vec![BiometricOutcome::Error {
                code: 5,
                message: "sensor busy".to_string(),
            }],
            HandshakeConfig::default(),
        );

        flow.begin("user-1").await.unwrap();
        flow.submit_pin("482913").await.unwrap();

        let outcome = flow.confirm_biometric().await.unwrap();
        assert_eq!(
            outcome,
            HandshakeOutcome::BiometricRejected {
                platform_error: Some("sensor busy".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_write_failure_is_retryable_without_second_prompt() {
        let fx = fixture_with_pin().await;
        let id = insert_pending(&fx, "user-1").await;
        // Exactly one Succeeded outcome scripted: a second prompt would fail
        let mut flow = handshake(
            &fx,
            vec![BiometricOutcome::Succeeded],
            HandshakeConfig::default(),
        );

        flow.begin("user-1").await.unwrap();
        flow.submit_pin("482913").await.unwrap();

        fx.sessions.set_unavailable(true);
        let outcome = flow.confirm_biometric().await.unwrap();
        assert!(matches!(outcome, HandshakeOutcome::SessionWriteFailed(_)));
        assert_eq!(*flow.state(), HandshakeState::AwaitingBiometric);

        fx.sessions.set_unavailable(false);
        let outcome = flow.confirm_biometric().await.unwrap();
        assert_eq!(outcome, HandshakeOutcome::Authenticated);
        assert_eq!(
            fx.sessions.get(&id).await.unwrap().status,
            SessionStatus::Authenticated
        );
    }

    #[tokio::test]
    async fn test_lookup_failure_is_not_a_rejection() {
        let fx = fixture_with_pin().await;
        insert_pending(&fx, "user-1").await;
        fx.sessions.set_unavailable(true);
        let mut flow = handshake(&fx, vec![], HandshakeConfig::default());

        let state = flow.begin("user-1").await.unwrap();
        assert!(matches!(
            state,
            HandshakeState::Resolved(HandshakeOutcome::SessionLookupFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_broken_secret_store_is_not_a_rejection() {
        let fx = fixture_with_pin().await;
        insert_pending(&fx, "user-1").await;
        let mut flow = handshake(&fx, vec![], HandshakeConfig::default());

        flow.begin("user-1").await.unwrap();
        fx.secret.set_unavailable(true);
        let state = flow.submit_pin("482913").await.unwrap();

        assert!(matches!(
            state,
            HandshakeState::Resolved(HandshakeOutcome::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_most_recent_pending_session_wins() {
        let fx = fixture_with_pin().await;
        let older = LoginSession {
            created_at: Utc::now() - ChronoDuration::seconds(120),
            ..LoginSession::pending("user-1")
        };
        let older_id = older.id.clone();
        fx.sessions.insert(older).await;
        let newer_id = insert_pending(&fx, "user-1").await;

        let mut flow = handshake(
            &fx,
            vec![BiometricOutcome::Succeeded],
            HandshakeConfig::default(),
        );
        flow.begin("user-1").await.unwrap();
        assert_eq!(flow.session().unwrap().id, newer_id);

        flow.submit_pin("482913").await.unwrap();
        flow.confirm_biometric().await.unwrap();

        assert_eq!(
            fx.sessions.get(&newer_id).await.unwrap().status,
            SessionStatus::Authenticated
        );
        assert_eq!(
            fx.sessions.get(&older_id).await.unwrap().status,
            SessionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_lockout_after_configured_attempts() {
        let fx = fixture_with_pin().await;
        let id = insert_pending(&fx, "user-1").await;
        let config = HandshakeConfig {
            max_pin_attempts: Some(3),
            ..Default::default()
        };

        // First two rejections resolve as PinRejected
        for _ in 0..2 {
            let mut flow = handshake(&fx, vec![], config.clone());
            flow.begin("user-1").await.unwrap();
            let state = flow.submit_pin("000000").await.unwrap();
            assert_eq!(
                state,
                HandshakeState::Resolved(HandshakeOutcome::PinRejected)
            );
        }

        // Third rejection trips the lockout and fails the session
        let mut flow = handshake(&fx, vec![], config.clone());
        flow.begin("user-1").await.unwrap();
        let state = flow.submit_pin("000000").await.unwrap();
        assert_eq!(state, HandshakeState::Resolved(HandshakeOutcome::LockedOut));
        assert_eq!(
            fx.sessions.get(&id).await.unwrap().status,
            SessionStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_unbounded_attempts_by_default() {
        let fx = fixture_with_pin().await;
        let id = insert_pending(&fx, "user-1").await;

        for _ in 0..10 {
            let mut flow = handshake(&fx, vec![], HandshakeConfig::default());
            flow.begin("user-1").await.unwrap();
            let state = flow.submit_pin("000000").await.unwrap();
            assert_eq!(
                state,
                HandshakeState::Resolved(HandshakeOutcome::PinRejected)
            );
        }
        assert_eq!(
            fx.sessions.get(&id).await.unwrap().status,
            SessionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_concurrent_handshake_rejected() {
        let fx = fixture_with_pin().await;
        insert_pending(&fx, "user-1").await;

        let mut first = handshake(&fx, vec![], HandshakeConfig::default());
        first.begin("user-1").await.unwrap();

        let mut second = handshake(&fx, vec![], HandshakeConfig::default());
        assert!(matches!(
            second.begin("user-1").await,
            Err(HandshakeError::AlreadyInProgress(_))
        ));
    }

    #[tokio::test]
    async fn test_steps_out_of_order() {
        let fx = fixture_with_pin().await;
        let mut flow = handshake(&fx, vec![], HandshakeConfig::default());

        assert!(matches!(
            flow.submit_pin("482913").await,
            Err(HandshakeError::OutOfOrder { .. })
        ));
        assert!(matches!(
            flow.confirm_biometric().await,
            Err(HandshakeError::OutOfOrder { .. })
        ));
    }

    /// Store whose operations hang long enough to trip the timeout bound.
    struct StalledSessionStore;

    #[async_trait]
    impl SessionStore for StalledSessionStore {
        async fn find_pending(
            &self,
            _owner_identity: &str,
        ) -> Result<Vec<LoginSession>, SessionStoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }

        async fn update_status(
            &self,
            _session_id: &str,
            _status: SessionStatus,
        ) -> Result<(), SessionStoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_lookup_timeout() {
        let secret = Arc::new(MemorySecretStore::new());
        let vault = PinVault::new(Arc::clone(&secret) as _);
        vault.set_pin("482913").await.unwrap();

        let mut flow = LoginHandshake::new(
            Arc::new(StalledSessionStore),
            PinVault::new(secret as _),
            BiometricGate::new(Arc::new(ScriptedBiometric::available(vec![]))),
            FlowRegistry::new(),
            HandshakeConfig {
                remote_timeout_secs: 1,
                ..Default::default()
            },
        );

        let state = flow.begin("user-1").await.unwrap();
        assert_eq!(state, HandshakeState::Resolved(HandshakeOutcome::TimedOut));
    }

    /// Store with a working lookup whose first status write stalls past the
    /// timeout bound; later writes land normally.
    struct StalledWriteStore {
        session: LoginSession,
        stall_next_write: AtomicBool,
        written: StdMutex<Option<SessionStatus>>,
    }

    #[async_trait]
    impl SessionStore for StalledWriteStore {
        async fn find_pending(
            &self,
            _owner_identity: &str,
        ) -> Result<Vec<LoginSession>, SessionStoreError> {
            Ok(vec![self.session.clone()])
        }

        async fn update_status(
            &self,
            _session_id: &str,
            status: SessionStatus,
        ) -> Result<(), SessionStoreError> {
            if self.stall_next_write.swap(false, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            *self.written.lock().unwrap() = Some(status);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_timeout_is_retryable_without_second_prompt() {
        let secret = Arc::new(MemorySecretStore::new());
        let vault = PinVault::new(Arc::clone(&secret) as _);
        vault.set_pin("482913").await.unwrap();

        let store = Arc::new(StalledWriteStore {
            session: LoginSession::pending("user-1"),
            stall_next_write: AtomicBool::new(true),
            written: StdMutex::new(None),
        });
        // Exactly one Succeeded outcome scripted: a second prompt would fail
        let mut flow = LoginHandshake::new(
            Arc::clone(&store) as Arc<dyn SessionStore>,
            PinVault::new(secret as _),
            BiometricGate::new(Arc::new(ScriptedBiometric::available(vec![
                BiometricOutcome::Succeeded,
            ]))),
            FlowRegistry::new(),
            HandshakeConfig {
                remote_timeout_secs: 1,
                ..Default::default()
            },
        );

        flow.begin("user-1").await.unwrap();
        flow.submit_pin("482913").await.unwrap();

        let outcome = flow.confirm_biometric().await.unwrap();
        assert_eq!(outcome, HandshakeOutcome::TimedOut);
        assert_eq!(*flow.state(), HandshakeState::AwaitingBiometric);
        assert_eq!(*store.written.lock().unwrap(), None);

        let outcome = flow.confirm_biometric().await.unwrap();
        assert_eq!(outcome, HandshakeOutcome::Authenticated);
        assert_eq!(
            *store.written.lock().unwrap(),
            Some(SessionStatus::Authenticated)
        );
    }
}

