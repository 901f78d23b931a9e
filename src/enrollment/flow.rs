// Enrollment state machine
// Forced order, no skipping: identity -> backup codes -> biometric -> PIN.
// Recoverable failures leave the state unchanged so the user can retry the
// same step; only an unavailable biometric capability blocks the device.

use crate::biometric::{BiometricGate, BiometricOutcome, UnavailableReason};
use crate::codes;
use crate::config::pin_format_valid;
use crate::enrollment::data::{EnrollmentDataError, EnrollmentDataStore};
use crate::registry::{FlowGuard, FlowInProgress, FlowKind, FlowRegistry};
use crate::secret::{PinVault, SecretStoreError};
use std::sync::Arc;
use tracing::{info, warn};

/// Enrollment progress, in forced order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    AwaitingIdentity,
    AwaitingBackupCodes,
    AwaitingBiometricConfirmation,
    AwaitingPin,
    Complete,
}

/// Enrollment step failures
#[derive(Debug)]
pub enum EnrollmentError {
    /// A step was driven out of order
    OutOfOrder {
        expected: EnrollmentState,
        actual: EnrollmentState,
    },
    /// Another enrollment is already running for this identity
    AlreadyInProgress(FlowInProgress),
    /// Backup code lookup failed; retryable
    CodeLookup(EnrollmentDataError),
    /// The entered set does not contain exactly twelve codes; retryable
    WrongEntryCount(usize),
    /// Entered codes did not all match their stored digests; retryable
    CodesRejected,
    /// Biometric prompt did not succeed; retryable
    BiometricRejected(BiometricOutcome),
    /// Biometrics cannot run on this device; enrollment cannot proceed here
    BiometricUnavailable(UnavailableReason),
    /// PIN is not exactly six digits; retryable
    InvalidPinFormat,
    /// PIN and confirmation differ; retryable
    PinConfirmationMismatch,
    /// PIN could not be persisted; the PIN is not considered set
    Store(SecretStoreError),
}

impl std::fmt::Display for EnrollmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrollmentError::OutOfOrder { expected, actual } => {
                write!(f, "Enrollment step out of order: expected {:?}, in {:?}", expected, actual)
            }
            EnrollmentError::AlreadyInProgress(e) => write!(f, "{}", e),
            EnrollmentError::CodeLookup(e) => write!(f, "Backup code lookup failed: {}", e),
            EnrollmentError::WrongEntryCount(n) => {
                write!(f, "Expected {} backup codes, got {}", codes::CODE_COUNT, n)
            }
            EnrollmentError::CodesRejected => write!(f, "Backup code verification failed"),
            EnrollmentError::BiometricRejected(outcome) => {
                write!(f, "Biometric confirmation did not succeed: {:?}", outcome)
            }
            EnrollmentError::BiometricUnavailable(reason) => {
                write!(f, "Biometric capability unavailable: {}", reason)
            }
            EnrollmentError::InvalidPinFormat => write!(f, "PIN must be exactly six digits"),
            EnrollmentError::PinConfirmationMismatch => write!(f, "PIN confirmation does not match"),
            EnrollmentError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for EnrollmentError {}

/// Drives a single identity through enrollment
pub struct EnrollmentFlow {
    data: Arc<dyn EnrollmentDataStore>,
    gate: BiometricGate,
    vault: PinVault,
    registry: FlowRegistry,
    state: EnrollmentState,
    identity: Option<String>,
    _slot: Option<FlowGuard>,
}

impl EnrollmentFlow {
    pub fn new(
        data: Arc<dyn EnrollmentDataStore>,
        gate: BiometricGate,
        vault: PinVault,
        registry: FlowRegistry,
    ) -> Self {
        Self {
            data,
            gate,
            vault,
            registry,
            state: EnrollmentState::AwaitingIdentity,
            identity: None,
            _slot: None,
        }
    }

    pub fn state(&self) -> EnrollmentState {
        self.state
    }

    /// Whether this device already holds an enrolled PIN. The login handshake
    /// requires this; enrollment is its precondition, not a convenience.
    pub async fn setup_complete(vault: &PinVault) -> Result<bool, SecretStoreError> {
        vault.pin_is_set().await
    }

    fn require_state(&self, expected: EnrollmentState) -> Result<(), EnrollmentError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(EnrollmentError::OutOfOrder {
                expected,
                actual: self.state,
            })
        }
    }

    /// Accept the identity resolved by the external authentication
    /// collaborator and claim the per-identity enrollment slot.
    pub fn resolve_identity(&mut self, identity: &str) -> Result<(), EnrollmentError> {
        self.require_state(EnrollmentState::AwaitingIdentity)?;

        let slot = self
            .registry
            .begin(FlowKind::Enrollment, identity)
            .map_err(EnrollmentError::AlreadyInProgress)?;

        info!(identity, "enrollment started");
        self.identity = Some(identity.to_string());
        self._slot = Some(slot);
        self.state = EnrollmentState::AwaitingBackupCodes;
        Ok(())
    }

    /// Verify the twelve entered backup codes against the identity's stored
    /// set. A wrong-size entry set is rejected before the lookup; that,
    /// lookup failures, and mismatches all leave the state unchanged.
    pub async fn submit_backup_codes(&mut self, entered: &[String]) -> Result<(), EnrollmentError> {
        self.require_state(EnrollmentState::AwaitingBackupCodes)?;
        let identity = self.identity.as_deref().unwrap_or_default();

        if entered.len() != codes::CODE_COUNT {
            warn!(
                identity,
                entered = entered.len(),
                "backup code submission has the wrong entry count"
            );
            return Err(EnrollmentError::WrongEntryCount(entered.len()));
        }

        let stored = self
            .data
            .fetch_backup_codes(identity)
            .await
            .map_err(EnrollmentError::CodeLookup)?;

        if !codes::verify_all(entered, &stored) {
            warn!(identity, "backup code verification failed");
            return Err(EnrollmentError::CodesRejected);
        }

        info!(identity, "backup codes verified");
        self.state = EnrollmentState::AwaitingBiometricConfirmation;
        Ok(())
    }

    /// Run one biometric prompt. `Failed` and `Error` are retryable and keep
    /// the state; an unavailable capability is a terminal block for this
    /// device, reported with its sub-reason.
    pub async fn confirm_biometric(&mut self) -> Result<(), EnrollmentError> {
        self.require_state(EnrollmentState::AwaitingBiometricConfirmation)?;

        let outcome = self
            .gate
            .invoke()
            .await
            .map_err(EnrollmentError::BiometricUnavailable)?;

        match outcome {
            BiometricOutcome::Succeeded => {
                info!("biometric capability confirmed");
                self.state = EnrollmentState::AwaitingPin;
                Ok(())
            }
            other => Err(EnrollmentError::BiometricRejected(other)),
        }
    }

    /// Validate and persist the PIN. The flow completes only once the vault
    /// write succeeds; any failure here leaves the state at `AwaitingPin`.
    pub async fn submit_pin(&mut self, pin: &str, confirmation: &str) -> Result<(), EnrollmentError> {
        self.require_state(EnrollmentState::AwaitingPin)?;

        if !pin_format_valid(pin) {
            return Err(EnrollmentError::InvalidPinFormat);
        }
        if pin != confirmation {
            return Err(EnrollmentError::PinConfirmationMismatch);
        }

        self.vault
            .set_pin(pin)
            .await
            .map_err(EnrollmentError::Store)?;

        info!("enrollment complete");
        self.state = EnrollmentState::Complete;
        Ok(())
    }
}
