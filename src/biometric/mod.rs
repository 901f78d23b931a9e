// Biometric capability gate
// The platform's biometric prompt is an opaque collaborator; this module
// wraps it in a small state machine so flows can reason about availability
// and per-invocation outcomes without touching the sensor API.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Whether the device can perform biometric authentication at all
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable(UnavailableReason),
}

/// Why biometrics cannot run on this device. Each reason implies a different
/// remediation (enroll a fingerprint, wait, fall back, abort), so they are
/// reported distinctly rather than collapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// No biometric hardware on the device
    NoHardware,
    /// Hardware exists but is currently unavailable (busy, disabled)
    HardwareUnavailable,
    /// No biometric credential enrolled at the platform level
    NoneEnrolled,
    /// Platform security policy blocks biometrics until updated
    SecurityUpdateRequired,
    /// Biometric authentication unsupported by the platform build
    Unsupported,
    /// Status could not be determined
    Unknown,
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnavailableReason::NoHardware => write!(f, "no biometric hardware"),
            UnavailableReason::HardwareUnavailable => write!(f, "biometric hardware unavailable"),
            UnavailableReason::NoneEnrolled => write!(f, "no biometric credential enrolled"),
            UnavailableReason::SecurityUpdateRequired => write!(f, "security update required"),
            UnavailableReason::Unsupported => write!(f, "biometric authentication unsupported"),
            UnavailableReason::Unknown => write!(f, "biometric status unknown"),
        }
    }
}

/// Terminal outcome of a single prompt invocation. `Failed` is a plain
/// no-match; `Error` carries a platform reason (lockout, canceled, sensor
/// fault). Neither ends the enclosing flow: the caller may re-invoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BiometricOutcome {
    Succeeded,
    Failed,
    Error { code: i32, message: String },
}

/// Opaque platform biometric capability. `invoke` runs one prompt and
/// produces exactly one terminal outcome.
#[async_trait]
pub trait BiometricCapability: Send + Sync {
    async fn check_available(&self) -> Availability;

    async fn invoke(&self) -> BiometricOutcome;
}

/// Gate state as observed by the flows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    NotChecked,
    Available,
    Unavailable(UnavailableReason),
}

/// Thin state wrapper around a `BiometricCapability`.
pub struct BiometricGate {
    capability: Arc<dyn BiometricCapability>,
    state: GateState,
    last_outcome: Option<BiometricOutcome>,
}

impl BiometricGate {
    pub fn new(capability: Arc<dyn BiometricCapability>) -> Self {
        Self {
            capability,
            state: GateState::NotChecked,
            last_outcome: None,
        }
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    pub fn last_outcome(&self) -> Option<&BiometricOutcome> {
        self.last_outcome.as_ref()
    }

    /// Resolve availability. Idempotent; re-checking refreshes the state.
    pub async fn check(&mut self) -> GateState {
        self.state = match self.capability.check_available().await {
            Availability::Available => GateState::Available,
            Availability::Unavailable(reason) => {
                warn!(%reason, "biometric capability unavailable");
                GateState::Unavailable(reason)
            }
        };
        self.state.clone()
    }

    /// Run one prompt invocation. Checks availability first if the caller
    /// has not; returns the unavailability reason as an error in that case.
    pub async fn invoke(&mut self) -> Result<BiometricOutcome, UnavailableReason> {
        if self.state == GateState::NotChecked {
            self.check().await;
        }

        if let GateState::Unavailable(reason) = &self.state {
            return Err(reason.clone());
        }

        let outcome = self.capability.invoke().await;
        debug!(?outcome, "biometric prompt resolved");
        self.last_outcome = Some(outcome.clone());
        Ok(outcome)
    }
}

/// Scripted capability for tests: plays back a fixed availability and a
/// sequence of outcomes, one per invocation.
pub struct ScriptedBiometric {
    availability: Availability,
    outcomes: std::sync::Mutex<std::collections::VecDeque<BiometricOutcome>>,
}

impl ScriptedBiometric {
    pub fn available(outcomes: Vec<BiometricOutcome>) -> Self {
        Self {
            availability: Availability::Available,
            outcomes: std::sync::Mutex::new(outcomes.into()),
        }
    }

    pub fn unavailable(reason: UnavailableReason) -> Self {
        Self {
            availability: Availability::Unavailable(reason),
            outcomes: std::sync::Mutex::new(std::collections::VecDeque::new()),
        }
    }
}

#[async_trait]
impl BiometricCapability for ScriptedBiometric {
    async fn check_available(&self) -> Availability {
        self.availability.clone()
    }

    async fn invoke(&self) -> BiometricOutcome {
        self.outcomes
            .lock()
            .expect("outcome script poisoned")
            .pop_front()
            .unwrap_or(BiometricOutcome::Failed)
    }
}
