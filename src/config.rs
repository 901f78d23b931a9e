// Flow tuning knobs

/// Handshake configuration
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Bound on each remote round trip (pending lookup, status write)
    pub remote_timeout_secs: u64,
    /// Maximum PIN attempts per handshake before lockout. `None` keeps the
    /// historical behavior of unbounded attempts.
    pub max_pin_attempts: Option<u32>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            remote_timeout_secs: 30,
            max_pin_attempts: None,
        }
    }
}

/// PIN format policy: exact length, digits only
pub const PIN_LENGTH: usize = 6;

/// Whether a candidate satisfies the PIN format.
pub fn pin_format_valid(pin: &str) -> bool {
    pin.len() == PIN_LENGTH && pin.chars().all(|c| c.is_ascii_digit())
}
