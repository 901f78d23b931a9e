// Per-login approval handshake: pending session -> PIN -> biometric -> resolve

pub mod flow;

pub use flow::{HandshakeError, HandshakeOutcome, HandshakeState, LoginHandshake};
