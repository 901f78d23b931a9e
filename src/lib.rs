// Second-device login approval core
// A primary (web) application creates a pending login session; this library
// drives the companion device through one-time enrollment (backup codes ->
// biometric -> PIN) and the per-login handshake (PIN -> biometric -> session
// resolution). Presentation and platform collaborators plug in behind traits.

pub mod biometric;
pub mod codes;
pub mod config;
pub mod enrollment;
pub mod handshake;
pub mod registry;
pub mod secret;
pub mod session;
