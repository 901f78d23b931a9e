// One-time device enrollment: backup codes -> biometric -> PIN

pub mod data;
pub mod flow;

pub use data::{EnrollmentDataError, EnrollmentDataStore, MemoryEnrollmentStore};
pub use flow::{EnrollmentError, EnrollmentFlow, EnrollmentState};
