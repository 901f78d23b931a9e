// Login session records shared with the primary application

pub mod store;
pub mod types;

pub use store::{MemorySessionStore, SessionStore, SessionStoreError};
pub use types::{LoginSession, SessionStatus};
