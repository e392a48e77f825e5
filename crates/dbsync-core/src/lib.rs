//! Domain types for dbsync: profiles, selections, engine capabilities,
//! artifacts, command planning and the traits the outer layers implement.

pub mod artifact;
pub mod command;
pub mod engine;
pub mod error;
pub mod plan;
pub mod profile;
pub mod selection;
pub mod session;

// Re-export common error type
pub use error::{Result, SyncError};
