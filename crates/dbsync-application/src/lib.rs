//! Application layer for dbsync.
//!
//! Coordinates sessions, capability detection, planning, transfers and
//! imports into the backup and restore operations of [`SyncService`].

pub mod detector;
pub mod outcome;
pub mod session_slot;
pub mod sync_service;
pub mod transfer;

pub use detector::{CapabilityDetector, QueryRunner};
pub use outcome::{BackupOutcome, CleanupReport, PushOutcome, RestoreOutcome};
pub use sync_service::SyncService;
pub use transfer::TransferManager;
