//! Execution plumbing shared by the infrastructure and application layers:
//! retry with backoff, cancellation and timeouts, and event streaming.

pub mod retry;
pub mod supervise;
pub mod tracing_layer;

pub use retry::{
    OperationClass, RetryConfig, RetryDecision, RetryPolicy, RetryState, RetryTracker,
    RetryableOperation,
};
pub use supervise::{pause, supervise};
pub use tracing_layer::{SyncEvent, SyncEventLayer};
