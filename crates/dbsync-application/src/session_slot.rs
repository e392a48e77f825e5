//! Holds the remote session for one operation.
//!
//! Remote steps run through [`SessionSlot::run`]. A transport failure
//! closes the session it happened on, so the next attempt starts with a
//! fresh handshake instead of reusing a dead connection.

use dbsync_core::Result;
use dbsync_core::profile::SshEndpoint;
use dbsync_core::session::{RemoteSession, SessionConnector};
use dbsync_execution::{RetryDecision, RetryPolicy, RetryableOperation, pause};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct SessionSlot {
    connector: Arc<dyn SessionConnector>,
    endpoint: SshEndpoint,
    policy: RetryPolicy,
    cancel: CancellationToken,
    current: Mutex<Option<Arc<dyn RemoteSession>>>,
}

impl SessionSlot {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        endpoint: SshEndpoint,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector,
            endpoint,
            policy,
            cancel,
            current: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &str {
        &self.endpoint.host
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The open session, connecting once if there is none.
    async fn acquire(&self) -> Result<Arc<dyn RemoteSession>> {
        let mut current = self.current.lock().await;
        if let Some(session) = current.as_ref() {
            return Ok(session.clone());
        }
        let session = self.connector.open(&self.endpoint).await?;
        *current = Some(session.clone());
        Ok(session)
    }

    /// Drops the current session after a transport failure.
    async fn invalidate(&self) {
        let stale = self.current.lock().await.take();
        if let Some(session) = stale {
            debug!("[Session] Discarding connection to {}", session.host());
            if let Err(err) = session.close().await {
                debug!("[Session] Closing stale connection failed: {}", err);
            }
        }
    }

    /// Connects up front, retrying rejected or unreachable handshakes.
    pub async fn connect(&self) -> Result<()> {
        self.run(&RetryableOperation::auth("ssh connect"), |_| async { Ok(()) })
            .await
    }

    /// Runs `step` against the session, reconnecting and retrying on
    /// network and auth failures as the policy allows.
    pub async fn run<T, F, Fut>(&self, operation: &RetryableOperation, mut step: F) -> Result<T>
    where
        F: FnMut(Arc<dyn RemoteSession>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut tracker = self.policy.tracker(operation);
        loop {
            tracker.attempting();
            let result = match self.acquire().await {
                Ok(session) => step(session).await,
                Err(err) => Err(err),
            };
            let error = match result {
                Ok(value) => {
                    tracker.succeeded();
                    return Ok(value);
                }
                Err(error) => error,
            };
            if error.is_transport_failure() {
                self.invalidate().await;
            }
            match tracker.failed(error) {
                RetryDecision::Retry { delay, .. } => {
                    pause(delay, &self.cancel, operation.name()).await?
                }
                RetryDecision::GiveUp(error) => return Err(error),
            }
        }
    }

    /// Closes the session if one is open. Safe to call repeatedly.
    pub async fn close(&self) {
        let session = self.current.lock().await.take();
        if let Some(session) = session {
            if let Err(err) = session.close().await {
                warn!(
                    "[Session] Failed to close connection to {}: {}",
                    session.host(),
                    err
                );
            }
        }
    }
}
