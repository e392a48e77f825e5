//! Cancellation and timeouts around long-running futures.

use dbsync_core::session::ExecOptions;
use dbsync_core::{Result, SyncError};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs `work` until it finishes, `options.cancel` fires or
/// `options.timeout` elapses, whichever comes first.
///
/// Dropping `work` on cancellation is what stops it, so futures that own
/// child processes should spawn them with `kill_on_drop`.
pub async fn supervise<F, T>(operation: &str, options: &ExecOptions, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let bounded = async {
        match options.timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| SyncError::Timeout {
                    operation: operation.to_string(),
                    seconds: limit.as_secs(),
                })?,
            None => work.await,
        }
    };

    tokio::select! {
        biased;
        _ = options.cancel.cancelled() => Err(SyncError::cancelled(operation)),
        result = bounded => result,
    }
}

/// Sleeps for `delay` unless cancelled first.
pub async fn pause(delay: Duration, cancel: &CancellationToken, operation: &str) -> Result<()> {
    if delay.is_zero() {
        return if cancel.is_cancelled() {
            Err(SyncError::cancelled(operation))
        } else {
            Ok(())
        };
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::cancelled(operation)),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_supervise_passes_through_result() {
        let options = ExecOptions::default();
        let value = supervise("noop", &options, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_supervise_cancelled() {
        let cancel = CancellationToken::new();
        let options = ExecOptions::new(cancel.clone());
        cancel.cancel();
        let err = supervise("dump", &options, std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::cancelled("dump"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervise_timeout() {
        let options = ExecOptions::default().with_timeout(Some(Duration::from_secs(5)));
        let err = supervise("dump", &options, std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Timeout { seconds: 5, .. }));
    }

    #[tokio::test]
    async fn test_pause_zero_delay_respects_cancel() {
        let cancel = CancellationToken::new();
        assert!(pause(Duration::ZERO, &cancel, "x").await.is_ok());
        cancel.cancel();
        assert!(pause(Duration::ZERO, &cancel, "x").await.is_err());
    }
}
