//! Bounded external calls.
//!
//! Every request that leaves the process goes through [`bounded`], which
//! races the request against a deadline and a shutdown token. Callers map
//! [`Interrupted`] into their own error type via `From`.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why an external call did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

/// Run `fut` until it completes, `timeout` elapses, or `cancel` fires.
///
/// Cancellation wins over a simultaneously-ready result so that a tick
/// observed after shutdown never reports success.
pub async fn bounded<F, T>(
    cancel: &CancellationToken,
    timeout: Duration,
    fut: F,
) -> Result<T, Interrupted>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("external call cancelled");
            Err(Interrupted::Cancelled)
        }
        res = tokio::time::timeout(timeout, fut) => match res {
            Ok(value) => Ok(value),
            Err(_) => {
                debug!(?timeout, "external call timed out");
                Err(Interrupted::Timeout(timeout))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_deadline() {
        let token = CancellationToken::new();
        let out = bounded(&token, Duration::from_secs(1), async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out() {
        let token = CancellationToken::new();
        let out = bounded(&token, Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        })
        .await;
        assert_eq!(out, Err(Interrupted::Timeout(Duration::from_millis(50))));
    }

    #[tokio::test]
    async fn cancelled_token_aborts_call() {
        let token = CancellationToken::new();
        token.cancel();
        let out = bounded(&token, Duration::from_secs(10), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        })
        .await;
        assert_eq!(out, Err(Interrupted::Cancelled));
    }
}
