use std::future::Future;
use std::time::Duration;

use tracing::warn;

use mixcoin_core::error::MixcoinError;

/// Retry a transient RPC operation with exponential backoff.
///
/// Transient failures (node restarting, wallet locked, network blips) must
/// never crash the block-scan loop or drop a payout; they are retried up to
/// `attempts` times, doubling the delay each round, before the error is
/// handed back to the caller for escalation.
pub async fn with_backoff<T, F, Fut>(
    label: &str,
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, MixcoinError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MixcoinError>>,
{
    let mut delay = base_delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts => {
                warn!(%label, attempt, error = %e, "rpc call failed; retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_backoff("test", 5, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(MixcoinError::Rpc("transient".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_attempts_return_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff("test", 3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(MixcoinError::Rpc("down".into())) }
        })
        .await;
        assert!(matches!(result, Err(MixcoinError::Rpc(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
