//! Timeout defaults and async timeout wrappers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default bound for connects and socket writes
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a caller waits for a correlated reply
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounded readiness wait of a read loop before it re-checks for cancellation
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long an accepted socket may stay unidentified
pub const LOBBY_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Request overseer sweep interval
pub const REQUEST_SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Lobby overseer sweep interval
pub const LOBBY_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Graceful shutdown bound
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `fut` with a deadline, mapping expiry to `ProtocolError::Timeout`
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expiry_maps_to_timeout() {
        let result: Result<()> = with_timeout_error(
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            },
            Duration::from_millis(10),
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn test_inner_result_passes_through() {
        let ok = with_timeout_error(async { Ok(5) }, Duration::from_secs(1)).await;
        assert!(matches!(ok, Ok(5)));

        let err: Result<()> =
            with_timeout_error(async { Err(ProtocolError::ConnectionClosed) }, Duration::from_secs(1))
                .await;
        assert!(matches!(err, Err(ProtocolError::ConnectionClosed)));
    }
}
