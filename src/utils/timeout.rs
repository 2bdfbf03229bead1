//! Timeout helpers shared by the handshake and the connect loop.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Default bound for the identifier exchange
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound for a single outbound connect attempt
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Await `fut`, mapping an elapsed deadline to `ProtocolError::Timeout`.
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
    async fn test_elapsed_maps_to_timeout() {
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
    async fn test_inner_error_passes_through() {
        let result: Result<()> = with_timeout_error(
            async { Err(ProtocolError::ConnectionClosed) },
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
}
