//! Upstream connection establishment with retry.

use std::time::Duration;

use tokio::net::TcpStream;

use super::ProxyError;
use crate::config::schema::UpstreamConfig;
use crate::resilience::Backoff;

/// Connect to the upstream, retrying with exponential backoff.
///
/// Each attempt doubles as a probe of whether the upstream port is bound: a
/// refused connection means nothing is listening yet (a dev server still
/// starting, for example), so the attempt is retried after the backoff delay.
pub async fn connect(config: &UpstreamConfig, connect_timeout: Duration) -> Result<TcpStream, ProxyError> {
    let mut backoff = Backoff::new(&config.retries);
    let mut last_error = None;

    while let Some(delay) = backoff.next_delay() {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let attempt = backoff.attempts();
        match tokio::time::timeout(connect_timeout, TcpStream::connect(&config.address)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "Failed to set TCP_NODELAY on upstream");
                }
                if attempt > 1 {
                    tracing::info!(upstream = %config.address, attempt, "Upstream reachable");
                }
                return Ok(stream);
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    tracing::debug!(upstream = %config.address, attempt, "Upstream port not accepting connections");
                } else {
                    tracing::warn!(upstream = %config.address, attempt, error = %e, "Upstream connect failed");
                }
                last_error = Some(e);
            }
            Err(_) => {
                tracing::warn!(upstream = %config.address, attempt, "Upstream connect timed out");
                last_error = Some(std::io::ErrorKind::TimedOut.into());
            }
        }
    }

    Err(ProxyError::UpstreamUnavailable {
        address: config.address.clone(),
        attempts: backoff.attempts(),
        source: last_error.unwrap_or_else(|| std::io::ErrorKind::NotConnected.into()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RetryConfig;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        // bind then drop to get a port that refuses connections
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = UpstreamConfig {
            address,
            retries: RetryConfig { max_attempts: 2, base_delay_ms: 1, max_delay_ms: 5 },
        };
        match connect(&config, Duration::from_secs(1)).await {
            Err(ProxyError::UpstreamUnavailable { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connects_when_port_is_bound() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = UpstreamConfig {
            address: listener.local_addr().unwrap().to_string(),
            retries: RetryConfig::default(),
        };
        let (stream, accepted) = tokio::join!(connect(&config, Duration::from_secs(1)), listener.accept());
        assert!(stream.is_ok());
        assert!(accepted.is_ok());
    }
}
