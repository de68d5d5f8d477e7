//! Source-bound HTTP probe client.
//!
//! Every probe is a fully independent connection: a throwaway client is
//! built per call with the outbound socket bound to the requested source
//! address, keep-alive disabled and the response body drained and discarded.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use async_trait::async_trait;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// A completed probe: HTTP status in `200..=299` plus elapsed time.
#[derive(Debug, Clone, Copy)]
pub struct FetchOutcome {
    pub status: u16,
    pub duration: Duration,
}

/// A failed probe. The elapsed time up to the failure is always carried.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("unexpected status {status}")]
    BadStatus { status: u16, duration: Duration },
    #[error("{message}")]
    Transport { message: String, duration: Duration },
}

impl FetchError {
    /// The HTTP status, if the failure happened after a response arrived.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::BadStatus { status, .. } => Some(*status),
            FetchError::Transport { .. } => None,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            FetchError::BadStatus { duration, .. } | FetchError::Transport { duration, .. } => {
                *duration
            }
        }
    }
}

/// Performs one HTTP GET bound to a given source IPv4 address.
#[async_trait]
pub trait ProbeClient: Send + Sync {
    async fn fetch(&self, source: Ipv4Addr, url: &str) -> Result<FetchOutcome, FetchError>;
}

/// [`ProbeClient`] backed by reqwest, one connection per call.
#[derive(Debug, Clone)]
pub struct SourceBoundClient {
    timeout: Duration,
}

impl SourceBoundClient {
    pub fn new(timeout: Duration) -> Self {
        let timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        Self { timeout }
    }
}

#[async_trait]
impl ProbeClient for SourceBoundClient {
    async fn fetch(&self, source: Ipv4Addr, url: &str) -> Result<FetchOutcome, FetchError> {
        let started = Instant::now();
        let client = reqwest::Client::builder()
            .local_address(IpAddr::V4(source))
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .pool_max_idle_per_host(0)
            .http1_only()
            .build()
            .map_err(|err| FetchError::Transport {
                message: err.to_string(),
                duration: started.elapsed(),
            })?;
        let response = client
            .get(url)
            .header(reqwest::header::CONNECTION, "close")
            .send()
            .await
            .map_err(|err| FetchError::Transport {
                message: err.to_string(),
                duration: started.elapsed(),
            })?;
        let status = response.status().as_u16();
        // Drain the body so the connection is fully consumed before it is
        // dropped; the content itself is irrelevant.
        let _ = response.bytes().await;
        let duration = started.elapsed();
        if !(200..=299).contains(&status) {
            return Err(FetchError::BadStatus { status, duration });
        }
        Ok(FetchOutcome { status, duration })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_accessors() {
        let bad = FetchError::BadStatus {
            status: 503,
            duration: Duration::from_millis(80),
        };
        assert_eq!(bad.status(), Some(503));
        assert_eq!(bad.duration(), Duration::from_millis(80));
        assert_eq!(bad.to_string(), "unexpected status 503");

        let transport = FetchError::Transport {
            message: "connection refused".to_string(),
            duration: Duration::from_millis(5),
        };
        assert_eq!(transport.status(), None);
        assert_eq!(transport.duration(), Duration::from_millis(5));
    }

    #[test]
    fn test_zero_timeout_falls_back_to_default() {
        let client = SourceBoundClient::new(Duration::ZERO);
        assert_eq!(client.timeout, DEFAULT_TIMEOUT);
    }
}
