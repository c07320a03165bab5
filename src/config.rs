//! Configuration for the job channel

use crate::error::{ChannelError, Result};
use std::time::Duration;

/// Sub-path of the job-status endpoint on the job processor
pub const DEFAULT_JOBS_PATH: &str = "/ws/jobs";

/// Configuration for connecting to a job processor
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Base address of the job processor (e.g., "https://api.example.com")
    pub base_url: String,

    /// Path appended to the derived WebSocket origin
    pub path: String,

    /// Number of reconnect attempts per failure episode (0 disables reconnect)
    pub max_reconnect_attempts: u32,

    /// Delay unit; attempt `n` waits `n * reconnect_base_delay`
    pub reconnect_base_delay: Duration,

    /// Time allowed for the transport to reach the open state
    pub connect_timeout: Duration,

    /// Capacity of the outbound frame queue
    pub outbound_buffer: usize,
}

impl ChannelConfig {
    /// Create a new configuration with the given base address
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: DEFAULT_JOBS_PATH.to_string(),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(2000),
            connect_timeout: Duration::from_secs(10),
            outbound_buffer: 100,
        }
    }

    /// Override the endpoint path
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the retry bound and the linear backoff unit
    pub fn reconnect_policy(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_base_delay = base_delay;
        self
    }

    /// Disable automatic reconnection
    pub fn no_reconnect(mut self) -> Self {
        self.max_reconnect_attempts = 0;
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the outbound queue capacity
    pub fn outbound_buffer(mut self, capacity: usize) -> Self {
        self.outbound_buffer = capacity.max(1);
        self
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_base_delay.saturating_mul(attempt)
    }

    /// WebSocket URL of the job-status endpoint
    pub fn endpoint_url(&self) -> Result<String> {
        derive_endpoint(&self.base_url, &self.path)
    }
}

/// Map an http(s) base address onto its ws(s) endpoint.
///
/// `https` becomes `wss`, `http` becomes `ws`, and an address without a
/// scheme is treated as plain. `ws`/`wss` addresses are used as given.
pub fn derive_endpoint(base_url: &str, path: &str) -> Result<String> {
    let base = base_url.trim();

    let (scheme, rest) = match base.split_once("://") {
        Some(("https", rest)) | Some(("wss", rest)) => ("wss", rest),
        Some(("http", rest)) | Some(("ws", rest)) => ("ws", rest),
        Some((other, _)) => {
            return Err(ChannelError::InvalidUrl(format!(
                "unsupported scheme '{}' in '{}'; expected http(s) or ws(s)",
                other, base_url
            )))
        }
        None => ("ws", base),
    };

    let host = rest.trim_end_matches('/');
    if host.is_empty() || host.starts_with('/') || host.contains(char::is_whitespace) {
        return Err(ChannelError::InvalidUrl(format!(
            "missing or malformed host in '{}'",
            base_url
        )));
    }

    let path = path.trim();
    if path.is_empty() {
        return Ok(format!("{}://{}", scheme, host));
    }

    if path.starts_with('/') {
        Ok(format!("{}://{}{}", scheme, host, path))
    } else {
        Ok(format!("{}://{}/{}", scheme, host, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new_defaults() {
        let config = ChannelConfig::new("https://api.example.com");

        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.path, "/ws/jobs");
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_base_delay, Duration::from_millis(2000));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.outbound_buffer, 100);
    }

    #[test]
    fn test_config_no_reconnect() {
        let config = ChannelConfig::new("http://localhost:8000").no_reconnect();

        assert_eq!(config.max_reconnect_attempts, 0);
    }

    #[test]
    fn test_config_reconnect_policy() {
        let config = ChannelConfig::new("http://localhost:8000")
            .reconnect_policy(3, Duration::from_millis(500));

        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.reconnect_base_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_config_outbound_buffer_never_zero() {
        let config = ChannelConfig::new("http://localhost:8000").outbound_buffer(0);

        assert_eq!(config.outbound_buffer, 1);
    }

    #[test]
    fn test_reconnect_delays_are_linear() {
        let config = ChannelConfig::new("http://localhost:8000");
        let delays: Vec<u128> = (1..=5)
            .map(|attempt| config.reconnect_delay(attempt).as_millis())
            .collect();

        assert_eq!(delays, vec![2000, 4000, 6000, 8000, 10000]);
    }

    #[test]
    fn test_config_builder_chain() {
        let config = ChannelConfig::new("https://jobs.internal")
            .path("/realtime")
            .connect_timeout(Duration::from_secs(3))
            .outbound_buffer(16)
            .no_reconnect();

        assert_eq!(config.endpoint_url().unwrap(), "wss://jobs.internal/realtime");
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.outbound_buffer, 16);
        assert_eq!(config.max_reconnect_attempts, 0);
    }

    #[test]
    fn test_endpoint_secure_scheme() {
        let url = derive_endpoint("https://api.example.com", "/ws/jobs").unwrap();
        assert_eq!(url, "wss://api.example.com/ws/jobs");
    }

    #[test]
    fn test_endpoint_plain_scheme() {
        let url = derive_endpoint("http://localhost:8000", "/ws/jobs").unwrap();
        assert_eq!(url, "ws://localhost:8000/ws/jobs");
    }

    #[test]
    fn test_endpoint_no_scheme_defaults_to_plain() {
        let url = derive_endpoint("api.example.com", "/ws/jobs").unwrap();
        assert_eq!(url, "ws://api.example.com/ws/jobs");
    }

    #[test]
    fn test_endpoint_ws_schemes_pass_through() {
        assert_eq!(
            derive_endpoint("wss://api.example.com", "/ws/jobs").unwrap(),
            "wss://api.example.com/ws/jobs"
        );
        assert_eq!(
            derive_endpoint("ws://127.0.0.1:9000", "/ws/jobs").unwrap(),
            "ws://127.0.0.1:9000/ws/jobs"
        );
    }

    #[test]
    fn test_endpoint_trailing_slash_and_relative_path() {
        assert_eq!(
            derive_endpoint("https://api.example.com/", "ws/jobs").unwrap(),
            "wss://api.example.com/ws/jobs"
        );
    }

    #[test]
    fn test_endpoint_rejects_unknown_scheme() {
        let err = derive_endpoint("ftp://files.example.com", "/ws/jobs").unwrap_err();
        assert!(matches!(err, ChannelError::InvalidUrl(_)));
    }

    #[test]
    fn test_endpoint_rejects_empty_host() {
        assert!(derive_endpoint("https://", "/ws/jobs").is_err());
        assert!(derive_endpoint("   ", "/ws/jobs").is_err());
    }
}
