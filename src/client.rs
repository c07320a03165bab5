//! Job channel facade

use crate::config::ChannelConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::dispatch::{Dispatcher, Subscription};
use crate::error::Result;
use crate::messages::{JobCommand, ServerFrame};
use crate::transport::{Connector, WsConnector};

use std::sync::Arc;
use tokio::sync::watch;

struct ChannelInner {
    manager: Arc<ConnectionManager>,
    dispatcher: Arc<Dispatcher>,
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        self.manager.shutdown();
    }
}

/// Real-time job-status channel
///
/// Submits job commands to the job processor and fans status frames out to
/// registered observers. Abnormal closures are retried with linear backoff.
/// This struct is cheaply cloneable as it uses an internal Arc; background
/// work stops when the last clone is dropped.
#[derive(Clone)]
pub struct JobChannel {
    inner: Arc<ChannelInner>,
}

impl JobChannel {
    /// Create a channel that connects over WebSocket
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector::new()))
    }

    /// Create a channel on a custom transport
    pub fn with_connector(config: ChannelConfig, connector: Arc<dyn Connector>) -> Self {
        let dispatcher = Dispatcher::new();
        let manager = Arc::new(ConnectionManager::new(
            config,
            connector,
            dispatcher.clone(),
        ));

        Self {
            inner: Arc::new(ChannelInner {
                manager,
                dispatcher,
            }),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        self.inner.manager.config()
    }

    /// WebSocket URL this channel connects to
    pub fn endpoint(&self) -> Result<String> {
        self.config().endpoint_url()
    }

    /// Connect to the job processor
    ///
    /// Resolves the first time the transport opens and rejects on a pre-open
    /// failure. An existing transport is discarded first.
    pub async fn connect(&self) -> Result<()> {
        self.inner.manager.connect().await
    }

    /// Cancel any scheduled reconnect and close the transport. No-op when idle.
    pub fn disconnect(&self) {
        self.inner.manager.disconnect();
    }

    /// Send a job command; fails with `NotConnected` unless the transport is open
    pub fn send_job(&self, command: &JobCommand) -> Result<()> {
        self.inner.manager.send(command)
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state().is_open()
    }

    /// Get the current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.manager.state()
    }

    /// Get a receiver for connection state changes
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.manager.state_receiver()
    }

    /// Register a handler for every valid inbound frame
    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ServerFrame) + Send + Sync + 'static,
    {
        self.inner.dispatcher.on_message(Arc::new(handler))
    }

    /// Register a handler for connection changes (`true` on open, `false` on close)
    pub fn on_connection_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.dispatcher.on_connection_change(Arc::new(handler))
    }
}


#[cfg(test)]
mod async_tests {
    use super::*;
    use crate::error::ChannelError;

    #[tokio::test]
    async fn test_send_job_not_connected() {
        let channel = JobChannel::new(ChannelConfig::new("http://localhost:8000"));

        let result = channel.send_job(&JobCommand::new_job("job-1", "https://cdn/x.mp4"));
        assert!(matches!(result, Err(ChannelError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_when_not_connected() {
        let channel = JobChannel::new(ChannelConfig::new("http://localhost:8000"));

        // No transport, no timer: nothing changes
        channel.disconnect();
        channel.disconnect();
        assert_eq!(channel.connection_state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_connect_invalid_url_leaves_state_untouched() {
        let channel = JobChannel::new(ChannelConfig::new("ftp://files.example.com"));

        let result = channel.connect().await;
        assert!(matches!(result, Err(ChannelError::InvalidUrl(_))));
        assert_eq!(channel.connection_state(), ConnectionState::Idle);
    }
}
