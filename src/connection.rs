//! Connection lifecycle and reconnect policy
//!
//! The manager owns at most one transport link. Each link is driven by its
//! own task; the link's generation number decides whether that task is still
//! the owner when it reports a closure. Closures of released links (after
//! `disconnect()` or a newer `connect()`) are ignored.

use crate::config::ChannelConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ChannelError, Result};
use crate::messages::{self, JobCommand};
use crate::transport::{
    Connector, Transport, TransportEvent, ABNORMAL_CLOSE_CODE, CLEAN_CLOSE_CODE,
};

use parking_lot::{Mutex, ReentrantMutex};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection state of the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected
    Idle,
    /// Opening a transport
    Connecting,
    /// Connected and ready
    Open,
    /// Waiting to retry after an abnormal closure
    Reconnecting { attempt: u32 },
    /// Transport closed. `terminal` states are only left by an explicit `connect()`
    Closed { terminal: bool },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed { terminal: true })
    }
}

/// Command for the link task
#[derive(Debug)]
enum Outbound {
    Frame(String),
    Close { code: u16, reason: String },
}

/// The owned transport: its task and the queue feeding it
struct Link {
    generation: u64,
    tx: mpsc::Sender<Outbound>,
    task: JoinHandle<()>,
    /// Observers were told `true` for this link
    announced: bool,
}

impl Link {
    /// Ask the task to close the transport; abort it if it cannot be reached
    fn release(self, reason: &str) {
        let close = Outbound::Close {
            code: CLEAN_CLOSE_CODE,
            reason: reason.to_string(),
        };
        if self.tx.try_send(close).is_err() {
            debug!(generation = self.generation, "Link queue unavailable, aborting task");
            self.task.abort();
        }
    }
}

/// State guarded by one lock so transitions never interleave
struct Shared {
    link: Option<Link>,
    retry: Option<JoinHandle<()>>,
    attempt: u32,
    generation: u64,
}

pub(crate) struct ConnectionManager {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<Dispatcher>,
    state: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shared: Mutex<Shared>,
    /// Held across each state transition and its notification, taken before
    /// `shared`; reentrant so observers may call back in
    announce: ReentrantMutex<()>,
}

impl ConnectionManager {
    pub(crate) fn new(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let (state, state_rx) = watch::channel(ConnectionState::Idle);

        Self {
            config,
            connector,
            dispatcher,
            state,
            state_rx,
            shared: Mutex::new(Shared {
                link: None,
                retry: None,
                attempt: 0,
                generation: 0,
            }),
            announce: ReentrantMutex::new(()),
        }
    }

    pub(crate) fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub(crate) fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Connection state changed");
        }
    }

    /// Open a transport; resolves on open, rejects on pre-open failure
    pub(crate) async fn connect(self: &Arc<Self>) -> Result<()> {
        let endpoint = self.config.endpoint_url()?;
        let ready = {
            let mut shared = self.shared.lock();
            // A manual connect after giving up starts a fresh failure episode
            if self.state().is_terminal() {
                shared.attempt = 0;
            }
            self.open_link(&mut shared, endpoint)
        };
        ready.await.unwrap_or(Err(ChannelError::Cancelled))
    }

    /// Replace any existing link with a new one. Caller holds the lock.
    fn open_link(
        self: &Arc<Self>,
        shared: &mut Shared,
        endpoint: String,
    ) -> oneshot::Receiver<Result<()>> {
        if let Some(timer) = shared.retry.take() {
            timer.abort();
        }
        if let Some(old) = shared.link.take() {
            debug!(generation = old.generation, "Discarding previous transport");
            old.release("superseded by a new connection");
        }

        shared.generation += 1;
        let generation = shared.generation;
        let (ready_tx, ready_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer);

        self.set_state(ConnectionState::Connecting);
        info!(endpoint = %endpoint, generation, "Connecting to job processor");

        let task = tokio::spawn(self.clone().run_link(generation, endpoint, rx, ready_tx));
        shared.link = Some(Link {
            generation,
            tx,
            task,
            announced: false,
        });

        ready_rx
    }

    /// Cancel any retry, close the transport cleanly
    pub(crate) fn disconnect(&self) {
        let _turn = self.announce.lock();
        let was_open = {
            let mut shared = self.shared.lock();
            let timer = shared.retry.take();
            let link = shared.link.take();

            if timer.is_none() && link.is_none() {
                return;
            }

            if let Some(timer) = timer {
                debug!(attempt = shared.attempt, "Cancelling scheduled reconnect");
                timer.abort();
            }
            // Invalidate timers that already woke up and wait on the lock
            shared.generation += 1;

            let was_open = link.as_ref().is_some_and(|link| link.announced);
            if let Some(link) = link {
                link.release("client disconnect");
            }
            self.set_state(ConnectionState::Closed { terminal: true });
            was_open
        };

        info!("Disconnected from job processor");
        if was_open {
            self.dispatcher.notify_connection(false);
        }
    }

    /// Queue a command on the open transport
    pub(crate) fn send(&self, command: &JobCommand) -> Result<()> {
        let shared = self.shared.lock();
        if !self.state().is_open() {
            return Err(ChannelError::NotConnected);
        }
        let link = shared.link.as_ref().ok_or(ChannelError::NotConnected)?;

        let payload = messages::encode(command)?;
        link.tx
            .try_send(Outbound::Frame(payload))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    ChannelError::Transport("outbound queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => ChannelError::NotConnected,
            })?;

        debug!(job_id = %command.job_id, kind = command.kind.as_str(), "Queued job command");
        Ok(())
    }

    /// Record the open transport and notify `true`, if `generation` still owns the link
    fn mark_open(&self, generation: u64) -> bool {
        let _turn = self.announce.lock();
        {
            let mut shared = self.shared.lock();
            match shared.link.as_mut() {
                Some(link) if link.generation == generation => link.announced = true,
                _ => return false,
            }
            shared.attempt = 0;
            self.set_state(ConnectionState::Open);
        }
        self.dispatcher.notify_connection(true);
        true
    }

    async fn run_link(
        self: Arc<Self>,
        generation: u64,
        endpoint: String,
        mut rx: mpsc::Receiver<Outbound>,
        ready_tx: oneshot::Sender<Result<()>>,
    ) {
        let limit = self.config.connect_timeout;
        let opened = tokio::select! {
            result = tokio::time::timeout(limit, self.connector.connect(&endpoint)) => {
                match result {
                    Ok(result) => result,
                    Err(_) => Err(ChannelError::Connect(format!(
                        "Connection timeout ({:?})",
                        limit
                    ))),
                }
            }
            // Released before the transport opened
            _ = rx.recv() => {
                debug!(generation, "Connect abandoned");
                return;
            }
        };

        let mut transport = match opened {
            Ok(transport) => transport,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Connection failed");
                let message = match e {
                    ChannelError::Connect(message) => message,
                    other => other.to_string(),
                };
                let _ = ready_tx.send(Err(ChannelError::Connect(message)));
                self.handle_closed(generation, ABNORMAL_CLOSE_CODE, "connect failed");
                return;
            }
        };

        // Released while opening: the pending connect() sees Cancelled
        if !self.mark_open(generation) {
            let _ = transport
                .close(CLEAN_CLOSE_CODE, "superseded by a new connection")
                .await;
            return;
        }

        info!(endpoint = %endpoint, "Connected to job processor");
        let _ = ready_tx.send(Ok(()));

        let (code, reason) = self.pump(transport.as_mut(), &mut rx).await;
        self.handle_closed(generation, code, &reason);
    }

    /// Move frames until the transport closes; returns the close code and reason
    async fn pump(
        &self,
        transport: &mut dyn Transport,
        rx: &mut mpsc::Receiver<Outbound>,
    ) -> (u16, String) {
        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Outbound::Frame(text)) => {
                        if let Err(e) = transport.send_text(text).await {
                            warn!(error = %e, "Write failed, dropping transport");
                            return (ABNORMAL_CLOSE_CODE, e.to_string());
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        if let Err(e) = transport.close(code, &reason).await {
                            debug!(error = %e, "Close handshake failed");
                        }
                        return (code, reason);
                    }
                    None => {
                        let _ = transport.close(CLEAN_CLOSE_CODE, "channel dropped").await;
                        return (CLEAN_CLOSE_CODE, "channel dropped".to_string());
                    }
                },
                event = transport.next_event() => match event {
                    TransportEvent::Text(text) => self.dispatcher.dispatch_text(&text),
                    TransportEvent::Binary(data) => self.dispatcher.dispatch_bytes(&data),
                    TransportEvent::Closed { code, reason } => return (code, reason),
                },
            }
        }
    }

    /// Closure of the link owned by `generation`: settle or schedule a retry
    fn handle_closed(self: &Arc<Self>, generation: u64, code: u16, reason: &str) {
        let _turn = self.announce.lock();
        {
            let mut shared = self.shared.lock();
            if !owns_link(&shared, generation) {
                debug!(generation, code, "Ignoring closure of released transport");
                return;
            }
            shared.link = None;

            if code == CLEAN_CLOSE_CODE {
                info!(reason = %reason, "Job processor closed the connection");
                self.set_state(ConnectionState::Closed { terminal: true });
            } else {
                self.set_state(ConnectionState::Closed { terminal: false });
                self.schedule_retry(&mut shared, code);
            }
        }

        self.dispatcher.notify_connection(false);
    }

    /// Caller holds the lock
    fn schedule_retry(self: &Arc<Self>, shared: &mut Shared, code: u16) {
        if shared.attempt >= self.config.max_reconnect_attempts {
            warn!(
                attempts = shared.attempt,
                code, "Reconnect attempts exhausted, giving up"
            );
            self.set_state(ConnectionState::Closed { terminal: true });
            return;
        }

        shared.attempt += 1;
        let attempt = shared.attempt;
        let delay = self.config.reconnect_delay(attempt);
        self.set_state(ConnectionState::Reconnecting { attempt });

        info!(attempt, delay_ms = delay.as_millis() as u64, code, "Reconnecting...");
        let generation = shared.generation;
        shared.retry = Some(tokio::spawn(self.clone().retry_after(generation, delay)));
    }

    async fn retry_after(self: Arc<Self>, generation: u64, delay: Duration) {
        tokio::time::sleep(delay).await;

        let ready = {
            let mut shared = self.shared.lock();
            if shared.generation != generation || shared.link.is_some() {
                debug!(generation, "Stale reconnect timer");
                return;
            }
            // This task is the timer; detach instead of aborting ourselves
            drop(shared.retry.take());

            match self.config.endpoint_url() {
                Ok(endpoint) => self.open_link(&mut shared, endpoint),
                Err(e) => {
                    warn!(error = %e, "Cannot reconnect");
                    self.set_state(ConnectionState::Closed { terminal: true });
                    return;
                }
            }
        };

        // Failures come back through handle_closed
        if let Ok(Err(e)) = ready.await {
            debug!(error = %e, "Reconnect attempt failed");
        }
    }

    /// Abort background work without notifying observers
    pub(crate) fn shutdown(&self) {
        let mut shared = self.shared.lock();
        shared.generation += 1;
        if let Some(timer) = shared.retry.take() {
            timer.abort();
        }
        if let Some(link) = shared.link.take() {
            link.release("channel dropped");
        }
    }
}

fn owns_link(shared: &Shared, generation: u64) -> bool {
    matches!(&shared.link, Some(link) if link.generation == generation)
}
