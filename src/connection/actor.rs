//! Connection actor
//!
//! Each actor owns one outbound TCP socket to the router's redirect target
//! and runs every operation on it from a single task. Callers talk to it
//! through a [`ConnectionHandle`]; commands are queued and executed in
//! arrival order, so payloads for one session reach the socket in the order
//! they were submitted.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --start--> Connecting --ok--> Connected --peer close--> Closed
//!                     |                  |
//!                     +--err/timeout--> Failed <--read error--+
//! ```
//!
//! `send` on an actor that is not connected triggers a start and drops the
//! payload. A `send` queued behind an in-flight start sees its outcome, so a
//! fresh session's first payload is only lost when the connect fails.
//!
//! # Backpressure and cancellation
//!
//! Each session holds `session_queue_size` payload permits. A payload keeps
//! its permit until the write finishes, so a peer that stops reading causes
//! further `send` calls to fail with [`ConnectionError::QueueFull`] instead
//! of buffering without bound.
//!
//! `stop` is signalled out of band as well as queued. An in-flight connect
//! or write returns as soon as a stop is requested, and payloads or starts
//! queued ahead of the stop are discarded without touching the network.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn, Instrument};

use super::state::ConnectionState;
use super::stats::RouterStats;
use crate::config::RouterConfig;
use crate::error::ConnectionError;
use crate::session::SessionKey;

/// Bytes read from the redirect target for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReply {
    /// Session the bytes belong to
    pub key: SessionKey,
    /// Data as read from the socket
    pub data: Bytes,
}

/// Notice sent to the router when an actor's receive loop ends
#[derive(Debug, Clone, Copy)]
pub(crate) struct ActorClosed {
    pub session_id: u64,
    pub key: SessionKey,
    pub state: ConnectionState,
}

/// Channels that tie an actor to its router
#[derive(Debug, Default, Clone)]
pub(crate) struct ActorLinks {
    pub replies: Option<mpsc::Sender<SessionReply>>,
    pub closed: Option<mpsc::UnboundedSender<ActorClosed>>,
}

#[derive(Debug)]
enum ActorCommand {
    Start,
    Send(Bytes, OwnedSemaphorePermit),
    Stop(Option<oneshot::Sender<()>>),
    Barrier(oneshot::Sender<()>),
}

/// How a receive loop ended
#[derive(Debug)]
enum ReceiveOutcome {
    /// Peer closed the socket
    Completed,
    /// Read failed
    Error(String),
}

/// Handle to a running [`ConnectionActor`]
///
/// All methods are fire-and-forget except the explicit `*_and_wait`
/// helpers. Cloning a handle does not create a new connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    session_id: u64,
    key: SessionKey,
    commands: mpsc::UnboundedSender<ActorCommand>,
    slots: Arc<Semaphore>,
    queue_size: usize,
    stop_requests: Arc<watch::Sender<u64>>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Session identifier assigned at creation
    #[must_use]
    pub const fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Session this actor serves
    #[must_use]
    pub const fn key(&self) -> SessionKey {
        self.key
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether the actor task is still running
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Queue a connect attempt
    pub fn start(&self) {
        self.dispatch(ActorCommand::Start);
    }

    /// Queue a payload for the redirect socket
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::QueueFull`] if `session_queue_size` payloads
    /// are already pending, or [`ConnectionError::ActorExited`] if the actor
    /// is gone. The payload is dropped in both cases.
    pub fn send(&self, payload: Bytes) -> Result<(), ConnectionError> {
        let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
            return Err(ConnectionError::QueueFull {
                session_id: self.session_id,
                capacity: self.queue_size,
            });
        };
        self.commands
            .send(ActorCommand::Send(payload, permit))
            .map_err(|_| ConnectionError::ActorExited {
                session_id: self.session_id,
            })
    }

    /// Payloads queued or being written
    #[must_use]
    pub fn pending_payloads(&self) -> usize {
        self.queue_size.saturating_sub(self.slots.available_permits())
    }

    /// Stop the actor
    ///
    /// Interrupts a connect or write in progress.
    pub fn stop(&self) {
        self.request_stop();
        self.dispatch(ActorCommand::Stop(None));
    }

    /// Stop and wait until the actor has released its socket
    pub async fn stop_and_wait(&self) {
        let (tx, rx) = oneshot::channel();
        self.request_stop();
        self.dispatch(ActorCommand::Stop(Some(tx)));
        let _ = rx.await;
    }

    /// Wait until every command queued before this call has run
    ///
    /// Returns `false` if the actor has exited.
    pub async fn flush(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        self.dispatch(ActorCommand::Barrier(tx));
        rx.await.is_ok()
    }

    /// Wait until the state satisfies `predicate`
    ///
    /// Returns the matching state, or the last known state if the actor exits first.
    pub async fn wait_for_state<F>(&self, predicate: F) -> ConnectionState
    where
        F: FnMut(&ConnectionState) -> bool,
    {
        let mut state = self.state.clone();
        if let Ok(matched) = state.wait_for(predicate).await.map(|s| *s) {
            return matched;
        }
        let last = *state.borrow();
        last
    }

    fn request_stop(&self) {
        self.stop_requests.send_modify(|requested| *requested += 1);
    }

    fn dispatch(&self, command: ActorCommand) {
        if self.commands.send(command).is_err() {
            trace!(session_id = self.session_id, key = %self.key, "Actor already exited");
        }
    }
}

/// Owner of one redirect socket
pub struct ConnectionActor {
    session_id: u64,
    key: SessionKey,
    config: Arc<RouterConfig>,
    stats: Arc<RouterStats>,
    links: ActorLinks,
    commands: mpsc::UnboundedReceiver<ActorCommand>,
    stop_requests: watch::Receiver<u64>,
    stops_handled: u64,
    state: watch::Sender<ConnectionState>,
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<ReceiveOutcome>>,
}

impl ConnectionActor {
    /// Spawn a standalone actor for `key`
    ///
    /// The actor starts `Idle`; call [`ConnectionHandle::start`] to connect.
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        session_id: u64,
        key: SessionKey,
        config: Arc<RouterConfig>,
        stats: Arc<RouterStats>,
    ) -> ConnectionHandle {
        Self::spawn_linked(session_id, key, config, stats, ActorLinks::default())
    }

    pub(crate) fn spawn_linked(
        session_id: u64,
        key: SessionKey,
        config: Arc<RouterConfig>,
        stats: Arc<RouterStats>,
        links: ActorLinks,
    ) -> ConnectionHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(0);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let queue_size = config.session_queue_size.max(1);

        let actor = Self {
            session_id,
            key,
            config,
            stats,
            links,
            commands: command_rx,
            stop_requests: stop_rx,
            stops_handled: 0,
            state: state_tx,
            writer: None,
            reader: None,
        };

        let span = tracing::debug_span!("connection", session_id, key = %key);
        tokio::spawn(actor.run().instrument(span));

        ConnectionHandle {
            session_id,
            key,
            commands: command_tx,
            slots: Arc::new(Semaphore::new(queue_size)),
            queue_size,
            stop_requests: Arc::new(stop_tx),
            state: state_rx,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                outcome = join_reader(&mut self.reader), if self.reader.is_some() => {
                    self.on_receive_finished(outcome);
                }
            }
        }

        self.release();
        trace!(session_id = self.session_id, "Actor exited");
    }

    async fn handle(&mut self, command: ActorCommand) {
        match command {
            ActorCommand::Start => self.start().await,
            ActorCommand::Send(payload, _permit) => self.send(payload).await,
            ActorCommand::Stop(ack) => {
                self.stops_handled = *self.stop_requests.borrow();
                self.stop();
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            ActorCommand::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Whether a stop was requested that has not been processed yet
    fn stop_pending(&self) -> bool {
        *self.stop_requests.borrow() > self.stops_handled
    }

    async fn start(&mut self) {
        if !self.current_state().accepts_start() {
            return;
        }
        if self.stop_pending() {
            trace!(session_id = self.session_id, "Stop pending, not connecting");
            return;
        }

        let host = self.config.redirect_host.as_str();
        let port = self.config.redirect_port;
        let target = self.config.redirect_target();

        if port == 0 || host.is_empty() {
            let err = ConnectionError::InvalidRedirect {
                host: host.to_string(),
                port,
            };
            warn!(session_id = self.session_id, "{err}, not connecting");
            return;
        }

        self.set_state(ConnectionState::Connecting);
        debug!(session_id = self.session_id, "Connecting to {}", target);

        let connect_timeout = self.config.connect_timeout();
        let connect = timeout(connect_timeout, TcpStream::connect((host, port)));
        let stopped = stop_requested(self.stop_requests.clone(), self.stops_handled);
        let result = tokio::select! {
            biased;
            () = stopped => {
                self.set_state(ConnectionState::Closed);
                debug!(session_id = self.session_id, "Connect to {} cancelled", target);
                return;
            }
            result = connect => match result {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(e)) => Err(ConnectionError::connect_failed(&target, e.to_string())),
                Err(_) => Err(ConnectionError::Timeout {
                    target: target.clone(),
                    timeout_ms: u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            },
        };

        match result {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY: {}", e);
                }
                let (read_half, write_half) = stream.into_split();
                self.writer = Some(write_half);
                self.reader = Some(tokio::spawn(receive_loop(
                    read_half,
                    self.key,
                    self.config.recv_buffer_size,
                    Arc::clone(&self.stats),
                    self.links.replies.clone(),
                )));
                self.set_state(ConnectionState::Connected);
                info!(
                    session_id = self.session_id,
                    src = %self.key.src_addr,
                    "Redirect connection ready to {}",
                    target
                );
            }
            Err(err) => {
                self.set_state(ConnectionState::Failed);
                self.stats.record_connect_failure();
                error!(session_id = self.session_id, "{}", err);
            }
        }
    }

    async fn send(&mut self, payload: Bytes) {
        if self.stop_pending() {
            trace!(
                session_id = self.session_id,
                bytes = payload.len(),
                "Stop pending, discarding payload"
            );
            return;
        }

        if payload.is_empty() {
            if self.writer.is_none() {
                self.start().await;
            }
            return;
        }

        let Some(writer) = self.writer.as_mut() else {
            let err = ConnectionError::not_connected(self.config.redirect_target());
            error!(
                session_id = self.session_id,
                bytes = payload.len(),
                "{err}, starting now and dropping payload"
            );
            self.stats.record_dropped_unconnected();
            self.start().await;
            return;
        };

        let stopped = stop_requested(self.stop_requests.clone(), self.stops_handled);
        tokio::select! {
            biased;
            () = stopped => {
                debug!(session_id = self.session_id, "Write of {} bytes cancelled", payload.len());
            }
            result = writer.write_all(&payload) => match result {
                Ok(()) => {
                    self.stats.record_forwarded(payload.len());
                    debug!(session_id = self.session_id, "Sent {} bytes", payload.len());
                }
                Err(e) => {
                    self.stats.record_send_error();
                    error!(session_id = self.session_id, "Send error: {}", e);
                }
            },
        }
    }

    fn stop(&mut self) {
        self.release();
        if self.current_state() != ConnectionState::Closed {
            self.set_state(ConnectionState::Closed);
            debug!(session_id = self.session_id, "Connection stopped");
        }
    }

    /// Cancel the receive loop and drop both socket halves
    fn release(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer = None;
    }

    fn on_receive_finished(&mut self, outcome: ReceiveOutcome) {
        self.reader = None;
        self.writer = None;

        let state = match outcome {
            ReceiveOutcome::Completed => {
                info!(session_id = self.session_id, "Redirect peer closed the connection");
                ConnectionState::Closed
            }
            ReceiveOutcome::Error(reason) => {
                warn!(session_id = self.session_id, "Receive failed: {}", reason);
                ConnectionState::Failed
            }
        };
        self.set_state(state);

        if let Some(ref closed) = self.links.closed {
            let _ = closed.send(ActorClosed {
                session_id: self.session_id,
                key: self.key,
                state,
            });
        }
    }
}

/// Resolve once a stop newer than `handled` has been requested
async fn stop_requested(mut requests: watch::Receiver<u64>, handled: u64) {
    let requested = requests.wait_for(|requested| *requested > handled).await.is_ok();
    if !requested {
        // Every handle is gone; the closed command queue ends the actor instead
        std::future::pending::<()>().await;
    }
}

async fn join_reader(reader: &mut Option<JoinHandle<ReceiveOutcome>>) -> ReceiveOutcome {
    match reader.as_mut() {
        Some(handle) => match handle.await {
            Ok(outcome) => outcome,
            Err(e) => ReceiveOutcome::Error(e.to_string()),
        },
        None => std::future::pending().await,
    }
}

/// Drain the redirect socket until EOF or error
async fn receive_loop(
    mut reader: OwnedReadHalf,
    key: SessionKey,
    buffer_size: usize,
    stats: Arc<RouterStats>,
    replies: Option<mpsc::Sender<SessionReply>>,
) -> ReceiveOutcome {
    let mut buf = BytesMut::with_capacity(buffer_size);

    loop {
        buf.reserve(buffer_size);
        match reader.read_buf(&mut buf).await {
            Ok(0) => return ReceiveOutcome::Completed,
            Ok(n) => {
                stats.record_received(n);
                debug!(key = %key, "Received {} bytes from redirect target", n);

                let data = buf.split().freeze();
                if let Some(ref tx) = replies {
                    match tx.try_send(SessionReply { key, data }) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            stats.record_reply_dropped();
                            trace!(key = %key, "Reply queue full, dropping {} bytes", n);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {}
                    }
                }
            }
            Err(e) => return ReceiveOutcome::Error(e.to_string()),
        }
    }
}
