//! Session router
//!
//! Maps session keys to connection actors under a capacity bound. The table
//! lives inside a single router task; every packet and query travels through
//! that task's bounded command queue, so two packets with the same key can
//! never race to create two actors.
//!
//! The router never waits on an actor. A session whose actor already has
//! `session_queue_size` payloads pending loses further payloads, counted as
//! `packets_dropped_busy`, so a stalled redirect peer cannot back up the
//! router queue or grow memory.
//!
//! # Architecture
//!
//! ```text
//! input_packet ──► [router queue] ──► router task ──► ConnectionHandle::send
//!                                         ▲                   │
//!                                         │ ActorClosed       ▼
//!                                         └──────────── ConnectionActor ──► redirect
//!                                                              │
//!                                       take_reply_rx() ◄──────┘ SessionReply
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use super::events::{DropReason, RouterEvent};
use super::key::SessionKey;
use super::packet::Packet;
use crate::config::RouterConfig;
use crate::connection::{
    ActorClosed, ActorLinks, ConnectionActor, ConnectionHandle, ConnectionState, RouterStats,
    SessionReply,
};
use crate::error::ConnectionError;

/// Capacity of the router event broadcast channel
pub const EVENT_CHANNEL_SIZE: usize = 1024;

/// One row of the session table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Identifier of the session's actor
    pub session_id: u64,
    /// Session key
    pub key: SessionKey,
    /// Connection state at the time of the query
    pub state: ConnectionState,
}

enum RouterCommand {
    Input(Packet),
    Count(oneshot::Sender<usize>),
    Contains(SessionKey, oneshot::Sender<bool>),
    Sessions(oneshot::Sender<Vec<SessionSnapshot>>),
    Stop(oneshot::Sender<()>),
}

/// Handle to the session router task
///
/// # Example
///
/// ```no_run
/// use tun_relay::config::RouterConfig;
/// use tun_relay::session::{PacketTemplate, SessionRouter};
///
/// # async fn example() {
/// let router = SessionRouter::new(RouterConfig::default());
/// router.start();
/// router.input_packet(PacketTemplate::default().build("hello")).await;
/// assert_eq!(router.session_count().await, 1);
/// # }
/// ```
pub struct SessionRouter {
    config: Arc<RouterConfig>,
    commands: mpsc::Sender<RouterCommand>,
    stats: Arc<RouterStats>,
    events: broadcast::Sender<RouterEvent>,
    reply_rx: Mutex<Option<mpsc::Receiver<SessionReply>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl SessionRouter {
    /// Create a router and spawn its task
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(config: RouterConfig) -> Self {
        let config = Arc::new(config);
        let stats = Arc::new(RouterStats::new());
        let (command_tx, command_rx) = mpsc::channel(config.packet_queue_size.max(1));
        let (reply_tx, reply_rx) = mpsc::channel(config.reply_queue_size.max(1));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();

        let task = RouterTask {
            config: Arc::clone(&config),
            stats: Arc::clone(&stats),
            events: events.clone(),
            links: ActorLinks {
                replies: Some(reply_tx),
                closed: Some(closed_tx),
            },
            sessions: HashMap::new(),
            next_session_id: 1,
            stopped: false,
        };
        tokio::spawn(task.run(command_rx, closed_rx));

        debug!(
            redirect = %config.redirect_target(),
            max_connections = config.max_connections,
            "Session router created"
        );

        Self {
            config,
            commands: command_tx,
            stats,
            events,
            reply_rx: Mutex::new(Some(reply_rx)),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Mark the router ready
    ///
    /// Idempotent and does no network I/O.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Session router already started");
            return;
        }
        info!(
            redirect = %self.config.redirect_target(),
            max_connections = self.config.max_connections,
            "Session router started"
        );
    }

    /// Whether `start` has been called
    #[inline]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether `stop` has been called
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Route a packet, waiting for queue space
    pub async fn input_packet(&self, packet: Packet) {
        if self.is_stopped() {
            debug!(key = %packet.key(), "Router stopped, ignoring packet");
            return;
        }
        if self.commands.send(RouterCommand::Input(packet)).await.is_err() {
            warn!("Router task has exited, packet dropped");
        }
    }

    /// Route a packet without waiting
    ///
    /// Returns `false` if the packet was dropped because the router queue is
    /// full or the router has stopped.
    pub fn try_input_packet(&self, packet: Packet) -> bool {
        if self.is_stopped() {
            debug!(key = %packet.key(), "Router stopped, ignoring packet");
            return false;
        }
        match self.commands.try_send(RouterCommand::Input(packet)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(RouterCommand::Input(packet))) => {
                let key = packet.key();
                self.stats.record_dropped_queue();
                trace!(key = %key, "Router queue full, packet dropped");
                let _ = self.events.send(RouterEvent::PacketDropped {
                    key,
                    reason: DropReason::QueueFull,
                });
                false
            }
            Err(_) => false,
        }
    }

    /// Number of sessions in the table
    pub async fn session_count(&self) -> usize {
        self.query(RouterCommand::Count).await.unwrap_or(0)
    }

    /// Whether the table has an entry for `key`
    pub async fn contains(&self, key: SessionKey) -> bool {
        self.query(|tx| RouterCommand::Contains(key, tx))
            .await
            .unwrap_or(false)
    }

    /// Snapshot of the session table
    pub async fn sessions(&self) -> Vec<SessionSnapshot> {
        self.query(RouterCommand::Sessions).await.unwrap_or_default()
    }

    /// Shared statistics
    #[inline]
    pub fn stats(&self) -> &Arc<RouterStats> {
        &self.stats
    }

    /// Router configuration
    #[inline]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Subscribe to router events
    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }

    /// Take the receiver for redirect replies
    ///
    /// Can only be called once; later calls return `None`.
    pub fn take_reply_rx(&self) -> Option<mpsc::Receiver<SessionReply>> {
        self.reply_rx.lock().take()
    }

    /// Stop every actor and clear the table
    ///
    /// Packets submitted afterwards are ignored. Calling this twice is a no-op.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Session router already stopped");
            return;
        }

        info!(stats = ?self.stats.snapshot(), "Session router stopping...");
        if self.query(RouterCommand::Stop).await.is_none() {
            debug!("Router task already exited");
        }
        info!("Session router stopped");
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RouterCommand,
    ) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await.ok()?;
        rx.await.ok()
    }
}

impl std::fmt::Debug for SessionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRouter")
            .field("redirect", &self.config.redirect_target())
            .field("max_connections", &self.config.max_connections)
            .field("started", &self.is_started())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

/// Owner of the session table
struct RouterTask {
    config: Arc<RouterConfig>,
    stats: Arc<RouterStats>,
    events: broadcast::Sender<RouterEvent>,
    links: ActorLinks,
    sessions: HashMap<SessionKey, ConnectionHandle>,
    next_session_id: u64,
    stopped: bool,
}

impl RouterTask {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<RouterCommand>,
        mut closed: mpsc::UnboundedReceiver<ActorClosed>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some(notice) = closed.recv() => self.on_actor_closed(notice),
            }
        }

        self.shutdown().await;
        trace!("Router task exited");
    }

    async fn handle(&mut self, command: RouterCommand) {
        match command {
            RouterCommand::Input(packet) => self.route(packet),
            RouterCommand::Count(reply) => {
                let _ = reply.send(self.sessions.len());
            }
            RouterCommand::Contains(key, reply) => {
                let _ = reply.send(self.sessions.contains_key(&key));
            }
            RouterCommand::Sessions(reply) => {
                let snapshot = self
                    .sessions
                    .iter()
                    .map(|(key, handle)| SessionSnapshot {
                        session_id: handle.session_id(),
                        key: *key,
                        state: handle.state(),
                    })
                    .collect();
                let _ = reply.send(snapshot);
            }
            RouterCommand::Stop(reply) => {
                self.shutdown().await;
                let _ = reply.send(());
            }
        }
    }

    fn route(&mut self, packet: Packet) {
        let key = packet.key();
        if self.stopped {
            debug!(key = %key, "Router stopped, ignoring packet");
            return;
        }

        self.stats.record_packet_received();

        if let Some(handle) = self.sessions.get(&key) {
            self.forward(handle, packet);
            return;
        }

        let max = self.config.max_connections;
        if self.sessions.len() >= max {
            let err = ConnectionError::limit_reached(self.sessions.len(), max);
            error!(key = %key, "{}, dropping packet", err);
            self.stats.record_dropped_capacity();
            self.emit(RouterEvent::PacketDropped {
                key,
                reason: DropReason::Capacity,
            });
            return;
        }

        let session_id = self.next_session_id;
        self.next_session_id += 1;
        let handle = ConnectionActor::spawn_linked(
            session_id,
            key,
            Arc::clone(&self.config),
            Arc::clone(&self.stats),
            self.links.clone(),
        );
        handle.start();
        self.stats.record_session_created();
        info!(
            session_id,
            key = %key,
            active = self.sessions.len() + 1,
            "New session"
        );
        self.emit(RouterEvent::SessionCreated { session_id, key });

        self.forward(&handle, packet);
        self.sessions.insert(key, handle);
    }

    /// Hand a payload to its actor, dropping it if the actor is backed up
    fn forward(&self, handle: &ConnectionHandle, packet: Packet) {
        let key = packet.key();
        let bytes = packet.len();
        match handle.send(packet.payload) {
            Ok(()) => {
                trace!(session_id = handle.session_id(), key = %key, bytes, "Packet forwarded");
                self.emit(RouterEvent::PacketForwarded { key, bytes });
            }
            Err(err) if err.is_queue_full() => {
                debug!(key = %key, bytes, "{}, dropping packet", err);
                self.stats.record_dropped_busy();
                self.emit(RouterEvent::PacketDropped {
                    key,
                    reason: DropReason::SessionBusy,
                });
            }
            Err(err) => {
                warn!(key = %key, bytes, "{}, dropping packet", err);
            }
        }
    }

    fn on_actor_closed(&mut self, notice: ActorClosed) {
        if !self.config.evict_on_close {
            debug!(session_id = notice.session_id, state = %notice.state, "Session closed, keeping entry");
            return;
        }

        let current = self.sessions.get(&notice.key).map(ConnectionHandle::session_id);
        if current != Some(notice.session_id) {
            // A newer actor already owns this key
            return;
        }

        self.sessions.remove(&notice.key);
        self.stats.record_session_evicted();
        info!(
            session_id = notice.session_id,
            key = %notice.key,
            state = %notice.state,
            active = self.sessions.len(),
            "Session evicted"
        );
        self.emit(RouterEvent::SessionEvicted {
            session_id: notice.session_id,
            key: notice.key,
        });
    }

    async fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let sessions: Vec<_> = self.sessions.drain().collect();
        // Signal every actor first so pending connects and writes unwind together
        for (_, handle) in &sessions {
            handle.stop();
        }
        for (key, handle) in sessions {
            handle.stop_and_wait().await;
            self.stats.record_session_evicted();
            self.emit(RouterEvent::SessionEvicted {
                session_id: handle.session_id(),
                key,
            });
        }
    }

    fn emit(&self, event: RouterEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
