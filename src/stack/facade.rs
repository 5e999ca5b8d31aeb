//! Stack facade
//!
//! [`TunStack`] is what the surrounding application talks to. Decoded
//! packets go to the [`SessionRouter`]; raw packets go to the attached
//! [`PacketEngine`]; engine events fan out to the registered delegates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::delegate::{SocketEvent, StackDelegate, TcpSocketDelegate, TcpSocketInfo};
use super::engine::{AddressFamily, OutboundHandler, OutboundPacket, PacketEngine};
use crate::config::{Config, Ipv4Settings, RouterConfig};
use crate::connection::{RouterStats, SessionReply};
use crate::error::StackError;
use crate::session::{Packet, SessionRouter};

/// Entry point for feeding packets and engine events into the relay
pub struct TunStack {
    router: Arc<SessionRouter>,
    engine: Option<Arc<dyn PacketEngine>>,
    outbound: OnceLock<OutboundHandler>,
    delegate: RwLock<Option<Arc<dyn StackDelegate>>>,
    socket_delegate: RwLock<Option<Arc<dyn TcpSocketDelegate>>>,
    ipv4: RwLock<Option<Ipv4Settings>>,
    reply_task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl TunStack {
    /// Create a stack without an engine
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(config: RouterConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a stack that forwards raw packets to `engine`
    pub fn with_engine(config: RouterConfig, engine: Arc<dyn PacketEngine>) -> Self {
        Self::build(config, Some(engine))
    }

    /// Create a stack from a full configuration, applying `stack.ipv4` if set
    ///
    /// # Errors
    ///
    /// Returns [`StackError::InvalidIpv4Settings`] if the interface settings are inconsistent.
    pub fn from_config(
        config: &Config,
        engine: Option<Arc<dyn PacketEngine>>,
    ) -> Result<Self, StackError> {
        let stack = Self::build(config.router.clone(), engine);
        if let Some(settings) = config.stack.ipv4 {
            stack.configure_ipv4(settings)?;
        }
        Ok(stack)
    }

    fn build(config: RouterConfig, engine: Option<Arc<dyn PacketEngine>>) -> Self {
        Self {
            router: Arc::new(SessionRouter::new(config)),
            engine,
            outbound: OnceLock::new(),
            delegate: RwLock::new(None),
            socket_delegate: RwLock::new(None),
            ipv4: RwLock::new(None),
            reply_task: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Start the router, resume the engine timer and begin draining replies
    ///
    /// Idempotent. A stack cannot be restarted once stopped.
    pub fn start(&self) {
        if self.router.is_stopped() {
            warn!("Stack was stopped and cannot be restarted");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Stack already running");
            return;
        }

        self.router.start();
        if let Some(ref engine) = self.engine {
            engine.resume_timer();
        }
        if let Some(rx) = self.router.take_reply_rx() {
            *self.reply_task.lock() = Some(tokio::spawn(drain_replies(rx)));
        }
        info!("Stack started");
    }

    /// Stop the router and every connection
    ///
    /// Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Stack not running");
            return;
        }

        if let Some(task) = self.reply_task.lock().take() {
            task.abort();
        }
        if let Some(ref engine) = self.engine {
            engine.suspend_timer();
        }
        self.router.stop().await;
        info!(stats = ?self.router.stats().snapshot(), "Stack stopped");
    }

    /// Whether the stack is running
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Route a decoded packet
    pub async fn input_packet(&self, packet: Packet) {
        self.router.input_packet(packet).await;
    }

    /// Route a decoded packet without waiting for queue space
    pub fn try_input_packet(&self, packet: Packet) -> bool {
        self.router.try_input_packet(packet)
    }

    /// Hand a raw IP packet to the engine
    ///
    /// A `version` of 0 means unknown; the family is then read from the
    /// packet's version nibble. Returns `false` if no engine is attached,
    /// the version is not 4 or 6, or the engine rejected the packet.
    pub fn inbound(&self, packet: &[u8], version: u8) -> bool {
        let Some(ref engine) = self.engine else {
            trace!("{}, dropping {} byte packet", StackError::NoEngine, packet.len());
            return false;
        };
        let family = match version {
            0 => AddressFamily::detect(packet),
            v => AddressFamily::from_version(v),
        };
        let Some(family) = family else {
            let err = StackError::UnsupportedVersion(version);
            debug!("{}, dropping {} byte packet", err, packet.len());
            return false;
        };
        engine.input(packet, family)
    }

    /// Validate interface addressing and pass it to the engine
    ///
    /// # Errors
    ///
    /// Returns [`StackError::InvalidIpv4Settings`] if the settings are inconsistent.
    pub fn configure_ipv4(&self, settings: Ipv4Settings) -> Result<(), StackError> {
        settings.validate().map_err(StackError::InvalidIpv4Settings)?;
        *self.ipv4.write() = Some(settings);
        if let Some(ref engine) = self.engine {
            engine.configure_ipv4(&settings);
        }
        info!(
            address = %settings.address,
            prefix = settings.prefix_len(),
            gateway = %settings.gateway,
            "IPv4 interface configured"
        );
        Ok(())
    }

    /// Current interface addressing
    pub fn ipv4_settings(&self) -> Option<Ipv4Settings> {
        *self.ipv4.read()
    }

    /// Register the packet-out hook
    ///
    /// # Errors
    ///
    /// Returns [`StackError::OutboundHandlerAlreadySet`] on a second call.
    pub fn set_outbound_handler<F>(&self, handler: F) -> Result<(), StackError>
    where
        F: Fn(Vec<OutboundPacket>) + Send + Sync + 'static,
    {
        self.outbound
            .set(Arc::new(handler))
            .map_err(|_| StackError::OutboundHandlerAlreadySet)
    }

    /// Emit a batch through the packet-out hook
    ///
    /// Returns `false` if no hook is registered.
    pub fn write_packets(&self, packets: Vec<OutboundPacket>) -> bool {
        let Some(handler) = self.outbound.get() else {
            debug!("No outbound handler, dropping {} packets", packets.len());
            return false;
        };
        handler(packets);
        true
    }

    /// Register the stack delegate, replacing any previous one
    pub fn set_delegate(&self, delegate: Arc<dyn StackDelegate>) {
        *self.delegate.write() = Some(delegate);
    }

    /// Register the socket delegate, replacing any previous one
    pub fn set_socket_delegate(&self, delegate: Arc<dyn TcpSocketDelegate>) {
        *self.socket_delegate.write() = Some(delegate);
    }

    /// Report a socket accepted by the engine
    pub fn accept_tcp_socket(&self, socket: &TcpSocketInfo) {
        let delegate = self.delegate.read().clone();
        trace!(socket_id = socket.socket_id, key = %socket.key(), "Accepted TCP socket");
        if let Some(delegate) = delegate {
            delegate.did_accept_tcp_socket(socket);
        }
    }

    /// Report a socket event from the engine
    pub fn handle_socket_event(&self, socket: &TcpSocketInfo, event: &SocketEvent) {
        let delegate = self.socket_delegate.read().clone();
        trace!(socket_id = socket.socket_id, event = event.name(), "Socket event");
        if let Some(delegate) = delegate {
            event.dispatch(socket, delegate.as_ref());
        }
    }

    /// Session router behind this stack
    #[inline]
    pub fn router(&self) -> &Arc<SessionRouter> {
        &self.router
    }

    /// Router statistics
    #[inline]
    pub fn stats(&self) -> &Arc<RouterStats> {
        self.router.stats()
    }
}

impl std::fmt::Debug for TunStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunStack")
            .field("router", &self.router)
            .field("has_engine", &self.engine.is_some())
            .field("has_outbound", &self.outbound.get().is_some())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Log replies from redirect targets
async fn drain_replies(mut rx: mpsc::Receiver<SessionReply>) {
    while let Some(reply) = rx.recv().await {
        debug!(key = %reply.key, bytes = reply.data.len(), "Reply from redirect target");
    }
    trace!("Reply channel closed");
}
