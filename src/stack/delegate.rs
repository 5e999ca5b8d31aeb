//! Event callbacks from the IP-stack engine
//!
//! Every method has an empty default body, so a delegate only overrides the
//! events it cares about.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::session::SessionKey;

/// A TCP socket accepted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcpSocketInfo {
    /// Engine-assigned socket identifier
    pub socket_id: u64,
    /// Client side of the intercepted flow
    pub src_addr: SocketAddr,
    /// Address the client was connecting to
    pub dst_addr: SocketAddr,
}

impl TcpSocketInfo {
    /// Create socket info
    #[must_use]
    pub const fn new(socket_id: u64, src_addr: SocketAddr, dst_addr: SocketAddr) -> Self {
        Self {
            socket_id,
            src_addr,
            dst_addr,
        }
    }

    /// Session key of the flow this socket carries
    #[must_use]
    pub const fn key(&self) -> SessionKey {
        SessionKey::new(self.src_addr, self.dst_addr)
    }
}

/// Stack-level events
pub trait StackDelegate: Send + Sync {
    /// The engine accepted a new TCP socket
    fn did_accept_tcp_socket(&self, _socket: &TcpSocketInfo) {}
}

/// Per-socket events
pub trait TcpSocketDelegate: Send + Sync {
    /// Data arrived on the socket
    fn did_read_data(&self, _socket: &TcpSocketInfo, _data: &Bytes) {}

    /// The engine acknowledged `len` written bytes
    fn did_write_data(&self, _socket: &TcpSocketInfo, _len: usize) {}

    /// The socket closed normally
    fn did_close(&self, _socket: &TcpSocketInfo) {}

    /// The peer reset the socket
    fn did_reset(&self, _socket: &TcpSocketInfo) {}

    /// The engine aborted the socket
    fn did_abort(&self, _socket: &TcpSocketInfo) {}

    /// The read side was shut down
    fn did_shutdown_read(&self, _socket: &TcpSocketInfo) {}
}

/// Delegate that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDelegate;

impl StackDelegate for NoopDelegate {}
impl TcpSocketDelegate for NoopDelegate {}

/// A socket event as delivered by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Data read from the socket
    Read(Bytes),
    /// Bytes written
    Wrote(usize),
    /// Normal close
    Closed,
    /// Reset by peer
    Reset,
    /// Aborted by the engine
    Aborted,
    /// Read side shut down
    ReadShutdown,
}

impl SocketEvent {
    /// Call the delegate method matching this event
    pub fn dispatch(&self, socket: &TcpSocketInfo, delegate: &dyn TcpSocketDelegate) {
        match self {
            Self::Read(data) => delegate.did_read_data(socket, data),
            Self::Wrote(len) => delegate.did_write_data(socket, *len),
            Self::Closed => delegate.did_close(socket),
            Self::Reset => delegate.did_reset(socket),
            Self::Aborted => delegate.did_abort(socket),
            Self::ReadShutdown => delegate.did_shutdown_read(socket),
        }
    }

    /// Short event name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Read(_) => "read",
            Self::Wrote(_) => "wrote",
            Self::Closed => "closed",
            Self::Reset => "reset",
            Self::Aborted => "aborted",
            Self::ReadShutdown => "read_shutdown",
        }
    }
}
