//! Session key derived from a packet's address/port tuple

use std::fmt;
use std::net::SocketAddr;

/// Identifies one relayed TCP session
///
/// A key is the (source, destination) address pair of the intercepted flow.
/// The router keeps at most one connection actor per key.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SessionKey {
    /// Source socket address (client side of the tunnel)
    pub src_addr: SocketAddr,
    /// Destination socket address the client was trying to reach
    pub dst_addr: SocketAddr,
}

impl SessionKey {
    /// Create a new session key
    #[must_use]
    pub const fn new(src_addr: SocketAddr, dst_addr: SocketAddr) -> Self {
        Self { src_addr, dst_addr }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src_addr, self.dst_addr)
    }
}
