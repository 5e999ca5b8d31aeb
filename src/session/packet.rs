//! Decoded packets fed into the session router

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::Bytes;

use super::key::SessionKey;

/// A packet after the IP stack engine has stripped the headers
///
/// This is the router's only input type, whether it came from the real
/// engine or from a synthetic generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Source address and port
    pub src_addr: SocketAddr,
    /// Destination address and port
    pub dst_addr: SocketAddr,
    /// TCP payload, possibly empty
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet from its five fields
    pub fn new(
        src_ip: IpAddr,
        src_port: u16,
        dst_ip: IpAddr,
        dst_port: u16,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            src_addr: SocketAddr::new(src_ip, src_port),
            dst_addr: SocketAddr::new(dst_ip, dst_port),
            payload: payload.into(),
        }
    }

    /// Create a packet from socket addresses
    pub fn from_addrs(src_addr: SocketAddr, dst_addr: SocketAddr, payload: impl Into<Bytes>) -> Self {
        Self {
            src_addr,
            dst_addr,
            payload: payload.into(),
        }
    }

    /// Session key of this packet
    #[must_use]
    pub const fn key(&self) -> SessionKey {
        SessionKey::new(self.src_addr, self.dst_addr)
    }

    /// Payload length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Builds packets for a fixed address tuple
///
/// Used by the demo binary and tests in place of a real tun device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketTemplate {
    /// Source address stamped on every packet
    pub src_addr: SocketAddr,
    /// Destination address stamped on every packet
    pub dst_addr: SocketAddr,
}

impl PacketTemplate {
    /// Create a template for the given tuple
    #[must_use]
    pub const fn new(src_addr: SocketAddr, dst_addr: SocketAddr) -> Self {
        Self { src_addr, dst_addr }
    }

    /// Same template with a different source port
    #[must_use]
    pub const fn with_src_port(mut self, port: u16) -> Self {
        self.src_addr = SocketAddr::new(self.src_addr.ip(), port);
        self
    }

    /// Build a packet carrying `payload`
    pub fn build(&self, payload: impl Into<Bytes>) -> Packet {
        Packet::from_addrs(self.src_addr, self.dst_addr, payload)
    }

    /// Session key every packet from this template maps to
    #[must_use]
    pub const fn key(&self) -> SessionKey {
        SessionKey::new(self.src_addr, self.dst_addr)
    }
}

impl Default for PacketTemplate {
    fn default() -> Self {
        Self {
            src_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 12345),
            dst_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)), 80),
        }
    }
}
