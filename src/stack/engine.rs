//! IP-stack engine boundary
//!
//! Header parsing and TCP state live in an external engine. This module only
//! defines what the facade needs from it, plus the packet-out types.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::Ipv4Settings;

/// IP version of a raw packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4
    Ipv4,
    /// IPv6
    Ipv6,
}

impl AddressFamily {
    /// Map an IP version number (4 or 6)
    #[must_use]
    pub const fn from_version(version: u8) -> Option<Self> {
        match version {
            4 => Some(Self::Ipv4),
            6 => Some(Self::Ipv6),
            _ => None,
        }
    }

    /// Read the version nibble of a raw IP packet
    #[must_use]
    pub fn detect(packet: &[u8]) -> Option<Self> {
        packet.first().and_then(|b| Self::from_version(b >> 4))
    }

    /// IP version number
    #[must_use]
    pub const fn version(self) -> u8 {
        match self {
            Self::Ipv4 => 4,
            Self::Ipv6 => 6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4 => f.write_str("ipv4"),
            Self::Ipv6 => f.write_str("ipv6"),
        }
    }
}

/// A packet to inject back onto the virtual interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    /// Complete IP packet
    pub payload: Bytes,
    /// Address family of `payload`
    pub family: AddressFamily,
}

impl OutboundPacket {
    /// Create an outbound packet
    pub fn new(payload: impl Into<Bytes>, family: AddressFamily) -> Self {
        Self {
            payload: payload.into(),
            family,
        }
    }
}

/// Callback that writes a batch of packets to the virtual interface
///
/// May be invoked from any runtime thread.
pub type OutboundHandler = Arc<dyn Fn(Vec<OutboundPacket>) + Send + Sync>;

/// An IP-stack engine fed with raw packets
pub trait PacketEngine: Send + Sync {
    /// Hand a raw IP packet to the engine
    ///
    /// Returns `false` if the engine rejected it.
    fn input(&self, packet: &[u8], family: AddressFamily) -> bool;

    /// Apply interface addressing
    fn configure_ipv4(&self, _settings: &Ipv4Settings) {}

    /// Pause the engine's periodic timer
    fn suspend_timer(&self) {}

    /// Resume the engine's periodic timer
    fn resume_timer(&self) {}
}
