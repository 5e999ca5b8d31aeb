//! Router events
//!
//! The packet path never returns errors, so these events (together with
//! [`crate::connection::RouterStats`]) are how callers observe what the
//! router did with each packet.

use std::fmt;

use super::key::SessionKey;

/// Why a packet was dropped by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// The session table was at `max_connections`
    Capacity,
    /// The router command queue was full
    QueueFull,
    /// The session's actor already had its full share of payloads pending
    SessionBusy,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capacity => f.write_str("session limit reached"),
            Self::QueueFull => f.write_str("router queue full"),
            Self::SessionBusy => f.write_str("session queue full"),
        }
    }
}

/// Lifecycle event published on the router's broadcast channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// A connection actor was created for a new session
    SessionCreated { session_id: u64, key: SessionKey },
    /// A payload was handed to the session's actor
    PacketForwarded { key: SessionKey, bytes: usize },
    /// A packet was discarded
    PacketDropped { key: SessionKey, reason: DropReason },
    /// A session was removed from the table
    SessionEvicted { session_id: u64, key: SessionKey },
}

impl RouterEvent {
    /// Session key the event refers to
    #[must_use]
    pub const fn key(&self) -> SessionKey {
        match self {
            Self::SessionCreated { key, .. }
            | Self::PacketForwarded { key, .. }
            | Self::PacketDropped { key, .. }
            | Self::SessionEvicted { key, .. } => *key,
        }
    }
}
