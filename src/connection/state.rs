//! Connection actor lifecycle states

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of a connection actor's redirect socket
///
/// `Idle -> Connecting -> Connected -> {Closed, Failed}`. `Idle`, `Closed`
/// and `Failed` all accept a new start attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Never started
    #[default]
    Idle,
    /// Connect in progress
    Connecting,
    /// Socket established, receive loop running
    Connected,
    /// Stopped, or the redirect peer closed the socket
    Closed,
    /// Connect or receive failed
    Failed,
}

impl ConnectionState {
    /// Whether payloads can be written in this state
    #[inline]
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether `start()` will attempt a new connection from this state
    #[inline]
    #[must_use]
    pub const fn accepts_start(self) -> bool {
        matches!(self, Self::Idle | Self::Closed | Self::Failed)
    }

    /// Whether the connection has ended
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
