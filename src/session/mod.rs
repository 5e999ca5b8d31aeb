//! Session routing
//!
//! Packets are keyed by their (source, destination) tuple and routed to one
//! [`crate::connection::ConnectionActor`] per key, up to
//! [`crate::config::RouterConfig::max_connections`] sessions.

mod events;
mod key;
mod packet;
mod router;

pub use events::{DropReason, RouterEvent};
pub use key::SessionKey;
pub use packet::{Packet, PacketTemplate};
pub use router::{SessionRouter, SessionSnapshot, EVENT_CHANNEL_SIZE};
