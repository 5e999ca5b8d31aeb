//! Stack facade and IP-stack engine boundary
//!
//! This module provides:
//! - [`TunStack`]: packet-in, lifecycle and delegate registration
//! - [`PacketEngine`]: the contract an external IP-stack engine implements
//! - [`StackDelegate`] / [`TcpSocketDelegate`]: engine event callbacks with no-op defaults

mod delegate;
mod engine;
mod facade;

pub use delegate::{NoopDelegate, SocketEvent, StackDelegate, TcpSocketDelegate, TcpSocketInfo};
pub use engine::{AddressFamily, OutboundHandler, OutboundPacket, PacketEngine};
pub use facade::TunStack;
