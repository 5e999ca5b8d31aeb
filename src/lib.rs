//! tun-relay: session router for tun-captured TCP traffic
//!
//! This crate relays TCP payloads intercepted on a virtual network interface
//! to a fixed redirect endpoint, one outbound connection per session. Header
//! parsing and TCP state belong to an external IP-stack engine; this crate
//! only deals in decoded packets, socket events and packet-out batches.
//!
//! # Features
//!
//! - **Session routing**: one connection actor per (source, destination) tuple
//! - **Capacity bound**: packets for new sessions beyond the limit are dropped
//! - **Ordered delivery**: payloads of one session reach the socket in order
//! - **Observability**: statistics counters and a broadcast event stream
//!
//! # Architecture
//!
//! ```text
//! engine ──► TunStack ──► SessionRouter ──► ConnectionActor ──► redirect host:port
//!               │                                 │
//!          delegates                        SessionReply
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use tun_relay::config::RouterConfig;
//! use tun_relay::session::PacketTemplate;
//! use tun_relay::stack::TunStack;
//!
//! # async fn example() {
//! let stack = TunStack::new(RouterConfig::new("127.0.0.1", 1208));
//! stack.start();
//!
//! let template = PacketTemplate::default();
//! stack.input_packet(template.build("Hello Fake TCP\n")).await;
//!
//! stack.stop().await;
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`connection`]: Connection actors and statistics
//! - [`error`]: Error types
//! - [`session`]: Session keys, packets and the session router
//! - [`stack`]: Stack facade and engine boundary

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod connection;
pub mod error;
pub mod session;
pub mod stack;

// Re-export commonly used types at the crate root
pub use config::{Config, RouterConfig};
pub use connection::{ConnectionHandle, ConnectionState, RouterStats, SessionReply, StatsSnapshot};
pub use error::{ConfigError, ConnectionError, StackError};
pub use session::{Packet, PacketTemplate, RouterEvent, SessionKey, SessionRouter};
pub use stack::{OutboundPacket, PacketEngine, TunStack};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
