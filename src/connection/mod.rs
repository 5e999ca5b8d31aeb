//! Connection handling module
//!
//! This module provides the per-session connection actor, including:
//! - Lazy connect to the redirect target with a timeout
//! - Ordered payload delivery per session
//! - A receive loop that publishes replies
//! - Statistics collection

mod actor;
mod state;
mod stats;

pub(crate) use actor::{ActorClosed, ActorLinks};
pub use actor::{ConnectionActor, ConnectionHandle, SessionReply};
pub use state::ConnectionState;
pub use stats::{RouterStats, StatsSnapshot};
