//! Error types for tun-relay
//!
//! Errors are grouped by subsystem. Configuration and stack setup return
//! them to the caller. On the packet path they are only logged and counted
//! in [`crate::connection::RouterStats`]; `input_packet` never fails.

use std::io;

use thiserror::Error;

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

/// Outbound connection errors
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Session table is full
    #[error("Session limit reached ({current}/{max})")]
    LimitReached { current: usize, max: usize },

    /// Connecting to the redirect target failed
    #[error("Failed to connect to {target}: {reason}")]
    ConnectFailed { target: String, reason: String },

    /// Connecting to the redirect target timed out
    #[error("Connection to {target} timed out after {timeout_ms}ms")]
    Timeout { target: String, timeout_ms: u64 },

    /// The redirect target cannot be used (e.g. port 0)
    #[error("Invalid redirect target {host}:{port}")]
    InvalidRedirect { host: String, port: u16 },

    /// A payload was submitted before the connection was established
    #[error("Connection to {target} not established")]
    NotConnected { target: String },

    /// The session already has its full share of payloads queued
    #[error("Session {session_id} queue full ({capacity} payloads pending)")]
    QueueFull { session_id: u64, capacity: usize },

    /// The actor task has exited and accepts no more commands
    #[error("Session {session_id} actor has exited")]
    ActorExited { session_id: u64 },
}

impl ConnectionError {
    /// Create a limit reached error
    pub const fn limit_reached(current: usize, max: usize) -> Self {
        Self::LimitReached { current, max }
    }

    /// Create a connect failed error
    pub fn connect_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a not connected error
    pub fn not_connected(target: impl Into<String>) -> Self {
        Self::NotConnected {
            target: target.into(),
        }
    }

    /// Whether the payload was refused because the session is backed up
    #[must_use]
    pub const fn is_queue_full(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }
}

/// Stack facade errors
#[derive(Debug, Error)]
pub enum StackError {
    /// The outbound packet hook may only be configured once
    #[error("Outbound handler already set")]
    OutboundHandlerAlreadySet,

    /// IPv4 interface settings are inconsistent
    #[error("Invalid IPv4 settings: {0}")]
    InvalidIpv4Settings(String),

    /// An operation needs an attached IP-stack engine
    #[error("No IP stack engine attached")]
    NoEngine,

    /// A raw packet carried no usable IP version
    #[error("Unsupported IP version {0}")]
    UnsupportedVersion(u8),
}
