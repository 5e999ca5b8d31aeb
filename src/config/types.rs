//! Configuration types for tun-relay
//!
//! Configuration is loaded from JSON files and validated at startup.
//! Every section has defaults, so an empty object `{}` is a valid config.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default redirect host
pub const DEFAULT_REDIRECT_HOST: &str = "127.0.0.1";

/// Default redirect port
pub const DEFAULT_REDIRECT_PORT: u16 = 1208;

/// Default maximum concurrent sessions
pub const DEFAULT_MAX_CONNECTIONS: usize = 200;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Session router settings
    #[serde(default)]
    pub router: RouterConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Virtual interface settings handed to the IP stack engine
    #[serde(default)]
    pub stack: StackConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.router.validate()?;
        self.log.validate()?;
        self.stack.validate()?;
        Ok(())
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self::default()
    }
}

/// Session router configuration
///
/// Immutable once handed to [`crate::session::SessionRouter::new`]. Every
/// connection actor created by a router shares the same redirect target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Host all session traffic is redirected to
    #[serde(default = "default_redirect_host")]
    pub redirect_host: String,

    /// Port all session traffic is redirected to
    #[serde(default = "default_redirect_port")]
    pub redirect_port: u16,

    /// Maximum number of concurrent sessions
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Outbound connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Read buffer size for the receive loop
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,

    /// Depth of the router's inbound packet queue
    #[serde(default = "default_packet_queue_size")]
    pub packet_queue_size: usize,

    /// Depth of the reply queue fed by receive loops
    #[serde(default = "default_reply_queue_size")]
    pub reply_queue_size: usize,

    /// Payloads a single session may have queued or in flight before
    /// further payloads for it are dropped
    #[serde(default = "default_session_queue_size")]
    pub session_queue_size: usize,

    /// Remove a session from the table once its redirect connection closes
    #[serde(default = "default_true")]
    pub evict_on_close: bool,
}

impl RouterConfig {
    /// Create a configuration pointing at `host:port` with other fields defaulted
    pub fn new(redirect_host: impl Into<String>, redirect_port: u16) -> Self {
        Self {
            redirect_host: redirect_host.into(),
            redirect_port,
            ..Self::default()
        }
    }

    /// Set the maximum number of concurrent sessions
    #[must_use]
    pub const fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set the outbound connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the per-session payload queue depth
    #[must_use]
    pub const fn with_session_queue_size(mut self, session_queue_size: usize) -> Self {
        self.session_queue_size = session_queue_size;
        self
    }

    /// Validate router configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redirect_host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "redirect_host cannot be empty".into(),
            ));
        }

        if self.redirect_port == 0 {
            return Err(ConfigError::ValidationError(
                "redirect_port must be greater than 0".into(),
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.recv_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "recv_buffer_size must be greater than 0".into(),
            ));
        }

        if self.packet_queue_size == 0
            || self.reply_queue_size == 0
            || self.session_queue_size == 0
        {
            return Err(ConfigError::ValidationError(
                "queue sizes must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Get connect timeout as Duration
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `host:port` form of the redirect target, used in logs
    #[must_use]
    pub fn redirect_target(&self) -> String {
        format!("{}:{}", self.redirect_host, self.redirect_port)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            redirect_host: default_redirect_host(),
            redirect_port: DEFAULT_REDIRECT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_ms: default_connect_timeout_ms(),
            recv_buffer_size: default_recv_buffer_size(),
            packet_queue_size: default_packet_queue_size(),
            reply_queue_size: default_reply_queue_size(),
            session_queue_size: default_session_queue_size(),
            evict_on_close: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl LogConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.format.as_str(), "json" | "text") {
            return Err(ConfigError::ValidationError(format!(
                "Unknown log format '{}' (expected json or text)",
                self.format
            )));
        }
        Ok(())
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

/// Virtual interface settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StackConfig {
    /// IPv4 address configuration for the engine's interface
    #[serde(default)]
    pub ipv4: Option<Ipv4Settings>,
}

impl StackConfig {
    /// Validate stack configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref ipv4) = self.ipv4 {
            ipv4.validate().map_err(ConfigError::ValidationError)?;
        }
        Ok(())
    }
}

/// IPv4 address, netmask and gateway of the virtual interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Ipv4Settings {
    /// Interface address
    pub address: Ipv4Addr,
    /// Subnet mask
    pub netmask: Ipv4Addr,
    /// Gateway address
    pub gateway: Ipv4Addr,
}

impl Ipv4Settings {
    /// Create new settings
    #[must_use]
    pub const fn new(address: Ipv4Addr, netmask: Ipv4Addr, gateway: Ipv4Addr) -> Self {
        Self {
            address,
            netmask,
            gateway,
        }
    }

    /// Check that the mask is contiguous and the gateway shares the subnet
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        let mask = u32::from(self.netmask);
        if mask.leading_ones() + mask.trailing_zeros() != 32 {
            return Err(format!("netmask {} is not contiguous", self.netmask));
        }
        if self.address == self.gateway {
            return Err(format!("address and gateway are both {}", self.address));
        }
        if !self.contains(self.gateway) {
            return Err(format!(
                "gateway {} is outside {}/{}",
                self.gateway,
                self.address,
                self.prefix_len()
            ));
        }
        Ok(())
    }

    /// Prefix length of the netmask
    #[must_use]
    pub fn prefix_len(&self) -> u32 {
        u32::from(self.netmask).leading_ones()
    }

    /// Whether `ip` is in the interface's subnet
    #[must_use]
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(ip) & mask == u32::from(self.address) & mask
    }
}

// Default value functions for serde
const fn default_true() -> bool {
    true
}

fn default_redirect_host() -> String {
    DEFAULT_REDIRECT_HOST.into()
}

const fn default_redirect_port() -> u16 {
    DEFAULT_REDIRECT_PORT
}

const fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

const fn default_connect_timeout_ms() -> u64 {
    10_000
}

const fn default_recv_buffer_size() -> usize {
    64 * 1024
}

const fn default_packet_queue_size() -> usize {
    4096
}

const fn default_reply_queue_size() -> usize {
    4096
}

const fn default_session_queue_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}
