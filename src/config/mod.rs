//! Configuration module for tun-relay
//!
//! # Example
//!
//! ```no_run
//! use tun_relay::config::load_config;
//!
//! let config = load_config("/etc/tun-relay/config.json").unwrap();
//! println!("Redirect target: {}", config.router.redirect_target());
//! ```

mod loader;
mod types;

pub use loader::{
    apply_env_overrides, create_default_config, load_config, load_config_str,
    load_config_with_env,
};
pub use types::{
    Config, Ipv4Settings, LogConfig, RouterConfig, StackConfig, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_REDIRECT_HOST, DEFAULT_REDIRECT_PORT,
};
