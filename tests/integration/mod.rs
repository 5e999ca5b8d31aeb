//! Integration tests for tun-relay
//!
//! This module contains integration tests that run the router, connection
//! actors and stack facade against real loopback sockets.
//!
//! # Test Organization
//!
//! - `sink`: mock redirect target and polling helpers
//! - `router`: session reuse, capacity, ordering, failure and eviction
//! - `stack`: stack facade, delegates, engine and packet-out hook
//!
//! # Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test --test integration_tests
//!
//! # Run specific test module
//! cargo test --test integration_tests router
//! ```
//!
//! # Test Requirements
//!
//! - Tests bind ephemeral ports on 127.0.0.1 and need no privileges

pub mod router;
pub mod stack;
