//! Burrow Protocol Definitions
//!
//! This crate defines the control-plane messages exchanged between the tunnel
//! client and server, and the configuration types describing each proxy.

pub mod config;
pub mod messages;

pub use config::{ClientCommonConfig, ClientConfig, ConfigError, ProxyConfig, ProxyType};
pub use messages::*;
