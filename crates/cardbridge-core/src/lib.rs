//! Shared data types and configuration for the cardbridge reader adapter.
//!
//! This crate holds the leaf types every other cardbridge crate depends on:
//! device identity ([`DeviceInfo`], [`DeviceKey`], [`TransportKind`]), the
//! reference timeouts in [`constants`], and the configuration layer in
//! [`config`] (device allow-list and plugin settings).

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::{DeviceFilter, PluginConfig, SessionTimeouts};
pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
