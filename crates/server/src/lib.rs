//! usb-serial-bridge server library
//!
//! Exposes USB-serial device access to a remote caller: list attached
//! devices, open one as a serial session (prompting for permission when
//! needed), and stream hot-plug events. The binary serves this over
//! length-prefixed JSON frames on stdin/stdout.

pub mod bridge;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod opener;
pub mod permission;
pub mod relay;
pub mod service;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod usb;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use service::{BridgeService, ServiceOptions};
