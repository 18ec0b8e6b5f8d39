//! Common utilities for usb-serial-bridge
//!
//! This crate provides functionality shared between the bridge service and
//! its tests: error handling, logging setup, the broadcast channel that
//! carries OS notifications (hot-plug, permission results) from the USB
//! subsystem into the async runtime, and test helpers.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{BroadcastReceiver, BroadcastSender, HostBroadcast, create_broadcast_channel};
pub use error::{Error, Result};
pub use logging::setup_logging;
