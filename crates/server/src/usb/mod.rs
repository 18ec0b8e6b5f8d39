//! USB subsystem
//!
//! The bridge talks to the host OS USB stack through [`UsbSubsystem`]:
//! device enumeration, permission query and request, and opening a
//! low-level connection. Hot-plug and permission outcomes arrive
//! asynchronously on the broadcast channel handed to the subsystem at
//! construction.
//!
//! The libusb-backed implementation lives in [`manager`]; it runs a
//! dedicated event thread ([`worker`]) so hot-plug callbacks fire without
//! blocking the Tokio runtime.

pub mod device;
pub mod manager;
pub mod worker;

pub use device::RusbConnection;
pub use manager::{PermissionPolicy, RusbSubsystem};
pub use worker::{UsbEventThread, spawn_usb_event_thread};

use protocol::{DeviceDescriptor, DeviceId};
use thiserror::Error;

/// Errors raised by the OS USB layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    /// The USB service cannot be reached
    #[error("{0}")]
    Unavailable(String),

    /// A platform handle required for the call is missing
    #[error("{0}")]
    ContextUnavailable(String),

    /// The OS refused access (revoked permission, node not accessible)
    #[error("{0}")]
    Access(String),

    #[error("{0}")]
    Other(String),
}

impl From<rusb::Error> for HostError {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::Access => HostError::Access(e.to_string()),
            _ => HostError::Other(e.to_string()),
        }
    }
}

/// Host OS USB subsystem
///
/// Calls are quick and synchronous; anything slow (the user answering a
/// permission prompt) is reported later as a broadcast.
pub trait UsbSubsystem: Send + Sync {
    /// Fail early if the platform handles needed for permission requests
    /// are missing
    fn check_available(&self) -> Result<(), HostError> {
        Ok(())
    }

    /// Snapshot of all attached devices
    fn device_list(&self) -> Result<Vec<DeviceDescriptor>, HostError>;

    /// Whether the caller may open this device right now
    fn has_permission(&self, device: &DeviceDescriptor) -> bool;

    /// Ask the user for access. The answer arrives as a
    /// `HostBroadcast::PermissionResult` for `device.device_id`.
    fn request_permission(&self, device: &DeviceDescriptor) -> Result<(), HostError>;

    /// Drop any grant held for a device that has left. OS ids are reused
    /// once the bus address is handed to another device.
    fn forget(&self, device_id: DeviceId);

    /// Open a low-level connection
    ///
    /// `Ok(None)` means the OS gave no usable connection (device busy,
    /// gone, or otherwise refused).
    fn open_device(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<Option<Box<dyn UsbConnection>>, HostError>;
}

/// An open low-level connection to one device
pub trait UsbConnection: Send {
    /// Claim an interface for exclusive use
    fn claim_interface(&mut self, number: u8) -> Result<(), HostError>;

    /// Release claimed interfaces and close. Idempotent.
    fn close(&mut self);
}
