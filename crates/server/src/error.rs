//! Bridge error types
//!
//! Every failure a method call can produce. Each variant maps onto one
//! wire [`ErrorCode`] with a short message and an optional detail string.

use crate::usb::HostError;
use protocol::{ErrorCode, MethodError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Request is missing or has a malformed required argument
    #[error("{0}")]
    MissingArgument(String),

    /// No device matched the lookup
    #[error("No such device found")]
    DeviceNotFound {
        vendor_id: i64,
        product_id: i64,
        device_id: String,
    },

    /// No open session for the given channel
    #[error("No such session: {0}")]
    SessionNotFound(String),

    /// User refused, or permission could not be obtained
    #[error("{reason}")]
    PermissionDenied { reason: String, device: String },

    /// OS returned no usable connection, or setup failed unexpectedly
    #[error("{message}")]
    OpenFailed {
        message: String,
        details: Option<String>,
    },

    /// Driver could not classify the device or bind the interface
    #[error("Not a serial device or type/interface mismatch")]
    UnsupportedDevice { device: String, details: String },

    /// OS USB service handle missing
    #[error("USB subsystem unavailable: {0}")]
    SubsystemUnavailable(String),

    /// Platform context missing
    #[error("Platform context unavailable: {0}")]
    ContextUnavailable(String),

    /// OS refused access below the permission layer
    #[error("USB security error: {0}")]
    Security(String),

    /// Unknown method
    #[error("Method not implemented: {0}")]
    NotImplemented(String),
}

impl BridgeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::MissingArgument(_) => ErrorCode::MissingArgument,
            BridgeError::DeviceNotFound { .. } | BridgeError::SessionNotFound(_) => {
                ErrorCode::NotFound
            }
            BridgeError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            BridgeError::OpenFailed { .. } => ErrorCode::OpenFailed,
            BridgeError::UnsupportedDevice { .. } => ErrorCode::UnsupportedDevice,
            BridgeError::SubsystemUnavailable(_) => ErrorCode::SubsystemUnavailable,
            BridgeError::ContextUnavailable(_) => ErrorCode::ContextUnavailable,
            BridgeError::Security(_) => ErrorCode::SecurityError,
            BridgeError::NotImplemented(_) => ErrorCode::NotImplemented,
        }
    }

    /// Optional detail string sent alongside the message
    pub fn details(&self) -> Option<String> {
        match self {
            BridgeError::DeviceNotFound {
                vendor_id,
                product_id,
                device_id,
            } => Some(format!(
                "VID: {}, PID: {}, DeviceID: {}",
                vendor_id, product_id, device_id
            )),
            BridgeError::PermissionDenied { device, .. } => Some(format!("Device: {}", device)),
            BridgeError::OpenFailed { details, .. } => details.clone(),
            BridgeError::UnsupportedDevice { device, details } => {
                Some(format!("{} ({})", details, device))
            }
            BridgeError::Security(_) => {
                Some("Permission might have been revoked or is missing unexpectedly.".to_string())
            }
            _ => None,
        }
    }

    pub fn to_method_error(&self) -> MethodError {
        let error = MethodError::new(self.code(), self.to_string());
        match self.details() {
            Some(details) => error.with_details(details),
            None => error,
        }
    }
}

impl From<HostError> for BridgeError {
    fn from(e: HostError) -> Self {
        match e {
            HostError::Unavailable(msg) => BridgeError::SubsystemUnavailable(msg),
            HostError::ContextUnavailable(msg) => BridgeError::ContextUnavailable(msg),
            HostError::Access(msg) => BridgeError::Security(msg),
            HostError::Other(msg) => BridgeError::OpenFailed {
                message: format!("Failed to configure USB device: {}", msg),
                details: None,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
