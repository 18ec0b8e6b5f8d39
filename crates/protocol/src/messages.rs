//! Bridge message definitions
//!
//! Messages are organized into three groups:
//! - Method calls and their replies (`create`, `listDevices`, `close`)
//! - Event stream control (listen/cancel)
//! - Hot-plug events pushed to the current listener

use crate::types::EventRecord;
use crate::version::ProtocolVersion;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Top-level message envelope
///
/// Every frame carries the protocol version for compatibility checking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Protocol version of this message
    pub version: ProtocolVersion,
    /// Message payload
    pub payload: MessagePayload,
}

/// All message types exchanged with the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    /// Remote-procedure request
    Call {
        /// Caller-chosen id echoed in the reply
        id: u64,
        /// Method name
        method: String,
        /// Named arguments
        #[serde(default)]
        arguments: Map<String, Value>,
    },

    /// Successful result of a call
    Reply { id: u64, result: Value },

    /// Failed call
    Error {
        id: u64,
        #[serde(flatten)]
        error: MethodError,
    },

    /// Start listening on the event stream (replaces any prior listener)
    Listen,

    /// Stop listening on the event stream
    Cancel,

    /// Hot-plug event
    Event(EventRecord),
}

/// Error categories reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    MissingArgument,
    NotFound,
    PermissionDenied,
    OpenFailed,
    UnsupportedDevice,
    SubsystemUnavailable,
    ContextUnavailable,
    SecurityError,
    NotImplemented,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingArgument => "MissingArgument",
            ErrorCode::NotFound => "NotFound",
            ErrorCode::PermissionDenied => "PermissionDenied",
            ErrorCode::OpenFailed => "OpenFailed",
            ErrorCode::UnsupportedDevice => "UnsupportedDevice",
            ErrorCode::SubsystemUnavailable => "SubsystemUnavailable",
            ErrorCode::ContextUnavailable => "ContextUnavailable",
            ErrorCode::SecurityError => "SecurityError",
            ErrorCode::NotImplemented => "NotImplemented",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error body of a failed call: code, short message, optional detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl MethodError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CURRENT_VERSION;
    use serde_json::json;

    #[test]
    fn test_call_arguments_default_to_empty() {
        let msg: Message = serde_json::from_value(json!({
            "version": {"major": 1, "minor": 0, "patch": 0},
            "payload": {"type": "call", "id": 7, "method": "listDevices"}
        }))
        .unwrap();

        match msg.payload {
            MessagePayload::Call {
                id,
                method,
                arguments,
            } => {
                assert_eq!(id, 7);
                assert_eq!(method, "listDevices");
                assert!(arguments.is_empty());
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_error_payload_shape() {
        let msg = Message {
            version: CURRENT_VERSION,
            payload: MessagePayload::Error {
                id: 3,
                error: MethodError::new(ErrorCode::NotFound, "No such device found")
                    .with_details("VID: 1027, PID: 24577, DeviceID: any"),
            },
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["payload"]["type"], "error");
        assert_eq!(value["payload"]["id"], 3);
        assert_eq!(value["payload"]["code"], "NotFound");
        assert_eq!(value["payload"]["message"], "No such device found");
    }

    #[test]
    fn test_method_error_display() {
        let err = MethodError::new(ErrorCode::PermissionDenied, "USB permission denied by user");
        assert_eq!(
            err.to_string(),
            "PermissionDenied: USB permission denied by user"
        );
        let err = err.with_details("Device: /dev/bus/usb/001/002");
        assert!(err.to_string().ends_with("(Device: /dev/bus/usb/001/002)"));
    }
}
