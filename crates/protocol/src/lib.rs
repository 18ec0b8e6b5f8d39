//! Protocol library for usb-serial-bridge
//!
//! This crate defines the messages exchanged between the bridge and its
//! caller: method calls (`create`, `listDevices`, `close`) with their replies
//! and errors, event-stream control, and hot-plug event records. It also
//! provides JSON serialization with length-prefixed framing and protocol
//! versioning.
//!
//! # Example
//!
//! ```
//! use protocol::{Message, MessagePayload, CURRENT_VERSION};
//! use protocol::{encode_framed, decode_framed};
//!
//! let msg = Message {
//!     version: CURRENT_VERSION,
//!     payload: MessagePayload::Call {
//!         id: 1,
//!         method: "listDevices".to_string(),
//!         arguments: Default::default(),
//!     },
//! };
//!
//! let framed = encode_framed(&msg).unwrap();
//! let decoded = decode_framed(&framed).unwrap();
//! assert_eq!(decoded, msg);
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;
pub mod version;

pub use codec::{
    MAX_FRAME_SIZE, decode_framed, decode_message, encode_framed, encode_message, read_framed,
    validate_version, write_framed,
};

#[cfg(feature = "async")]
pub use codec::{read_framed_async, write_framed_async};
pub use error::{ProtocolError, Result};
pub use messages::{ErrorCode, Message, MessagePayload, MethodError};
pub use types::{
    ChipSelector, ChipType, DeviceDescriptor, DeviceId, DeviceRecord, DeviceSelector, EventKind,
    EventRecord, InterfaceDescriptor, InterfaceSelector, SESSION_CHANNEL_PREFIX, SessionId,
};
pub use version::{CURRENT_VERSION, ProtocolVersion};
