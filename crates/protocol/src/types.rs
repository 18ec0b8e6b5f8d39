//! USB and bridge type definitions
//!
//! This module defines the device snapshot handed out by the directory, the
//! wire records derived from it, and the typed selectors that replace the
//! "any"/"auto" sentinel values callers send in method arguments.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OS-assigned device identifier
///
/// Ephemeral: the OS may hand the same number to a different device after a
/// replug. Never cache it across enumerations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub i32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serial session identifier (bridge-assigned)
///
/// Allocated monotonically for each successful open. The caller addresses
/// the session through its channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u32);

/// Prefix of every session channel name
pub const SESSION_CHANNEL_PREFIX: &str = "usb_serial/port/";

impl SessionId {
    /// Channel name returned to the caller for this session
    pub fn channel_name(&self) -> String {
        format!("{}{}", SESSION_CHANNEL_PREFIX, self.0)
    }

    /// Parse a channel name back into a session id
    pub fn from_channel_name(name: &str) -> Option<Self> {
        name.strip_prefix(SESSION_CHANNEL_PREFIX)?
            .parse()
            .ok()
            .map(SessionId)
    }
}

/// One interface of the active configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

/// Identifying snapshot of a physical USB device
///
/// Re-fetched on every enumeration. `serial_number` is only populated when
/// the subsystem reports permission for the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// OS-assigned device id
    pub device_id: DeviceId,
    /// Display name (device node path)
    pub device_name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    /// Interfaces of the active configuration
    pub interfaces: Vec<InterfaceDescriptor>,
}

impl DeviceDescriptor {
    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    /// True if this device carries the given VID/PID pair
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }

    /// Wire record for this snapshot
    pub fn to_record(&self) -> DeviceRecord {
        DeviceRecord::from(self)
    }
}

/// Device record as sent to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_name: String,
    pub vid: u16,
    pub pid: u16,
    pub device_id: DeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl From<&DeviceDescriptor> for DeviceRecord {
    fn from(device: &DeviceDescriptor) -> Self {
        Self {
            device_name: device.device_name.clone(),
            vid: device.vendor_id,
            pid: device.product_id,
            device_id: device.device_id,
            manufacturer_name: device.manufacturer.clone(),
            product_name: device.product.clone(),
            interface_count: Some(device.interface_count()),
            serial_number: device.serial_number.clone(),
        }
    }
}

/// Hot-plug event tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Attached,
    Detached,
}

/// Hot-plug notification pushed on the event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event: EventKind,
    #[serde(flatten)]
    pub device: DeviceRecord,
}

impl EventRecord {
    pub fn new(event: EventKind, device: &DeviceDescriptor) -> Self {
        Self {
            event,
            device: device.to_record(),
        }
    }
}

/// Serial chip families understood by the driver layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChipType {
    /// CDC-ACM class devices
    Cdc,
    /// WCH CH340/CH341
    Ch34x,
    /// Silicon Labs CP210x
    Cp210x,
    /// FTDI FT232 family
    Ftdi,
    /// Prolific PL2303
    Pl2303,
}

impl ChipType {
    pub const ALL: [ChipType; 5] = [
        ChipType::Cdc,
        ChipType::Ch34x,
        ChipType::Cp210x,
        ChipType::Ftdi,
        ChipType::Pl2303,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChipType::Cdc => "cdc",
            ChipType::Ch34x => "ch34x",
            ChipType::Cp210x => "cp210x",
            ChipType::Ftdi => "ftdi",
            ChipType::Pl2303 => "pl2303",
        }
    }
}

impl fmt::Display for ChipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChipType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ChipType::ALL
            .into_iter()
            .find(|chip| chip.as_str() == lower)
            .ok_or_else(|| format!("Unknown chip type: {}", s))
    }
}

/// Which driver to bind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChipSelector {
    /// Let the driver classify the device
    Auto,
    /// Bind a specific chip driver
    Named(ChipType),
    /// A type name no driver recognizes; construction will fail
    Unrecognized(String),
}

impl ChipSelector {
    /// Map the raw `type` argument: absent or empty selects auto-detection
    pub fn from_arg(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => ChipSelector::Auto,
            Some(name) => match name.parse() {
                Ok(chip) => ChipSelector::Named(chip),
                Err(_) => ChipSelector::Unrecognized(name.to_string()),
            },
        }
    }
}

impl fmt::Display for ChipSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipSelector::Auto => f.write_str("auto"),
            ChipSelector::Named(chip) => write!(f, "{}", chip),
            ChipSelector::Unrecognized(name) => write!(f, "{} (unrecognized)", name),
        }
    }
}

/// Which USB interface to bind the serial driver to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceSelector {
    /// First suitable interface
    Auto,
    Index(u32),
}

impl InterfaceSelector {
    /// Map the raw `interface` argument: absent or negative selects auto
    pub fn from_arg(raw: Option<i64>) -> Self {
        match raw {
            Some(n) if n >= 0 => InterfaceSelector::Index(u32::try_from(n).unwrap_or(u32::MAX)),
            _ => InterfaceSelector::Auto,
        }
    }
}

impl fmt::Display for InterfaceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceSelector::Auto => f.write_str("auto"),
            InterfaceSelector::Index(n) => write!(f, "{}", n),
        }
    }
}

/// Preferred OS device id for a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelector {
    /// No preference; first VID/PID match wins
    Any,
    Id(DeviceId),
}

impl DeviceSelector {
    /// Map the raw `deviceId` argument: absent, 0 and -1 are placeholders
    pub fn from_arg(raw: Option<i32>) -> Self {
        match raw {
            None | Some(0) | Some(-1) => DeviceSelector::Any,
            Some(id) => DeviceSelector::Id(DeviceId(id)),
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Any => f.write_str("any"),
            DeviceSelector::Id(id) => write!(f, "{}", id),
        }
    }
}
