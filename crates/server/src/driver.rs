//! Serial driver layer
//!
//! Classifies an opened device as one of the supported serial chips and
//! binds it to an interface. Line settings and data transfer belong to the
//! session owner, not to the bridge.

use crate::usb::{HostError, UsbConnection};
use protocol::{ChipSelector, ChipType, DeviceDescriptor, InterfaceSelector};
use tracing::debug;

/// CDC communications interface class
pub const CDC_COMM_CLASS: u8 = 0x02;
/// CDC data interface class
pub const CDC_DATA_CLASS: u8 = 0x0a;

/// Known VID/PID pairs of the proprietary chips
const KNOWN_CHIPS: &[(ChipType, u16, &[u16])] = &[
    (
        ChipType::Ftdi,
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
    ),
    (ChipType::Cp210x, 0x10c4, &[0xea60, 0xea70, 0xea71, 0xea80]),
    (ChipType::Ch34x, 0x1a86, &[0x7523, 0x5523]),
    (ChipType::Pl2303, 0x067b, &[0x2303, 0x23a3]),
];

/// A device bound to a serial driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialPort {
    pub chip: ChipType,
    /// Interface claimed for the session
    pub interface: u8,
}

/// Serial driver collaborator
pub trait SerialDriver: Send + Sync {
    /// Classify the device and claim the interface for it
    ///
    /// `Ok(None)` means the device is not a serial device or the requested
    /// type/interface does not fit it.
    fn create(
        &self,
        chip: &ChipSelector,
        device: &DeviceDescriptor,
        connection: &mut dyn UsbConnection,
        interface: InterfaceSelector,
    ) -> Result<Option<SerialPort>, HostError>;
}

/// Driver for FTDI, CP210x, CH34x, PL2303 and CDC-ACM devices
#[derive(Debug, Clone, Copy, Default)]
pub struct UsbSerialDriver;

impl UsbSerialDriver {
    pub fn new() -> Self {
        Self
    }

    /// Detect the chip family from VID/PID, falling back to CDC interfaces
    pub fn detect(device: &DeviceDescriptor) -> Option<ChipType> {
        let known = KNOWN_CHIPS.iter().find(|(_, vid, pids)| {
            *vid == device.vendor_id && pids.contains(&device.product_id)
        });
        if let Some((chip, _, _)) = known {
            return Some(*chip);
        }

        device
            .interfaces
            .iter()
            .any(|i| i.class == CDC_COMM_CLASS || i.class == CDC_DATA_CLASS)
            .then_some(ChipType::Cdc)
    }

    /// Pick the interface number the session binds to
    fn select_interface(
        chip: ChipType,
        device: &DeviceDescriptor,
        selector: InterfaceSelector,
    ) -> Option<u8> {
        match selector {
            InterfaceSelector::Index(n) => {
                let index = usize::try_from(n).ok()?;
                device.interfaces.get(index).map(|i| i.number)
            }
            InterfaceSelector::Auto if chip == ChipType::Cdc => device
                .interfaces
                .iter()
                .find(|i| i.class == CDC_DATA_CLASS)
                .map(|i| i.number),
            InterfaceSelector::Auto => device.interfaces.first().map(|i| i.number),
        }
    }
}

impl SerialDriver for UsbSerialDriver {
    fn create(
        &self,
        chip: &ChipSelector,
        device: &DeviceDescriptor,
        connection: &mut dyn UsbConnection,
        interface: InterfaceSelector,
    ) -> Result<Option<SerialPort>, HostError> {
        let chip = match chip {
            ChipSelector::Auto => match Self::detect(device) {
                Some(chip) => chip,
                None => {
                    debug!(
                        "No serial driver for {:04x}:{:04x}",
                        device.vendor_id, device.product_id
                    );
                    return Ok(None);
                }
            },
            ChipSelector::Named(chip) => *chip,
            ChipSelector::Unrecognized(name) => {
                debug!("Unrecognized chip type '{}'", name);
                return Ok(None);
            }
        };

        let Some(number) = Self::select_interface(chip, device, interface) else {
            debug!(
                "Interface {} not usable for {} on {}",
                interface, chip, device.device_name
            );
            return Ok(None);
        };

        connection.claim_interface(number)?;
        debug!(
            "Bound {} driver to interface {} of {}",
            chip, number, device.device_name
        );

        Ok(Some(SerialPort {
            chip,
            interface: number,
        }))
    }
}
