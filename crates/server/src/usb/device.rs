//! libusb device snapshots and connections
//!
//! Converts `rusb::Device` into the bridge's [`DeviceDescriptor`] and wraps
//! an open `rusb::DeviceHandle` as a [`UsbConnection`].

use super::{HostError, UsbConnection};
use protocol::{DeviceDescriptor, DeviceId, InterfaceDescriptor};
use rusb::{Context, Device, DeviceDescriptor as RawDescriptor, DeviceHandle};
use tracing::{debug, warn};

/// OS device id for a bus/address pair
///
/// Same numbering Android uses: `bus * 1000 + address`.
pub fn os_device_id(bus: u8, address: u8) -> DeviceId {
    DeviceId(i32::from(bus) * 1000 + i32::from(address))
}

/// Device node path for a bus/address pair
pub fn device_node_name(bus: u8, address: u8) -> String {
    format!("/dev/bus/usb/{:03}/{:03}", bus, address)
}

/// Split an OS device id back into (bus, address)
pub fn bus_address(device_id: DeviceId) -> Option<(u8, u8)> {
    if device_id.0 < 0 {
        return None;
    }
    let bus = u8::try_from(device_id.0 / 1000).ok()?;
    let address = u8::try_from(device_id.0 % 1000).ok()?;
    Some((bus, address))
}

/// Which string descriptors to read while describing a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringDescriptors {
    /// Do not open the device (required inside libusb hot-plug callbacks)
    Skip,
    /// Manufacturer and product
    Public,
    /// Manufacturer, product and serial number
    WithSerial,
}

/// Snapshot a libusb device
///
/// String descriptors need a temporary open; if that fails the strings are
/// left empty.
pub fn describe(
    device: &Device<Context>,
    strings: StringDescriptors,
) -> Result<DeviceDescriptor, rusb::Error> {
    let descriptor = device.device_descriptor()?;
    let bus = device.bus_number();
    let address = device.address();

    let interfaces = match device.active_config_descriptor() {
        Ok(config) => config
            .interfaces()
            .filter_map(|interface| {
                interface.descriptors().next().map(|alt| InterfaceDescriptor {
                    number: interface.number(),
                    class: alt.class_code(),
                    subclass: alt.sub_class_code(),
                    protocol: alt.protocol_code(),
                })
            })
            .collect(),
        Err(e) => {
            debug!(
                "No active configuration for bus={}, addr={}: {}",
                bus, address, e
            );
            Vec::new()
        }
    };

    let (manufacturer, product, serial_number) = match strings {
        StringDescriptors::Skip => (None, None, None),
        _ => match device.open() {
            Ok(handle) => read_string_descriptors(
                &descriptor,
                &handle,
                strings == StringDescriptors::WithSerial,
            ),
            Err(_) => (None, None, None),
        },
    };

    Ok(DeviceDescriptor {
        device_id: os_device_id(bus, address),
        device_name: device_node_name(bus, address),
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        manufacturer,
        product,
        serial_number,
        interfaces,
    })
}

fn read_string_descriptors(
    descriptor: &RawDescriptor,
    handle: &DeviceHandle<Context>,
    read_serial: bool,
) -> (Option<String>, Option<String>, Option<String>) {
    let manufacturer = descriptor
        .manufacturer_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    let product = descriptor
        .product_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    let serial_number = if read_serial {
        descriptor
            .serial_number_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok())
    } else {
        None
    };

    (manufacturer, product, serial_number)
}

/// Open connection backed by a libusb device handle
pub struct RusbConnection {
    device_id: DeviceId,
    handle: Option<DeviceHandle<Context>>,
    /// Interfaces claimed by us
    claimed_interfaces: Vec<u8>,
}

impl RusbConnection {
    pub fn new(device_id: DeviceId, handle: DeviceHandle<Context>) -> Self {
        Self {
            device_id,
            handle: Some(handle),
            claimed_interfaces: Vec::new(),
        }
    }
}

impl UsbConnection for RusbConnection {
    fn claim_interface(&mut self, number: u8) -> Result<(), HostError> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| HostError::Other("connection closed".to_string()))?;

        match handle.kernel_driver_active(number) {
            Ok(true) => {
                debug!(
                    "Detaching kernel driver from interface {} on device {}",
                    number, self.device_id
                );
                if let Err(e) = handle.detach_kernel_driver(number) {
                    warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        number, e
                    );
                }
            }
            Ok(false) => {}
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    number, e
                );
            }
        }

        handle.claim_interface(number)?;
        self.claimed_interfaces.push(number);
        debug!("Claimed interface {} on device {}", number, self.device_id);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            for interface in &self.claimed_interfaces {
                if let Err(e) = handle.release_interface(*interface) {
                    warn!("Failed to release interface {}: {}", interface, e);
                }

                // Hand the interface back to the kernel driver
                if let Err(e) = handle.attach_kernel_driver(*interface) {
                    debug!(
                        "Could not reattach kernel driver to interface {}: {}",
                        interface, e
                    );
                }
            }
            self.claimed_interfaces.clear();

            debug!("Closed device {}", self.device_id);
        }
    }
}

impl Drop for RusbConnection {
    fn drop(&mut self) {
        self.close();
    }
}
