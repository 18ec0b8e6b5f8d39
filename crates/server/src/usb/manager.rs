//! libusb-backed USB subsystem
//!
//! Enumerates devices through a shared `rusb::Context`, opens them, and
//! brokers permission through a configurable prompt policy. Hot-plug
//! notifications are produced by [`HotplugCallback`], registered on the
//! USB event thread.

use super::device::{RusbConnection, StringDescriptors, bus_address, describe};
use super::{HostError, UsbConnection, UsbSubsystem};
use common::{BroadcastSender, HostBroadcast};
use protocol::{DeviceDescriptor, DeviceId};
use rusb::{Context, Device, Hotplug, UsbContext};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Root hubs (Linux Foundation VID, hub class) are never exposed
const ROOT_HUB_VENDOR_ID: u16 = 0x1d6b;
const HUB_CLASS: u8 = 9;

/// How the permission prompt answers
///
/// Devices matching `approved` are granted without asking; everything else
/// gets `grant_unapproved`.
#[derive(Debug, Clone, Default)]
pub struct PermissionPolicy {
    /// VID:PID patterns granted automatically
    pub approved: Vec<String>,
    /// Answer for devices not in `approved`
    pub grant_unapproved: bool,
}

impl PermissionPolicy {
    pub fn decide(&self, device: &DeviceDescriptor) -> bool {
        if !self.approved.is_empty()
            && filter_allows(device.vendor_id, device.product_id, &self.approved)
        {
            return true;
        }
        self.grant_unapproved
    }
}

/// USB subsystem on top of libusb
pub struct RusbSubsystem {
    /// USB context shared with the event thread
    context: Context,
    /// Device filters (VID:PID patterns); empty allows everything
    allowed_filters: Vec<String>,
    policy: PermissionPolicy,
    /// Devices the user granted during this process lifetime
    granted: Mutex<HashSet<DeviceId>>,
    /// Where permission results are reported
    broadcasts: BroadcastSender,
}

impl RusbSubsystem {
    /// Create the subsystem with a fresh libusb context
    pub fn new(
        broadcasts: BroadcastSender,
        allowed_filters: Vec<String>,
        policy: PermissionPolicy,
    ) -> Result<Self, HostError> {
        let context = Context::new()
            .map_err(|e| HostError::Unavailable(format!("Failed to create USB context: {}", e)))?;

        info!(
            "USB subsystem ready ({} filter(s), {} approved pattern(s))",
            allowed_filters.len(),
            policy.approved.len()
        );

        Ok(Self {
            context,
            allowed_filters,
            policy,
            granted: Mutex::new(HashSet::new()),
            broadcasts,
        })
    }

    /// USB context, for the event thread
    pub fn context(&self) -> &Context {
        &self.context
    }

    fn is_granted(&self, device_id: DeviceId) -> bool {
        self.granted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&device_id)
    }

    fn find_raw_device(&self, device_id: DeviceId) -> Result<Option<Device<Context>>, HostError> {
        let Some((bus, address)) = bus_address(device_id) else {
            return Ok(None);
        };
        let devices = self
            .context
            .devices()
            .map_err(|e| HostError::Unavailable(e.to_string()))?;

        Ok(devices
            .iter()
            .find(|d| d.bus_number() == bus && d.address() == address))
    }
}

impl UsbSubsystem for RusbSubsystem {
    fn check_available(&self) -> Result<(), HostError> {
        if self.broadcasts.is_closed() {
            return Err(HostError::ContextUnavailable(
                "Permission results can no longer be delivered".to_string(),
            ));
        }
        Ok(())
    }

    fn device_list(&self) -> Result<Vec<DeviceDescriptor>, HostError> {
        let devices = self
            .context
            .devices()
            .map_err(|e| HostError::Unavailable(format!("Could not get USB device list: {}", e)))?;

        let mut snapshot = Vec::new();
        for device in devices.iter() {
            if !is_exposed(&device, &self.allowed_filters) {
                continue;
            }
            let id = super::device::os_device_id(device.bus_number(), device.address());
            let strings = if self.is_granted(id) {
                StringDescriptors::WithSerial
            } else {
                StringDescriptors::Public
            };
            match describe(&device, strings) {
                Ok(descriptor) => snapshot.push(descriptor),
                Err(e) => warn!(
                    "Failed to describe device bus={}, addr={}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }

        debug!("Enumerated {} devices", snapshot.len());
        Ok(snapshot)
    }

    fn has_permission(&self, device: &DeviceDescriptor) -> bool {
        self.is_granted(device.device_id)
    }

    fn request_permission(&self, device: &DeviceDescriptor) -> Result<(), HostError> {
        let granted = self.policy.decide(device);
        info!(
            "Permission prompt for {} ({:04x}:{:04x}) answered: {}",
            device.device_name,
            device.vendor_id,
            device.product_id,
            if granted { "granted" } else { "denied" }
        );

        if granted {
            self.granted
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(device.device_id);
        }

        self.broadcasts
            .try_send(HostBroadcast::PermissionResult {
                device_id: device.device_id,
                granted,
            })
            .map_err(|e| HostError::ContextUnavailable(e.to_string()))
    }

    fn forget(&self, device_id: DeviceId) {
        let removed = self
            .granted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&device_id);
        if removed {
            debug!("Dropped permission grant for device {}", device_id);
        }
    }

    fn open_device(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<Option<Box<dyn UsbConnection>>, HostError> {
        let Some(raw) = self.find_raw_device(device.device_id)? else {
            warn!("Device {} is no longer attached", device.device_name);
            return Ok(None);
        };

        match raw.open() {
            Ok(handle) => {
                debug!("Opened device {}", device.device_name);
                Ok(Some(Box::new(RusbConnection::new(device.device_id, handle))))
            }
            Err(rusb::Error::Access) => Err(HostError::Access(format!(
                "Access to {} denied by the OS",
                device.device_name
            ))),
            Err(e @ (rusb::Error::Busy | rusb::Error::NoDevice | rusb::Error::NotFound)) => {
                warn!("Failed to open device {}: {}", device.device_name, e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Whether a device passes the filters and is not a root hub
fn is_exposed<T: UsbContext>(device: &Device<T>, filters: &[String]) -> bool {
    let Ok(desc) = device.device_descriptor() else {
        return false;
    };

    if desc.vendor_id() == ROOT_HUB_VENDOR_ID && desc.class_code() == HUB_CLASS {
        return false;
    }

    filter_allows(desc.vendor_id(), desc.product_id(), filters)
}

/// Check if a VID/PID pair is allowed by the filters
///
/// Filter format: `0xVID:0xPID` or `0xVID:*`. No filters allow everything.
pub fn filter_allows(vid: u16, pid: u16, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }

    filters.iter().any(|filter| {
        let Some((filter_vid, filter_pid)) = filter.split_once(':') else {
            return false;
        };
        component_matches(filter_vid, vid) && component_matches(filter_pid, pid)
    })
}

fn component_matches(pattern: &str, value: u16) -> bool {
    if pattern == "*" {
        return true;
    }
    let hex = pattern
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u16::from_str_radix(hex, 16)
        .map(|v| v == value)
        .unwrap_or(false)
}

/// Hot-plug callback
///
/// Runs on the USB event thread inside `handle_events`, so it must not open
/// the device. Descriptors come from the libusb cache only.
pub(crate) struct HotplugCallback {
    broadcasts: BroadcastSender,
    allowed_filters: Vec<String>,
}

impl HotplugCallback {
    pub(crate) fn new(broadcasts: BroadcastSender, allowed_filters: Vec<String>) -> Self {
        Self {
            broadcasts,
            allowed_filters,
        }
    }

    fn snapshot(&self, device: &Device<Context>) -> Option<DeviceDescriptor> {
        match describe(device, StringDescriptors::Skip) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                debug!(
                    "Could not describe hot-plugged device bus={}, addr={}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                None
            }
        }
    }

    fn forward(&self, broadcast: HostBroadcast) {
        if let Err(e) = self.broadcasts.send_blocking(broadcast) {
            warn!("Failed to forward hot-plug event: {}", e);
        }
    }
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        if !is_exposed(&device, &self.allowed_filters) {
            return;
        }
        let snapshot = self.snapshot(&device);
        self.forward(HostBroadcast::DeviceAttached(snapshot));
    }

    fn device_left(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        if !is_exposed(&device, &self.allowed_filters) {
            return;
        }
        let snapshot = self.snapshot(&device);
        self.forward(HostBroadcast::DeviceDetached(snapshot));
    }
}
