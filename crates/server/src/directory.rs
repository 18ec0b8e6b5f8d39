//! Device directory
//!
//! Enumerates attached devices through the USB subsystem and locates the
//! one a `create` call refers to. Nothing is cached: every call takes a
//! fresh snapshot.

use crate::error::{BridgeError, Result};
use crate::usb::UsbSubsystem;
use protocol::{DeviceDescriptor, DeviceRecord, DeviceSelector};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct DeviceDirectory {
    subsystem: Arc<dyn UsbSubsystem>,
}

impl DeviceDirectory {
    pub fn new(subsystem: Arc<dyn UsbSubsystem>) -> Self {
        Self { subsystem }
    }

    /// Snapshot of all attached devices
    ///
    /// Serial numbers are withheld for devices the caller has no
    /// permission for.
    pub fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let mut devices = self
            .subsystem
            .device_list()
            .map_err(|e| BridgeError::SubsystemUnavailable(e.to_string()))?;

        for device in &mut devices {
            if device.serial_number.is_some() && !self.subsystem.has_permission(device) {
                device.serial_number = None;
            }
        }

        debug!("Directory lists {} devices", devices.len());
        Ok(devices)
    }

    /// Wire records for `listDevices`
    pub fn list_records(&self) -> Result<Vec<DeviceRecord>> {
        Ok(self
            .list_devices()?
            .iter()
            .map(DeviceDescriptor::to_record)
            .collect())
    }

    /// Locate the device a `create` call refers to
    pub fn find_device(
        &self,
        vendor_id: u16,
        product_id: u16,
        selector: DeviceSelector,
    ) -> Result<DeviceDescriptor> {
        let devices = self.list_devices()?;

        match select_device(&devices, vendor_id, product_id, selector) {
            Some(device) => {
                debug!("Device found: {}", device.device_name);
                Ok(device.clone())
            }
            None => {
                warn!(
                    "No such device found for VID: {} PID: {} DeviceID: {}",
                    vendor_id, product_id, selector
                );
                Err(BridgeError::DeviceNotFound {
                    vendor_id: i64::from(vendor_id),
                    product_id: i64::from(product_id),
                    device_id: selector.to_string(),
                })
            }
        }
    }
}

/// Scan `devices` in order for the best match
///
/// A device-id match ends the scan immediately, regardless of VID/PID.
/// Without a requested id the first VID/PID match wins. With a requested
/// id that never matches, the last VID/PID match seen is returned.
pub fn select_device(
    devices: &[DeviceDescriptor],
    vendor_id: u16,
    product_id: u16,
    selector: DeviceSelector,
) -> Option<&DeviceDescriptor> {
    let mut found = None;

    for device in devices {
        if let DeviceSelector::Id(id) = selector {
            if device.device_id == id {
                return Some(device);
            }
        }
        if device.matches(vendor_id, product_id) {
            found = Some(device);
            if selector == DeviceSelector::Any {
                break;
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeUsbSubsystem;
    use common::create_broadcast_channel;
    use common::test_utils::{create_mock_device, create_mock_ftdi_device};
    use protocol::DeviceId;
    use proptest::prelude::*;

    fn directory(devices: Vec<DeviceDescriptor>) -> (DeviceDirectory, Arc<FakeUsbSubsystem>) {
        let (tx, _rx) = create_broadcast_channel();
        let fake = Arc::new(FakeUsbSubsystem::new(tx).with_devices(devices));
        (DeviceDirectory::new(fake.clone()), fake)
    }

    #[test]
    fn test_empty_directory() {
        let (dir, _) = directory(Vec::new());
        assert!(dir.list_devices().unwrap().is_empty());
        assert!(dir.list_records().unwrap().is_empty());
    }

    #[test]
    fn test_subsystem_unavailable() {
        let (dir, fake) = directory(vec![create_mock_ftdi_device(1002)]);
        fake.set_unavailable(true);
        let err = dir.list_devices().unwrap_err();
        assert!(matches!(err, BridgeError::SubsystemUnavailable(_)));
    }

    #[test]
    fn test_serial_number_requires_permission() {
        let (dir, fake) = directory(vec![
            create_mock_ftdi_device(1002),
            create_mock_ftdi_device(1003),
        ]);
        fake.grant(DeviceId(1003));

        let devices = dir.list_devices().unwrap();
        assert_eq!(devices[0].serial_number, None);
        assert_eq!(devices[1].serial_number.as_deref(), Some("SN001003"));
    }

    #[test]
    fn test_device_id_beats_earlier_vid_pid_match() {
        let devices = vec![
            create_mock_ftdi_device(1002),
            create_mock_ftdi_device(1003),
        ];
        let found =
            select_device(&devices, 0x0403, 0x6001, DeviceSelector::Id(DeviceId(1003))).unwrap();
        assert_eq!(found.device_id, DeviceId(1003));
    }

    #[test]
    fn test_device_id_match_ignores_vid_pid() {
        let devices = vec![
            create_mock_ftdi_device(1002),
            create_mock_device(1003, 0x10c4, 0xea60),
        ];
        let found =
            select_device(&devices, 0x0403, 0x6001, DeviceSelector::Id(DeviceId(1003))).unwrap();
        assert_eq!(found.vendor_id, 0x10c4);
    }

    #[test]
    fn test_unmatched_device_id_falls_back_to_last_vid_pid_match() {
        let devices = vec![
            create_mock_ftdi_device(1002),
            create_mock_ftdi_device(1003),
        ];
        let found =
            select_device(&devices, 0x0403, 0x6001, DeviceSelector::Id(DeviceId(4242))).unwrap();
        assert_eq!(found.device_id, DeviceId(1003));
    }

    #[test]
    fn test_not_found_details() {
        let (dir, _) = directory(vec![create_mock_device(1002, 0x10c4, 0xea60)]);
        let err = dir
            .find_device(0x0403, 0x6001, DeviceSelector::Any)
            .unwrap_err();
        assert_eq!(
            err.details().as_deref(),
            Some("VID: 1027, PID: 24577, DeviceID: any")
        );
    }

    fn arb_devices() -> impl Strategy<Value = Vec<DeviceDescriptor>> {
        // Small VID/PID space so collisions are common
        prop::collection::vec((1u8..4, 1u8..4), 0..12).prop_map(|pairs| {
            pairs
                .into_iter()
                .enumerate()
                .map(|(i, (vid, pid))| {
                    let id = 1000 + i32::try_from(i).unwrap_or(0) + 1;
                    create_mock_device(id, u16::from(vid), u16::from(pid))
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_any_selects_first_vid_pid_match(
            devices in arb_devices(),
            vid in 1u16..4,
            pid in 1u16..4,
        ) {
            let expected = devices.iter().find(|d| d.matches(vid, pid));
            let found = select_device(&devices, vid, pid, DeviceSelector::Any);
            prop_assert_eq!(found, expected);
        }

        #[test]
        fn prop_matching_device_id_wins(
            devices in arb_devices(),
            vid in 1u16..4,
            pid in 1u16..4,
            pick in any::<prop::sample::Index>(),
        ) {
            prop_assume!(!devices.is_empty());
            let target = &devices[pick.index(devices.len())];
            let found = select_device(&devices, vid, pid, DeviceSelector::Id(target.device_id));
            prop_assert_eq!(found.map(|d| d.device_id), Some(target.device_id));
        }
    }
}
