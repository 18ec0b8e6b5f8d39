//! Test utilities for usb-serial-bridge
//!
//! Provides mock device snapshots and async helpers for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_device;
//!
//! let device = create_mock_device(1002, 0x0403, 0x6001);
//! assert_eq!(device.vendor_id, 0x0403);
//! assert_eq!(device.device_name, "/dev/bus/usb/001/002");
//! ```

use protocol::{DeviceDescriptor, DeviceId, InterfaceDescriptor};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Vendor-specific interface (class 0xff), as exposed by FTDI/CP210x/CH34x/PL2303
pub fn vendor_interface(number: u8) -> InterfaceDescriptor {
    InterfaceDescriptor {
        number,
        class: 0xff,
        subclass: 0xff,
        protocol: 0xff,
    }
}

/// Device name derived the way the OS numbers devices (`bus * 1000 + address`)
pub fn mock_device_name(device_id: i32) -> String {
    format!(
        "/dev/bus/usb/{:03}/{:03}",
        device_id / 1000,
        device_id % 1000
    )
}

/// Create a mock device with one vendor-specific interface
///
/// # Arguments
/// * `device_id` - OS device id (`bus * 1000 + address`)
/// * `vendor_id` - USB Vendor ID
/// * `product_id` - USB Product ID
pub fn create_mock_device(device_id: i32, vendor_id: u16, product_id: u16) -> DeviceDescriptor {
    create_mock_device_with_interfaces(device_id, vendor_id, product_id, vec![vendor_interface(0)])
}

/// Create a mock device with explicit interfaces
pub fn create_mock_device_with_interfaces(
    device_id: i32,
    vendor_id: u16,
    product_id: u16,
    interfaces: Vec<InterfaceDescriptor>,
) -> DeviceDescriptor {
    DeviceDescriptor {
        device_id: DeviceId(device_id),
        device_name: mock_device_name(device_id),
        vendor_id,
        product_id,
        manufacturer: Some(format!("Test Manufacturer {:04x}", vendor_id)),
        product: Some(format!("Test Product {:04x}", product_id)),
        serial_number: Some(format!("SN{:06}", device_id)),
        interfaces,
    }
}

/// Create an FTDI FT232R (0403:6001)
pub fn create_mock_ftdi_device(device_id: i32) -> DeviceDescriptor {
    create_mock_device(device_id, 0x0403, 0x6001)
}

/// Create a CDC-ACM device (communications + data interface pair)
pub fn create_mock_cdc_device(device_id: i32) -> DeviceDescriptor {
    create_mock_device_with_interfaces(
        device_id,
        0x2341,
        0x0043,
        vec![
            InterfaceDescriptor {
                number: 0,
                class: 0x02,
                subclass: 0x02,
                protocol: 0x01,
            },
            InterfaceDescriptor {
                number: 1,
                class: 0x0a,
                subclass: 0x00,
                protocol: 0x00,
            },
        ],
    )
}

/// Create a mass storage device, which no serial driver accepts
pub fn create_mock_mass_storage_device(device_id: i32) -> DeviceDescriptor {
    create_mock_device_with_interfaces(
        device_id,
        0x0781,
        0x5581,
        vec![InterfaceDescriptor {
            number: 0,
            class: 0x08,
            subclass: 0x06,
            protocol: 0x50,
        }],
    )
}

/// Run an async operation with a timeout
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
