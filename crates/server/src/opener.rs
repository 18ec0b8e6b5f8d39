//! Device opener
//!
//! Turns a located device into a serial session: make sure permission is
//! held (prompting at most once), open the connection, and hand it to the
//! serial driver. Any failure after the open closes the connection.

use crate::driver::SerialDriver;
use crate::error::{BridgeError, Result};
use crate::permission::PermissionBroker;
use crate::session::{SerialSession, SessionRegistry};
use crate::usb::{HostError, UsbSubsystem};
use protocol::{ChipSelector, DeviceDescriptor, InterfaceSelector};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Whether `open` may prompt the user when permission is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquirePermission {
    Allowed,
    Disallowed,
}

pub struct DeviceOpener {
    subsystem: Arc<dyn UsbSubsystem>,
    broker: Arc<PermissionBroker>,
    driver: Arc<dyn SerialDriver>,
    sessions: Arc<SessionRegistry>,
}

impl DeviceOpener {
    pub fn new(
        subsystem: Arc<dyn UsbSubsystem>,
        broker: Arc<PermissionBroker>,
        driver: Arc<dyn SerialDriver>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            subsystem,
            broker,
            driver,
            sessions,
        }
    }

    /// Open `device` as a serial session
    ///
    /// With [`AcquirePermission::Allowed`] and no permission held, prompts
    /// through the broker and retries once without prompting.
    pub async fn open(
        &self,
        chip: &ChipSelector,
        device: &DeviceDescriptor,
        interface: InterfaceSelector,
        acquire: AcquirePermission,
    ) -> Result<SerialSession> {
        debug!(
            "Opening {} (interface {}, type {}, acquire {:?})",
            device.device_name, interface, chip, acquire
        );

        if acquire == AcquirePermission::Allowed && !self.subsystem.has_permission(device) {
            debug!("No permission for device {}", device.device_name);
            let granted = self.broker.request_permission(device).await?;
            return self.open_granted(chip, &granted, interface);
        }

        self.open_granted(chip, device, interface)
    }

    /// Open without prompting; fails if permission is not already held
    pub fn open_granted(
        &self,
        chip: &ChipSelector,
        device: &DeviceDescriptor,
        interface: InterfaceSelector,
    ) -> Result<SerialSession> {
        if !self.subsystem.has_permission(device) {
            error!(
                "USB permission not granted and not attempting to acquire for {}",
                device.device_name
            );
            return Err(BridgeError::PermissionDenied {
                reason: format!("USB permission not granted for device {}", device.device_name),
                device: device.device_name.clone(),
            });
        }

        let mut connection = match self.subsystem.open_device(device) {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                error!(
                    "Failed to open USB device {} (connection is null)",
                    device.device_name
                );
                return Err(BridgeError::OpenFailed {
                    message: "Failed to open USB device (connection is null)".to_string(),
                    details: Some(
                        "This can happen if the device is already in use, the interface is \
                         invalid, or due to other system issues."
                            .to_string(),
                    ),
                });
            }
            Err(e) => return Err(open_error(device, e)),
        };

        let port = match self
            .driver
            .create(chip, device, connection.as_mut(), interface)
        {
            Ok(Some(port)) => port,
            Ok(None) => {
                warn!(
                    "Not a recognized serial device: {} with type '{}' on interface {}",
                    device.device_name, chip, interface
                );
                connection.close();
                return Err(BridgeError::UnsupportedDevice {
                    device: device.device_name.clone(),
                    details: "Ensure the device VID/PID matches a supported type or that the \
                              specified interface is correct."
                        .to_string(),
                });
            }
            Err(e) => {
                connection.close();
                return Err(open_error(device, e));
            }
        };

        let id = self.sessions.allocate_id();
        info!(
            "Serial device created for {}: channel {}",
            device.device_name,
            id.channel_name()
        );
        Ok(SerialSession::new(id, device.clone(), port, connection))
    }
}

/// Classify an OS failure raised while opening or binding
fn open_error(device: &DeviceDescriptor, e: HostError) -> BridgeError {
    error!("Error while opening {}: {}", device.device_name, e);
    match e {
        HostError::Access(msg) => BridgeError::Security(msg),
        other => BridgeError::OpenFailed {
            message: format!("Failed to configure USB device: {}", other),
            details: Some(format!("{:?}", other)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::UsbSerialDriver;
    use crate::testing::{FakeUsbSubsystem, OpenBehavior};
    use common::test_utils::{create_mock_ftdi_device, create_mock_mass_storage_device};
    use common::{HostBroadcast, create_broadcast_channel};
    use protocol::{ChipType, DeviceId, SessionId};

    struct Fixture {
        opener: DeviceOpener,
        broker: Arc<PermissionBroker>,
        fake: Arc<FakeUsbSubsystem>,
    }

    /// Opener wired to a fake subsystem, with a task routing permission
    /// results to the broker
    fn fixture() -> Fixture {
        let (tx, rx) = create_broadcast_channel();
        let fake = Arc::new(FakeUsbSubsystem::new(tx));
        let broker = Arc::new(PermissionBroker::new(fake.clone()));

        let pump_broker = broker.clone();
        tokio::spawn(async move {
            while let Ok(broadcast) = rx.recv().await {
                if let HostBroadcast::PermissionResult { device_id, granted } = broadcast {
                    pump_broker.complete(device_id, granted);
                }
            }
        });

        let opener = DeviceOpener::new(
            fake.clone(),
            broker.clone(),
            Arc::new(UsbSerialDriver::new()),
            Arc::new(SessionRegistry::default()),
        );
        Fixture {
            opener,
            broker,
            fake,
        }
    }

    #[tokio::test]
    async fn test_granted_device_never_prompts() {
        let f = fixture();
        let device = create_mock_ftdi_device(1002);
        f.fake.grant(device.device_id);

        let session = f
            .opener
            .open(
                &ChipSelector::Auto,
                &device,
                InterfaceSelector::Auto,
                AcquirePermission::Allowed,
            )
            .await
            .unwrap();

        assert_eq!(session.id, SessionId(100));
        assert_eq!(session.port.chip, ChipType::Ftdi);
        assert!(f.fake.permission_requests().is_empty());
        assert_eq!(f.fake.open_calls(), vec![DeviceId(1002)]);
    }

    #[tokio::test]
    async fn test_prompt_then_single_retry() {
        let f = fixture();
        let device = create_mock_ftdi_device(1002);

        let session = f
            .opener
            .open(
                &ChipSelector::Auto,
                &device,
                InterfaceSelector::Auto,
                AcquirePermission::Allowed,
            )
            .await
            .unwrap();

        assert_eq!(session.device, device);
        assert_eq!(f.fake.permission_requests(), vec![DeviceId(1002)]);
        assert_eq!(f.fake.open_calls(), vec![DeviceId(1002)]);
        assert_eq!(f.broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_denied_never_opens() {
        let f = fixture();
        f.fake.set_prompt_answer(Some(false));

        let err = f
            .opener
            .open(
                &ChipSelector::Auto,
                &create_mock_ftdi_device(1002),
                InterfaceSelector::Auto,
                AcquirePermission::Allowed,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::PermissionDenied { .. }));
        assert!(f.fake.open_calls().is_empty());
    }

    #[tokio::test]
    async fn test_disallowed_acquire_fails_fast() {
        let f = fixture();

        let err = f
            .opener
            .open(
                &ChipSelector::Auto,
                &create_mock_ftdi_device(1002),
                InterfaceSelector::Auto,
                AcquirePermission::Disallowed,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::PermissionDenied { .. }));
        assert!(f.fake.permission_requests().is_empty());
        assert!(f.fake.open_calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_connection() {
        let f = fixture();
        let device = create_mock_ftdi_device(1002);
        f.fake.grant(device.device_id);
        f.fake.set_open_behavior(OpenBehavior::NoConnection);

        let err = f
            .opener
            .open_granted(&ChipSelector::Auto, &device, InterfaceSelector::Auto)
            .unwrap_err();
        assert!(matches!(err, BridgeError::OpenFailed { .. }));
        assert!(err.to_string().contains("connection is null"));
    }

    #[tokio::test]
    async fn test_unsupported_device_closes_connection() {
        let f = fixture();
        let device = create_mock_mass_storage_device(1005);
        f.fake.grant(device.device_id);

        let err = f
            .opener
            .open_granted(&ChipSelector::Auto, &device, InterfaceSelector::Auto)
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedDevice { .. }));
        assert_eq!(f.fake.closed_connections(), 1);
    }

    #[tokio::test]
    async fn test_access_error_is_security_error() {
        let f = fixture();
        let device = create_mock_ftdi_device(1002);
        f.fake.grant(device.device_id);
        f.fake
            .set_claim_error(Some(HostError::Access("revoked".to_string())));

        let err = f
            .opener
            .open_granted(&ChipSelector::Auto, &device, InterfaceSelector::Auto)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Security(_)));
        assert_eq!(f.fake.closed_connections(), 1);
    }

    #[tokio::test]
    async fn test_other_open_error_is_open_failed() {
        let f = fixture();
        let device = create_mock_ftdi_device(1002);
        f.fake.grant(device.device_id);
        f.fake
            .set_open_behavior(OpenBehavior::Fail(HostError::Other("pipe".to_string())));

        let err = f
            .opener
            .open_granted(&ChipSelector::Auto, &device, InterfaceSelector::Auto)
            .unwrap_err();
        assert!(matches!(err, BridgeError::OpenFailed { .. }));
        assert!(err.to_string().starts_with("Failed to configure USB device"));
    }
}
