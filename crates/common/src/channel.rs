//! Async channel carrying OS broadcasts into the Tokio runtime
//!
//! The USB subsystem delivers notifications from whatever thread the OS
//! uses (the libusb event thread for hot-plug, the permission prompt for
//! grant results). They all funnel through one bounded channel that the
//! bridge service drains on its own task.

use async_channel::{Receiver, Sender, TrySendError, bounded};
use protocol::{DeviceDescriptor, DeviceId};

/// Capacity of the broadcast channel
pub const BROADCAST_CAPACITY: usize = 256;

/// Notification raised by the USB subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostBroadcast {
    /// Device hot-plugged. The payload is `None` if the OS could not
    /// describe the device.
    DeviceAttached(Option<DeviceDescriptor>),

    /// Device removed
    DeviceDetached(Option<DeviceDescriptor>),

    /// Outcome of a permission request
    PermissionResult {
        /// Device the request was issued for
        device_id: DeviceId,
        /// Whether the user granted access
        granted: bool,
    },
}

impl HostBroadcast {
    /// Short action name for logging
    pub fn action(&self) -> &'static str {
        match self {
            HostBroadcast::DeviceAttached(_) => "device_attached",
            HostBroadcast::DeviceDetached(_) => "device_detached",
            HostBroadcast::PermissionResult { .. } => "permission_result",
        }
    }
}

/// Sending half, held by the USB subsystem
#[derive(Debug, Clone)]
pub struct BroadcastSender {
    tx: Sender<HostBroadcast>,
}

impl BroadcastSender {
    /// Send from a blocking thread (e.g. the libusb event thread)
    pub fn send_blocking(&self, broadcast: HostBroadcast) -> crate::Result<()> {
        self.tx
            .send_blocking(broadcast)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send without waiting; fails if the channel is full or closed
    pub fn try_send(&self, broadcast: HostBroadcast) -> crate::Result<()> {
        self.tx.try_send(broadcast).map_err(|e| match e {
            TrySendError::Full(b) => {
                crate::Error::Channel(format!("broadcast channel full, dropped {}", b.action()))
            }
            TrySendError::Closed(b) => {
                crate::Error::Channel(format!("broadcast channel closed, dropped {}", b.action()))
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half, drained by the bridge service
#[derive(Debug, Clone)]
pub struct BroadcastReceiver {
    rx: Receiver<HostBroadcast>,
}

impl BroadcastReceiver {
    /// Receive the next broadcast
    pub async fn recv(&self) -> crate::Result<HostBroadcast> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Close the channel; later sends fail
    pub fn close(&self) -> bool {
        self.rx.close()
    }
}

/// Create the broadcast channel
///
/// Returns (sender for the USB subsystem, receiver for the bridge service)
pub fn create_broadcast_channel() -> (BroadcastSender, BroadcastReceiver) {
    let (tx, rx) = bounded(BROADCAST_CAPACITY);
    (BroadcastSender { tx }, BroadcastReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blocking_sender_reaches_async_receiver() {
        let (tx, rx) = create_broadcast_channel();

        let handle = std::thread::spawn(move || {
            tx.send_blocking(HostBroadcast::PermissionResult {
                device_id: DeviceId(1002),
                granted: true,
            })
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(
            received,
            HostBroadcast::PermissionResult {
                device_id: DeviceId(1002),
                granted: true
            }
        );
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_try_send_after_close() {
        let (tx, rx) = create_broadcast_channel();
        rx.close();
        assert!(tx.is_closed());
        let err = tx.try_send(HostBroadcast::DeviceAttached(None)).unwrap_err();
        assert!(err.to_string().contains("device_attached"));
    }
}
