//! Permission broker
//!
//! Asks the user for access to a device and waits for the answer. Each
//! request registers a one-shot subscription keyed by device id before the
//! prompt is raised; the permission broadcast for that device resolves it.
//! Subscriptions unregister themselves when resolved, cancelled, or dropped.

use crate::error::{BridgeError, Result};
use crate::usb::UsbSubsystem;
use protocol::{DeviceDescriptor, DeviceId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Denial reason reported when the user refuses
pub const DENIED_BY_USER: &str = "USB permission denied by user";
/// Denial reason reported when the broker is torn down mid-request
pub const REQUEST_CANCELLED: &str = "permission request cancelled";

/// One parked permission request
struct PendingRequest {
    request_id: u64,
    tx: oneshot::Sender<bool>,
}

pub struct PermissionBroker {
    subsystem: Arc<dyn UsbSubsystem>,
    /// Parked requests by device
    pending: Mutex<HashMap<DeviceId, Vec<PendingRequest>>>,
    next_request_id: AtomicU64,
}

/// Registered subscription; unregisters on drop
struct Subscription<'a> {
    broker: &'a PermissionBroker,
    device_id: DeviceId,
    request_id: u64,
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.broker.unregister(self.device_id, self.request_id);
    }
}

impl PermissionBroker {
    pub fn new(subsystem: Arc<dyn UsbSubsystem>) -> Self {
        Self {
            subsystem,
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Prompt for access to `device` and wait for the answer
    ///
    /// Returns the descriptor that was asked for, not whatever the OS
    /// redelivers with the result.
    pub async fn request_permission(&self, device: &DeviceDescriptor) -> Result<DeviceDescriptor> {
        self.subsystem.check_available()?;

        let (tx, rx) = oneshot::channel();
        let subscription = self.register(device.device_id, tx);

        info!("Requesting permission for device: {}", device.device_name);
        self.subsystem.request_permission(device)?;

        let outcome = rx.await;
        drop(subscription);

        match outcome {
            Ok(true) => {
                info!("Permission granted for device: {}", device.device_name);
                Ok(device.clone())
            }
            Ok(false) => {
                warn!("Permission denied for device: {}", device.device_name);
                Err(BridgeError::PermissionDenied {
                    reason: DENIED_BY_USER.to_string(),
                    device: device.device_name.clone(),
                })
            }
            Err(_) => Err(BridgeError::PermissionDenied {
                reason: REQUEST_CANCELLED.to_string(),
                device: device.device_name.clone(),
            }),
        }
    }

    /// Deliver a permission result; resolves every request parked on the
    /// device. Returns how many were resolved.
    pub fn complete(&self, device_id: DeviceId, granted: bool) -> usize {
        let waiters = self.lock_pending().remove(&device_id).unwrap_or_default();
        if waiters.is_empty() {
            debug!(
                "Permission result for device {} with no pending request, ignoring",
                device_id
            );
            return 0;
        }

        let count = waiters.len();
        for waiter in waiters {
            // Receiver gone means the caller stopped waiting
            let _ = waiter.tx.send(granted);
        }
        count
    }

    /// Fail every parked request
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.lock_pending().drain().collect();
        let count: usize = drained.iter().map(|(_, waiters)| waiters.len()).sum();
        if count > 0 {
            info!("Cancelled {} pending permission request(s)", count);
        }
        count
    }

    /// Number of parked requests
    pub fn pending_count(&self) -> usize {
        self.lock_pending().values().map(Vec::len).sum()
    }

    fn register(&self, device_id: DeviceId, tx: oneshot::Sender<bool>) -> Subscription<'_> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.lock_pending()
            .entry(device_id)
            .or_default()
            .push(PendingRequest { request_id, tx });
        debug!(
            "Registered permission subscription {} for device {}",
            request_id, device_id
        );
        Subscription {
            broker: self,
            device_id,
            request_id,
        }
    }

    /// Remove one subscription. A no-op if it already fired.
    fn unregister(&self, device_id: DeviceId, request_id: u64) {
        let mut pending = self.lock_pending();
        if let Some(waiters) = pending.get_mut(&device_id) {
            waiters.retain(|w| w.request_id != request_id);
            if waiters.is_empty() {
                pending.remove(&device_id);
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<DeviceId, Vec<PendingRequest>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
