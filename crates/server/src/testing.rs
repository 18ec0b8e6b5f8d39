//! In-memory USB subsystem for tests
//!
//! [`FakeUsbSubsystem`] stands in for the OS: it serves a fixed device
//! list, answers permission prompts through the broadcast channel the way
//! the real subsystem does, and records every permission request and open
//! call so tests can assert on them.

use crate::usb::{HostError, UsbConnection, UsbSubsystem};
use common::{BroadcastSender, HostBroadcast};
use protocol::{DeviceDescriptor, DeviceId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// What `open_device` does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Return a working connection
    Connect,
    /// OS gives no usable connection
    NoConnection,
    /// OS raises an error
    Fail(HostError),
}

/// Connection handed out by [`FakeUsbSubsystem`]
#[derive(Debug, Default)]
pub struct FakeConnection {
    /// Interfaces claimed so far
    pub claimed: Vec<u8>,
    /// Error returned by the next claim
    pub claim_error: Option<HostError>,
    pub closed: bool,
    pub(crate) close_counter: Option<Arc<AtomicUsize>>,
}

impl UsbConnection for FakeConnection {
    fn claim_interface(&mut self, number: u8) -> Result<(), HostError> {
        if let Some(e) = self.claim_error.take() {
            return Err(e);
        }
        self.claimed.push(number);
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(counter) = &self.close_counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Scriptable stand-in for the OS USB subsystem
pub struct FakeUsbSubsystem {
    broadcasts: BroadcastSender,
    devices: Mutex<Vec<DeviceDescriptor>>,
    granted: Mutex<HashSet<DeviceId>>,
    /// `None` leaves the prompt unanswered
    prompt_answer: Mutex<Option<bool>>,
    open_behavior: Mutex<OpenBehavior>,
    claim_error: Mutex<Option<HostError>>,
    unavailable: AtomicBool,
    context_missing: AtomicBool,
    permission_requests: Mutex<Vec<DeviceId>>,
    open_calls: Mutex<Vec<DeviceId>>,
    closed_connections: Arc<AtomicUsize>,
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeUsbSubsystem {
    /// Empty directory; prompts are granted
    pub fn new(broadcasts: BroadcastSender) -> Self {
        Self {
            broadcasts,
            devices: Mutex::new(Vec::new()),
            granted: Mutex::new(HashSet::new()),
            prompt_answer: Mutex::new(Some(true)),
            open_behavior: Mutex::new(OpenBehavior::Connect),
            claim_error: Mutex::new(None),
            unavailable: AtomicBool::new(false),
            context_missing: AtomicBool::new(false),
            permission_requests: Mutex::new(Vec::new()),
            open_calls: Mutex::new(Vec::new()),
            closed_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_devices(self, devices: Vec<DeviceDescriptor>) -> Self {
        *locked(&self.devices) = devices;
        self
    }

    /// Mark a device as already permitted
    pub fn grant(&self, device_id: DeviceId) {
        locked(&self.granted).insert(device_id);
    }

    pub fn set_prompt_answer(&self, answer: Option<bool>) {
        *locked(&self.prompt_answer) = answer;
    }

    pub fn set_open_behavior(&self, behavior: OpenBehavior) {
        *locked(&self.open_behavior) = behavior;
    }

    pub fn set_claim_error(&self, error: Option<HostError>) {
        *locked(&self.claim_error) = error;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_context_missing(&self, missing: bool) {
        self.context_missing.store(missing, Ordering::SeqCst);
    }

    /// Plug a device in and broadcast the attach
    pub fn attach(&self, device: DeviceDescriptor) {
        locked(&self.devices).push(device.clone());
        let _ = self
            .broadcasts
            .try_send(HostBroadcast::DeviceAttached(Some(device)));
    }

    /// Unplug a device and broadcast the detach
    ///
    /// Grants survive until the bridge calls `forget`, as with the OS.
    pub fn detach(&self, device_id: DeviceId) {
        let removed = {
            let mut devices = locked(&self.devices);
            let index = devices.iter().position(|d| d.device_id == device_id);
            index.map(|i| devices.remove(i))
        };
        if let Some(device) = removed {
            let _ = self
                .broadcasts
                .try_send(HostBroadcast::DeviceDetached(Some(device)));
        }
    }

    /// Devices a permission prompt was raised for, in order
    pub fn permission_requests(&self) -> Vec<DeviceId> {
        locked(&self.permission_requests).clone()
    }

    /// Devices `open_device` was called for, in order
    pub fn open_calls(&self) -> Vec<DeviceId> {
        locked(&self.open_calls).clone()
    }

    /// Number of handed-out connections that have been closed
    pub fn closed_connections(&self) -> usize {
        self.closed_connections.load(Ordering::SeqCst)
    }
}

impl UsbSubsystem for FakeUsbSubsystem {
    fn check_available(&self) -> Result<(), HostError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(HostError::Unavailable("USB service not running".to_string()));
        }
        if self.context_missing.load(Ordering::SeqCst) {
            return Err(HostError::ContextUnavailable(
                "no application context".to_string(),
            ));
        }
        Ok(())
    }

    fn device_list(&self) -> Result<Vec<DeviceDescriptor>, HostError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(HostError::Unavailable("USB service not running".to_string()));
        }
        Ok(locked(&self.devices).clone())
    }

    fn has_permission(&self, device: &DeviceDescriptor) -> bool {
        locked(&self.granted).contains(&device.device_id)
    }

    fn request_permission(&self, device: &DeviceDescriptor) -> Result<(), HostError> {
        locked(&self.permission_requests).push(device.device_id);

        let Some(granted) = *locked(&self.prompt_answer) else {
            return Ok(());
        };
        if granted {
            self.grant(device.device_id);
        }
        self.broadcasts
            .try_send(HostBroadcast::PermissionResult {
                device_id: device.device_id,
                granted,
            })
            .map_err(|e| HostError::ContextUnavailable(e.to_string()))
    }

    fn forget(&self, device_id: DeviceId) {
        locked(&self.granted).remove(&device_id);
    }

    fn open_device(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<Option<Box<dyn UsbConnection>>, HostError> {
        locked(&self.open_calls).push(device.device_id);

        match locked(&self.open_behavior).clone() {
            OpenBehavior::Connect => Ok(Some(Box::new(FakeConnection {
                claim_error: locked(&self.claim_error).take(),
                close_counter: Some(self.closed_connections.clone()),
                ..Default::default()
            }))),
            OpenBehavior::NoConnection => Ok(None),
            OpenBehavior::Fail(e) => Err(e),
        }
    }
}
