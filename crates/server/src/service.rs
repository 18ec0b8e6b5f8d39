//! Bridge service
//!
//! Owns every component for the lifetime of the bridge: directory, broker,
//! opener, relay, session registry and dispatcher. `start` spawns the
//! broadcast pump; `shutdown` tears everything down exactly once.

use crate::directory::DeviceDirectory;
use crate::dispatcher::CommandDispatcher;
use crate::driver::{SerialDriver, UsbSerialDriver};
use crate::opener::DeviceOpener;
use crate::permission::PermissionBroker;
use crate::relay::HotplugRelay;
use crate::session::{DEFAULT_BASE_SESSION_ID, SessionRegistry};
use crate::usb::{UsbEventThread, UsbSubsystem};
use common::{BroadcastReceiver, HostBroadcast};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Tunables for [`BridgeService`]
#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    /// First session id handed out
    pub base_session_id: u32,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            base_session_id: DEFAULT_BASE_SESSION_ID,
        }
    }
}

pub struct BridgeService {
    subsystem: Arc<dyn UsbSubsystem>,
    broker: Arc<PermissionBroker>,
    relay: Arc<HotplugRelay>,
    sessions: Arc<SessionRegistry>,
    directory: Arc<DeviceDirectory>,
    dispatcher: Arc<CommandDispatcher>,
    broadcasts: BroadcastReceiver,
    pump: Mutex<Option<JoinHandle<()>>>,
    event_thread: Mutex<Option<UsbEventThread>>,
    shut_down: AtomicBool,
}

impl BridgeService {
    /// Wire the components on top of a USB subsystem with the built-in
    /// serial driver
    pub fn new(
        subsystem: Arc<dyn UsbSubsystem>,
        broadcasts: BroadcastReceiver,
        options: ServiceOptions,
    ) -> Self {
        Self::with_driver(
            subsystem,
            Arc::new(UsbSerialDriver::new()),
            broadcasts,
            options,
        )
    }

    pub fn with_driver(
        subsystem: Arc<dyn UsbSubsystem>,
        driver: Arc<dyn SerialDriver>,
        broadcasts: BroadcastReceiver,
        options: ServiceOptions,
    ) -> Self {
        let broker = Arc::new(PermissionBroker::new(subsystem.clone()));
        let sessions = Arc::new(SessionRegistry::new(options.base_session_id));
        let directory = Arc::new(DeviceDirectory::new(subsystem.clone()));
        let opener = Arc::new(DeviceOpener::new(
            subsystem.clone(),
            broker.clone(),
            driver,
            sessions.clone(),
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            directory.clone(),
            opener,
            sessions.clone(),
        ));

        Self {
            subsystem,
            broker,
            relay: Arc::new(HotplugRelay::new()),
            sessions,
            directory,
            dispatcher,
            broadcasts,
            pump: Mutex::new(None),
            event_thread: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Hand over the USB event thread so `shutdown` stops it
    pub fn attach_event_thread(&self, thread: UsbEventThread) {
        *self
            .event_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(thread);
    }

    /// Spawn the broadcast pump. Must run inside a Tokio runtime; a second
    /// call is a no-op.
    pub fn start(&self) {
        let mut pump = self.pump.lock().unwrap_or_else(PoisonError::into_inner);
        if pump.is_some() || self.is_shut_down() {
            return;
        }

        *pump = Some(tokio::spawn(pump_broadcasts(
            self.broadcasts.clone(),
            self.subsystem.clone(),
            self.broker.clone(),
            self.relay.clone(),
        )));
        info!("Bridge service started");
    }

    pub fn dispatcher(&self) -> Arc<CommandDispatcher> {
        self.dispatcher.clone()
    }

    pub fn relay(&self) -> Arc<HotplugRelay> {
        self.relay.clone()
    }

    pub fn broker(&self) -> Arc<PermissionBroker> {
        self.broker.clone()
    }

    pub fn sessions(&self) -> Arc<SessionRegistry> {
        self.sessions.clone()
    }

    pub fn directory(&self) -> Arc<DeviceDirectory> {
        self.directory.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Tear down: drop the event subscriber, fail parked permission
    /// requests, close sessions and stop the USB event thread
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down bridge service");

        self.relay.cancel();
        self.broker.cancel_all();
        let closed = self.sessions.close_all();
        if closed > 0 {
            info!("Closed {} open session(s)", closed);
        }

        self.broadcasts.close();
        if let Some(pump) = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pump.abort();
        }

        let thread = self
            .event_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut thread) = thread {
            thread.stop();
        }

        info!("Bridge service stopped");
    }
}

impl Drop for BridgeService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Route OS broadcasts: permission results to the broker, hot-plug to the
/// relay. Ends when the channel closes.
pub async fn pump_broadcasts(
    broadcasts: BroadcastReceiver,
    subsystem: Arc<dyn UsbSubsystem>,
    broker: Arc<PermissionBroker>,
    relay: Arc<HotplugRelay>,
) {
    while let Ok(broadcast) = broadcasts.recv().await {
        debug!("Host broadcast: {}", broadcast.action());
        match broadcast {
            HostBroadcast::PermissionResult { device_id, granted } => {
                broker.complete(device_id, granted);
            }
            hotplug => {
                if let HostBroadcast::DeviceDetached(Some(device)) = &hotplug {
                    subsystem.forget(device.device_id);
                }
                relay.publish(hotplug);
            }
        }
    }
    debug!("Broadcast channel closed, pump exiting");
}
