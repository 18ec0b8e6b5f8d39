//! USB event thread
//!
//! Dedicated thread running the libusb `handle_events()` loop. Hot-plug
//! callbacks fire on this thread and are forwarded to the Tokio runtime
//! through the broadcast channel.

use super::manager::HotplugCallback;
use common::BroadcastSender;
use rusb::{Context, HotplugBuilder, Registration, UsbContext};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Handle to the running USB event thread
///
/// Dropping the handle stops the thread.
pub struct UsbEventThread {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UsbEventThread {
    /// Stop the loop and wait for the thread to exit. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("USB event thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for UsbEventThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the USB event thread
///
/// The hot-plug callback is registered on the thread itself, and dropped
/// (unregistered) when the loop exits. Platforms without hot-plug support
/// still get the event loop, just no attach/detach notifications.
pub fn spawn_usb_event_thread(
    context: Context,
    broadcasts: BroadcastSender,
    allowed_filters: Vec<String>,
    poll_interval: Duration,
) -> io::Result<UsbEventThread> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let thread_shutdown = shutdown.clone();

    let handle = std::thread::Builder::new()
        .name("usb-events".to_string())
        .spawn(move || {
            run_event_loop(
                context,
                broadcasts,
                allowed_filters,
                poll_interval,
                thread_shutdown,
            )
        })?;

    Ok(UsbEventThread {
        shutdown,
        handle: Some(handle),
    })
}

fn run_event_loop(
    context: Context,
    broadcasts: BroadcastSender,
    allowed_filters: Vec<String>,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    info!("USB event thread started");

    let _registration: Option<Registration<Context>> = if rusb::has_hotplug() {
        let callback = HotplugCallback::new(broadcasts, allowed_filters);
        match HotplugBuilder::new()
            .enumerate(false)
            .register(&context, Box::new(callback))
        {
            Ok(registration) => {
                info!("Hot-plug detection enabled");
                Some(registration)
            }
            Err(e) => {
                warn!("Failed to register hot-plug callback: {}", e);
                None
            }
        }
    } else {
        warn!("Hot-plug not supported on this platform");
        None
    };

    while !shutdown.load(Ordering::SeqCst) {
        match context.handle_events(Some(poll_interval)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => {
                debug!("USB event handling interrupted");
            }
            Err(e) => {
                // Transient errors are retried after a short pause
                warn!("Error handling USB events: {}", e);
                std::thread::sleep(poll_interval);
            }
        }
    }

    info!("USB event thread stopped");
}
