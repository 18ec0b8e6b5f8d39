//! Hot-plug relay
//!
//! Republishes attach/detach broadcasts on the outbound event stream. The
//! stream has at most one subscriber; a new `listen` replaces the previous
//! sink. Events with no subscriber are dropped, never queued.

use common::HostBroadcast;
use protocol::{EventKind, EventRecord};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub type EventSink = mpsc::UnboundedSender<EventRecord>;
pub type EventStream = mpsc::UnboundedReceiver<EventRecord>;

#[derive(Default)]
pub struct HotplugRelay {
    sink: Mutex<Option<EventSink>>,
}

impl HotplugRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new subscriber, replacing any previous one
    pub fn listen(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.lock().replace(tx).is_some() {
            debug!("Replaced previous event subscriber");
        }
        info!("Event stream subscriber registered");
        rx
    }

    /// Remove the current subscriber
    pub fn cancel(&self) {
        if self.lock().take().is_some() {
            info!("Event stream subscriber cancelled");
        }
    }

    pub fn has_subscriber(&self) -> bool {
        self.lock().as_ref().is_some_and(|sink| !sink.is_closed())
    }

    /// Push an attach/detach broadcast to the subscriber. Returns true if
    /// an event was delivered.
    pub fn publish(&self, broadcast: HostBroadcast) -> bool {
        let (kind, device) = match broadcast {
            HostBroadcast::DeviceAttached(device) => (EventKind::Attached, device),
            HostBroadcast::DeviceDetached(device) => (EventKind::Detached, device),
            HostBroadcast::PermissionResult { .. } => return false,
        };

        let Some(device) = device else {
            warn!("Hot-plug broadcast ({:?}) without device, dropping", kind);
            return false;
        };

        let record = EventRecord::new(kind, &device);
        let mut sink = self.lock();
        let Some(tx) = sink.as_ref() else {
            debug!(
                "No event subscriber, dropping {:?} for {}",
                kind, device.device_name
            );
            return false;
        };

        if tx.send(record).is_err() {
            debug!("Event subscriber went away, clearing sink");
            *sink = None;
            return false;
        }

        debug!("Sent {:?} event for {}", kind, device.device_name);
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<EventSink>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::create_mock_ftdi_device;
    use protocol::DeviceId;

    #[test]
    fn test_no_subscriber_drops() {
        let relay = HotplugRelay::new();
        assert!(!relay.publish(HostBroadcast::DeviceAttached(Some(
            create_mock_ftdi_device(1002)
        ))));
    }

    #[test]
    fn test_missing_device_dropped() {
        let relay = HotplugRelay::new();
        let mut rx = relay.listen();
        assert!(!relay.publish(HostBroadcast::DeviceDetached(None)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_record_shape() {
        let relay = HotplugRelay::new();
        let mut rx = relay.listen();
        assert!(relay.publish(HostBroadcast::DeviceDetached(Some(
            create_mock_ftdi_device(1002)
        ))));

        let record = rx.try_recv().unwrap();
        assert_eq!(record.event, EventKind::Detached);
        assert_eq!(record.device.device_id, DeviceId(1002));
        assert_eq!(record.device.vid, 0x0403);
    }

    #[test]
    fn test_new_subscriber_replaces_old() {
        let relay = HotplugRelay::new();
        let mut first = relay.listen();
        let mut second = relay.listen();

        relay.publish(HostBroadcast::DeviceAttached(Some(create_mock_ftdi_device(
            1002,
        ))));

        assert!(second.try_recv().is_ok());
        // Old sender was dropped on replacement
        assert!(matches!(
            first.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_closed_sink_cleared() {
        let relay = HotplugRelay::new();
        drop(relay.listen());
        assert!(!relay.has_subscriber());
        assert!(!relay.publish(HostBroadcast::DeviceAttached(Some(
            create_mock_ftdi_device(1002)
        ))));
        assert!(relay.lock().is_none());
    }

    #[test]
    fn test_cancel() {
        let relay = HotplugRelay::new();
        let mut rx = relay.listen();
        relay.cancel();
        assert!(!relay.publish(HostBroadcast::DeviceAttached(Some(
            create_mock_ftdi_device(1002)
        ))));
        assert!(rx.try_recv().is_err());
    }
}
