//! Serial sessions
//!
//! A session bundles an open connection with the serial driver binding.
//! The caller addresses it by channel name; the registry keeps it alive
//! until the caller closes it or the bridge shuts down.

use crate::driver::SerialPort;
use crate::usb::UsbConnection;
use protocol::{DeviceDescriptor, SessionId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Default first session id
pub const DEFAULT_BASE_SESSION_ID: u32 = 100;

/// One open serial session
pub struct SerialSession {
    pub id: SessionId,
    pub device: DeviceDescriptor,
    pub port: SerialPort,
    connection: Box<dyn UsbConnection>,
}

impl SerialSession {
    pub fn new(
        id: SessionId,
        device: DeviceDescriptor,
        port: SerialPort,
        connection: Box<dyn UsbConnection>,
    ) -> Self {
        Self {
            id,
            device,
            port,
            connection,
        }
    }

    pub fn channel_name(&self) -> String {
        self.id.channel_name()
    }

    pub fn close(&mut self) {
        self.connection.close();
        debug!("Closed session {} ({})", self.id.0, self.device.device_name);
    }
}

impl std::fmt::Debug for SerialSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialSession")
            .field("id", &self.id)
            .field("device", &self.device.device_name)
            .field("port", &self.port)
            .finish()
    }
}

/// Open sessions by id
pub struct SessionRegistry {
    next_id: AtomicU32,
    sessions: Mutex<HashMap<SessionId, SerialSession>>,
}

impl SessionRegistry {
    pub fn new(base_id: u32) -> Self {
        Self {
            next_id: AtomicU32::new(base_id),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Next session id; strictly increasing
    pub fn allocate_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Keep a session alive; returns its channel name
    pub fn insert(&self, session: SerialSession) -> String {
        let channel = session.channel_name();
        info!(
            "Session {} open on {} ({} interface {})",
            channel, session.device.device_name, session.port.chip, session.port.interface
        );
        self.lock().insert(session.id, session);
        channel
    }

    /// Close and forget a session. Returns false if it was unknown.
    pub fn close(&self, id: SessionId) -> bool {
        let removed = self.lock().remove(&id);
        match removed {
            Some(mut session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Close every session; returns how many were closed
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().map(|(_, s)| s).collect();
        let count = drained.len();
        for mut session in drained {
            session.close();
        }
        count
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, SerialSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_SESSION_ID)
    }
}
