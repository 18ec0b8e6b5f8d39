//! Command dispatcher
//!
//! Entry point for method calls. Validates arguments, turns sentinel
//! values into typed selectors, and routes to the directory, opener and
//! session registry.

use crate::directory::DeviceDirectory;
use crate::error::{BridgeError, Result};
use crate::opener::{AcquirePermission, DeviceOpener};
use crate::session::SessionRegistry;
use protocol::{ChipSelector, DeviceSelector, InterfaceSelector, SessionId};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub const METHOD_CREATE: &str = "create";
pub const METHOD_LIST_DEVICES: &str = "listDevices";
pub const METHOD_CLOSE: &str = "close";

/// Parsed `create` arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub chip: ChipSelector,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device: DeviceSelector,
    pub interface: InterfaceSelector,
}

impl CreateRequest {
    pub fn from_arguments(arguments: &Map<String, Value>) -> Result<Self> {
        let (Some(vendor_id), Some(product_id)) = (
            optional_int(arguments, "vid")?,
            optional_int(arguments, "pid")?,
        ) else {
            return Err(BridgeError::MissingArgument(
                "Missing VID or PID for create method.".to_string(),
            ));
        };

        let chip = match arguments.get("type") {
            None | Some(Value::Null) => ChipSelector::Auto,
            Some(Value::String(name)) => ChipSelector::from_arg(Some(name.as_str())),
            Some(_) => {
                return Err(BridgeError::MissingArgument(
                    "Argument 'type' must be a string".to_string(),
                ));
            }
        };

        let device = optional_int(arguments, "deviceId")?
            .map(|id| {
                i32::try_from(id).map_err(|_| {
                    BridgeError::MissingArgument(format!("Argument 'deviceId' out of range: {}", id))
                })
            })
            .transpose()?;

        Ok(Self {
            chip,
            vendor_id: usb_id(vendor_id, "vid")?,
            product_id: usb_id(product_id, "pid")?,
            device: DeviceSelector::from_arg(device),
            interface: InterfaceSelector::from_arg(optional_int(arguments, "interface")?),
        })
    }
}

/// Integer argument; absent and null are `None`, other non-integers fail
fn optional_int(arguments: &Map<String, Value>, name: &str) -> Result<Option<i64>> {
    match arguments.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or_else(|| {
            BridgeError::MissingArgument(format!("Argument '{}' must be an integer", name))
        }),
    }
}

fn usb_id(value: i64, name: &str) -> Result<u16> {
    u16::try_from(value).map_err(|_| {
        BridgeError::MissingArgument(format!("Argument '{}' out of range: {}", name, value))
    })
}

pub struct CommandDispatcher {
    directory: Arc<DeviceDirectory>,
    opener: Arc<DeviceOpener>,
    sessions: Arc<SessionRegistry>,
}

impl CommandDispatcher {
    pub fn new(
        directory: Arc<DeviceDirectory>,
        opener: Arc<DeviceOpener>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            directory,
            opener,
            sessions,
        }
    }

    /// Handle one method call
    pub async fn dispatch(&self, method: &str, arguments: &Map<String, Value>) -> Result<Value> {
        debug!("Method call: {}", method);
        match method {
            METHOD_CREATE => {
                let request = CreateRequest::from_arguments(arguments)?;
                self.create(request).await.map(Value::String)
            }
            METHOD_LIST_DEVICES => {
                let records = self.directory.list_records()?;
                serde_json::to_value(records).map_err(|e| {
                    BridgeError::SubsystemUnavailable(format!("Failed to encode device list: {}", e))
                })
            }
            METHOD_CLOSE => {
                let channel = match arguments.get("channel") {
                    Some(Value::String(channel)) => channel.as_str(),
                    _ => {
                        return Err(BridgeError::MissingArgument(
                            "Missing channel for close method.".to_string(),
                        ));
                    }
                };
                self.close(channel).map(|()| Value::Null)
            }
            other => Err(BridgeError::NotImplemented(other.to_string())),
        }
    }

    /// Locate, open and register a session; returns its channel name
    pub async fn create(&self, request: CreateRequest) -> Result<String> {
        let device = self.directory.find_device(
            request.vendor_id,
            request.product_id,
            request.device,
        )?;

        let session = self
            .opener
            .open(
                &request.chip,
                &device,
                request.interface,
                AcquirePermission::Allowed,
            )
            .await?;

        Ok(self.sessions.insert(session))
    }

    pub fn close(&self, channel: &str) -> Result<()> {
        let closed = SessionId::from_channel_name(channel)
            .is_some_and(|id| self.sessions.close(id));
        if !closed {
            return Err(BridgeError::SessionNotFound(channel.to_string()));
        }
        info!("Closed session {}", channel);
        Ok(())
    }
}
