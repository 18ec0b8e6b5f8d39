//! Framed message transport
//!
//! Reads length-prefixed messages from the caller and writes replies and
//! events back. Every method call runs on its own task so a call parked on
//! a permission prompt never holds up the rest. All outbound frames go
//! through one writer task.

use crate::service::BridgeService;
use protocol::{
    CURRENT_VERSION, ErrorCode, Message, MessagePayload, MethodError, ProtocolError,
    read_framed_async, validate_version, write_framed_async,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Outbound = mpsc::UnboundedSender<Message>;

fn message(payload: MessagePayload) -> Message {
    Message {
        version: CURRENT_VERSION,
        payload,
    }
}

/// Serve one caller until its input stream ends
///
/// Malformed frames are skipped; I/O errors and oversized frames end the
/// session with an error.
pub async fn serve<R, W>(service: &BridgeService, mut reader: R, writer: W) -> protocol::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_loop(writer, out_rx));
    let mut forwarder: Option<JoinHandle<()>> = None;

    info!("Bridge transport ready");

    let result = loop {
        let msg = match read_framed_async(&mut reader).await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                info!("Caller closed the stream");
                break Ok(());
            }
            Err(ProtocolError::Serialization(e)) => {
                warn!("Skipping malformed frame: {}", e);
                continue;
            }
            Err(e) => break Err(e),
        };

        if let Err(e) = validate_version(&msg.version) {
            warn!("Rejecting frame: {}", e);
            if let MessagePayload::Call { id, .. } = msg.payload {
                let error = MethodError::new(ErrorCode::NotImplemented, e.to_string());
                let _ = out_tx.send(message(MessagePayload::Error { id, error }));
            }
            continue;
        }

        match msg.payload {
            MessagePayload::Call {
                id,
                method,
                arguments,
            } => {
                let dispatcher = service.dispatcher();
                let out = out_tx.clone();
                tokio::spawn(async move {
                    let payload = match dispatcher.dispatch(&method, &arguments).await {
                        Ok(result) => MessagePayload::Reply { id, result },
                        Err(e) => {
                            debug!("Call {} ({}) failed: {}", id, method, e);
                            MessagePayload::Error {
                                id,
                                error: e.to_method_error(),
                            }
                        }
                    };
                    let _ = out.send(message(payload));
                });
            }
            MessagePayload::Listen => {
                if let Some(previous) = forwarder.take() {
                    previous.abort();
                }
                forwarder = Some(spawn_forwarder(service, out_tx.clone()));
            }
            MessagePayload::Cancel => {
                service.relay().cancel();
                if let Some(previous) = forwarder.take() {
                    previous.abort();
                }
            }
            other => {
                warn!("Ignoring unexpected inbound message: {:?}", other);
            }
        }
    };

    if let Some(forwarder) = forwarder.take() {
        forwarder.abort();
    }
    service.relay().cancel();
    drop(out_tx);

    // In-flight calls hold sender clones; the writer drains until they finish
    if let Err(e) = writer_task.await {
        error!("Writer task failed: {}", e);
    }

    result
}

/// Forward relay events to the caller until the subscription is replaced
fn spawn_forwarder(service: &BridgeService, out: Outbound) -> JoinHandle<()> {
    let mut events = service.relay().listen();
    tokio::spawn(async move {
        while let Some(record) = events.recv().await {
            if out.send(message(MessagePayload::Event(record))).is_err() {
                break;
            }
        }
        debug!("Event forwarder finished");
    })
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Message>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_framed_async(&mut writer, &msg).await {
            error!("Failed to write frame: {}", e);
            break;
        }
    }
}
