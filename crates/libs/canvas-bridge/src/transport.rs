//! Transport adapter over the raw UI/backend channel.
//!
//! The channel only knows how to push one message; everything the backend
//! sends back arrives through an [`InboundSender`] obtained from
//! [`inbound_channel`]. The adapter tracks readiness, driven by the backend's
//! [`ReadySignal`](canvas_ipc::ReadySignal).

use std::io;
use std::sync::Arc;
use std::time::Duration;

use canvas_ipc::{Inbound, Outbound};
use tokio::sync::{mpsc, watch};

use crate::error::BridgeError;

/// Raw send primitive. Implementations must not block: queue the message
/// and return.
pub trait Channel: Send + Sync {
    fn send(&self, message: Outbound) -> io::Result<()>;
}

/// Handle the channel implementation uses to hand incoming messages to the
/// bridge. Dropping every sender closes the inbound stream.
#[derive(Clone, Debug)]
pub struct InboundSender {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl InboundSender {
    /// Returns `false` once the bridge stopped listening.
    pub fn deliver(&self, message: Inbound) -> bool {
        self.tx.send(message).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct InboundReceiver {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

impl InboundReceiver {
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }
}

pub fn inbound_channel() -> (InboundSender, InboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InboundSender { tx }, InboundReceiver { rx })
}

pub struct TransportAdapter {
    channel: Arc<dyn Channel>,
    ready: watch::Sender<bool>,
}

impl TransportAdapter {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        let (ready, _) = watch::channel(false);
        Self { channel, ready }
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    pub fn mark_closed(&self) {
        self.ready.send_replace(false);
    }

    /// Waits until the backend signalled readiness.
    pub async fn initialize(&self, timeout: Duration) -> Result<(), BridgeError> {
        let mut ready = self.ready.subscribe();
        let outcome = tokio::time::timeout(timeout, ready.wait_for(|ready| *ready))
            .await
            .map(|waited| waited.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(BridgeError::Connection { message: "readiness channel closed".into() }),
            Err(_) => Err(BridgeError::Connection {
                message: format!("backend not ready after {}ms", timeout.as_millis()),
            }),
        }
    }

    /// Fire-and-forget send.
    pub fn send(&self, message: Outbound) -> Result<(), BridgeError> {
        if !self.is_ready() {
            return Err(BridgeError::transport("channel not ready"));
        }
        self.channel.send(message).map_err(|err| BridgeError::transport(err.to_string()))
    }
}
