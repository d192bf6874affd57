#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use canvas_bridge::{inbound_channel, Bridge, BridgeConfig, Channel, InboundSender};
use canvas_ipc::{Inbound, Outbound, ReadySignal, RequestEnvelope, ResponseEnvelope, WireError};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Defaults with idle pings off, so only the test's own calls hit the wire.
pub fn quiet_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.health.ping_interval_ms = 0;
    config
}

/// One message handed to the channel.
#[derive(Clone, Debug)]
pub struct Sent {
    pub at: Instant,
    pub message: Outbound,
}

/// Channel that records every message and forwards it to the test.
pub struct RecordingChannel {
    sent: Mutex<Vec<Sent>>,
    forward: mpsc::UnboundedSender<Outbound>,
}

impl RecordingChannel {
    /// The channel plus the receiving end of everything it forwards.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (forward, outbound) = mpsc::unbounded_channel();
        (Arc::new(Self { sent: Mutex::new(Vec::new()), forward }), outbound)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("recording mutex poisoned").clone()
    }

    /// Number of messages handed to the channel, batches counting once.
    pub fn send_count(&self) -> usize {
        self.sent.lock().expect("recording mutex poisoned").len()
    }
}

impl Channel for RecordingChannel {
    fn send(&self, message: Outbound) -> io::Result<()> {
        self.sent
            .lock()
            .expect("recording mutex poisoned")
            .push(Sent { at: Instant::now(), message: message.clone() });
        let _ = self.forward.send(message);
        Ok(())
    }
}

/// A bridge wired to a recording channel, with the test playing the backend.
pub struct Harness {
    pub bridge: Bridge,
    pub started: Instant,
    channel: Arc<RecordingChannel>,
    backend: InboundSender,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl Harness {
    /// Builds the bridge and completes the ready handshake.
    pub async fn start(config: BridgeConfig) -> Self {
        let harness = Self::unready(config);
        harness.backend.deliver(Inbound::Ready(ReadySignal::ready()));
        harness.bridge.initialize().await.expect("bridge ready");
        harness
    }

    /// Builds the bridge without the backend ever signalling readiness.
    pub fn unready(config: BridgeConfig) -> Self {
        init_logging();
        let (channel, outbound) = RecordingChannel::new();
        let (backend, inbound) = inbound_channel();
        let bridge = Bridge::new(config, channel.clone(), inbound);
        Self { bridge, started: Instant::now(), channel, backend, outbound }
    }

    /// Waits for the next message the bridge sends.
    pub async fn next_outbound(&mut self) -> Outbound {
        self.outbound.recv().await.expect("channel alive")
    }

    /// Waits for the next message and expects it to hold a single request.
    pub async fn next_request(&mut self) -> RequestEnvelope {
        match self.next_outbound().await {
            Outbound::Request(request) => request,
            Outbound::Batch(batch) => panic!("expected a single request, got {batch:?}"),
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.channel.sent()
    }

    pub fn send_count(&self) -> usize {
        self.channel.send_count()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn reply_ok(&self, id: u64, result: Value) {
        self.deliver(Inbound::Response(ResponseEnvelope::ok(id, result)));
    }

    pub fn reply_err(&self, id: u64, error: WireError) {
        self.deliver(Inbound::Response(ResponseEnvelope::err(id, error)));
    }

    pub fn deliver(&self, message: Inbound) {
        assert!(self.backend.deliver(message), "bridge stopped listening");
    }

    /// Lets spawned tasks run without moving the paused clock.
    pub async fn settle(&self) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }
}
