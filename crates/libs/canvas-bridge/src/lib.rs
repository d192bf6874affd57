//! Request/response bridge between the canvas editor UI and its backend
//! logic process.
//!
//! The transport underneath delivers messages reliably and in order per
//! sender, but gives no retries, no multiplexing and no response ordering.
//! The [`Bridge`] adds those on the UI side:
//!
//! - **Correlation**: every request carries an id; responses may arrive in
//!   any order and each id resolves at most once
//! - **Coalescing**: identical concurrent calls share one backend request
//! - **Batching**: small requests wait up to a short window and leave
//!   together, highest priority first
//! - **Retries**: timeouts and retryable backend errors are retried with
//!   exponential backoff
//! - **Circuit breaking**: repeated failures stop traffic until a probe
//!   succeeds
//! - **Metrics**: rolling per-method latency and success rates
//!
//! ```no_run
//! # async fn demo(reader: tokio::io::DuplexStream, writer: tokio::io::DuplexStream) -> Result<(), canvas_bridge::BridgeError> {
//! use std::sync::Arc;
//! use canvas_bridge::{inbound_channel, Bridge, BridgeConfig, StreamChannel};
//!
//! let (inbound_tx, inbound_rx) = inbound_channel();
//! let channel = Arc::new(StreamChannel::spawn(reader, writer, inbound_tx));
//! let bridge = Bridge::new(BridgeConfig::default(), channel, inbound_rx);
//! bridge.initialize().await?;
//!
//! let fields = bridge.get_fields(Some("invoice")).await?;
//! println!("{} fields", fields.len());
//! bridge.dispose();
//! # Ok(())
//! # }
//! ```

mod bridge;
pub mod config;
mod correlation;
mod dedup;
mod domains;
pub mod error;
pub mod health;
pub mod metrics;
mod queue;
pub mod retry;
mod stream;
pub mod transport;

pub use bridge::{Bridge, BridgeStats, CallHandle, CallOptions, CallTicket};
pub use config::BridgeConfig;
pub use dedup::DedupKey;
pub use error::{BridgeError, ConfigError};
pub use health::{HealthSnapshot, HealthStatus};
pub use metrics::MethodMetrics;
pub use retry::RetryPolicy;
pub use stream::StreamChannel;
pub use transport::{inbound_channel, Channel, InboundReceiver, InboundSender};

pub use canvas_ipc::{Method, Priority};
