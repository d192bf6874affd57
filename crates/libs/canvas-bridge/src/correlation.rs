use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use canvas_ipc::{RequestId, ResponseEnvelope};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::BridgeError;
use crate::metrics::MetricsAggregator;

const RETIRED_CAPACITY: usize = 256;

pub type AttemptResult = Result<Value, BridgeError>;

/// One outstanding request awaiting its response.
#[derive(Debug)]
pub struct PendingRequest {
    pub method: String,
    pub attempt: u32,
    pub registered_at: Instant,
    pub sent_at: Option<Instant>,
    pub timeout: Duration,
    tx: oneshot::Sender<AttemptResult>,
}

impl PendingRequest {
    fn latency(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.sent_at.unwrap_or(self.registered_at))
    }

    fn timeout_error(&self) -> BridgeError {
        BridgeError::Timeout {
            method: self.method.clone(),
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// What happened to an incoming response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Delivered,
    /// The request was cancelled or timed out earlier; the response is dropped.
    Late,
    Unknown,
}

/// Matches responses to outstanding requests by id. An entry is removed the
/// moment it resolves, so no request completes twice.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: HashMap<RequestId, PendingRequest>,
    retired: VecDeque<RequestId>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: RequestId,
        method: impl Into<String>,
        attempt: u32,
        timeout: Duration,
        now: Instant,
    ) -> oneshot::Receiver<AttemptResult> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingRequest {
                method: method.into(),
                attempt,
                registered_at: now,
                sent_at: None,
                timeout,
                tx,
            },
        );
        rx
    }

    pub fn mark_sent(&mut self, id: RequestId, now: Instant) {
        if let Some(pending) = self.pending.get_mut(&id) {
            pending.sent_at = Some(now);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Completes the request named by `response` and records its latency.
    pub fn resolve(
        &mut self,
        response: ResponseEnvelope,
        now: Instant,
        metrics: &mut MetricsAggregator,
    ) -> Resolution {
        let id = response.id;
        let Some(pending) = self.pending.remove(&id) else {
            if self.retired.contains(&id) {
                log::debug!("bridge: dropping late response for request {id}");
                return Resolution::Late;
            }
            log::warn!("bridge: discarding response for unknown request {id}");
            return Resolution::Unknown;
        };

        let outcome = response.into_result().map_err(BridgeError::from);
        metrics.record(&pending.method, pending.latency(now), outcome.is_ok(), now);
        if pending.tx.send(outcome).is_err() {
            log::debug!("bridge: request {id} resolved after its caller went away");
        }
        Resolution::Delivered
    }

    /// Times out a request whose deadline passed. Returns `None` when the
    /// request already resolved.
    pub fn expire(
        &mut self,
        id: RequestId,
        now: Instant,
        metrics: &mut MetricsAggregator,
    ) -> Option<BridgeError> {
        let pending = self.pending.remove(&id)?;
        self.retire(id);
        log::debug!(
            "bridge: request {id} ({} attempt {}) timed out after {:?}",
            pending.method,
            pending.attempt,
            pending.timeout
        );
        metrics.record(&pending.method, pending.latency(now), false, now);
        Some(pending.timeout_error())
    }

    /// Rejects a request that could not be sent.
    pub fn fail(
        &mut self,
        id: RequestId,
        error: BridgeError,
        now: Instant,
        metrics: &mut MetricsAggregator,
    ) {
        if let Some(pending) = self.pending.remove(&id) {
            metrics.record(&pending.method, pending.latency(now), false, now);
            let _ = pending.tx.send(Err(error));
        }
    }

    /// Forgets a cancelled request; a response arriving later is dropped.
    pub fn abandon(&mut self, id: RequestId) -> Option<PendingRequest> {
        let pending = self.pending.remove(&id)?;
        self.retire(id);
        Some(pending)
    }

    /// Rejects every outstanding request with `error`.
    pub fn fail_all(&mut self, error: &BridgeError) {
        for (id, pending) in self.pending.drain() {
            let _ = pending.tx.send(Err(error.clone()));
            self.retired.push_back(id);
        }
        while self.retired.len() > RETIRED_CAPACITY {
            self.retired.pop_front();
        }
    }

    fn retire(&mut self, id: RequestId) {
        if self.retired.len() == RETIRED_CAPACITY {
            self.retired.pop_front();
        }
        self.retired.push_back(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_ipc::WireError;
    use serde_json::json;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[tokio::test(start_paused = true)]
    async fn response_resolves_once_and_records_latency_from_send() {
        let mut table = CorrelationTable::new();
        let mut metrics = MetricsAggregator::new(10);
        let t0 = Instant::now();
        let rx = table.register(1, "getFields", 1, ms(1_000), t0);
        table.mark_sent(1, t0 + ms(20));

        let resolution = table.resolve(ResponseEnvelope::ok(1, json!([1])), t0 + ms(50), &mut metrics);
        assert_eq!(resolution, Resolution::Delivered);
        assert_eq!(rx.await.expect("delivered"), Ok(json!([1])));
        assert_eq!(table.len(), 0);

        let snapshot = metrics.snapshot(Some("getFields"), None, t0 + ms(50));
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.max_ms, 30.0);

        // A duplicate is never delivered twice.
        let again = table.resolve(ResponseEnvelope::ok(1, json!([1])), t0 + ms(60), &mut metrics);
        assert_eq!(again, Resolution::Unknown);
        assert_eq!(metrics.snapshot(Some("getFields"), None, t0 + ms(60)).count, 1);
    }

    #[tokio::test]
    async fn backend_errors_reach_the_waiter_typed() {
        let mut table = CorrelationTable::new();
        let mut metrics = MetricsAggregator::new(10);
        let now = Instant::now();
        let rx = table.register(2, "save", 1, ms(1_000), now);
        table.resolve(ResponseEnvelope::err(2, WireError::busy("indexing")), now, &mut metrics);
        match rx.await.expect("delivered") {
            Err(BridgeError::Backend { code, retryable, .. }) => {
                assert_eq!(code, "BUSY");
                assert!(retryable);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(metrics.snapshot(Some("save"), None, now).success_rate, 0.0);
    }

    #[test]
    fn expired_and_abandoned_requests_turn_late_responses_quiet() {
        let mut table = CorrelationTable::new();
        let mut metrics = MetricsAggregator::new(10);
        let now = Instant::now();
        let _rx3 = table.register(3, "save", 1, ms(100), now);
        let _rx4 = table.register(4, "save", 1, ms(100), now);
        assert_eq!(table.len(), 2);

        let err = table.expire(3, now + ms(100), &mut metrics).expect("pending");
        assert_eq!(err, BridgeError::Timeout { method: "save".into(), timeout_ms: 100 });
        assert!(table.expire(3, now + ms(100), &mut metrics).is_none());
        assert!(table.abandon(4).is_some());

        for id in [3, 4] {
            let late = table.resolve(ResponseEnvelope::ok(id, json!(null)), now, &mut metrics);
            assert_eq!(late, Resolution::Late);
        }
        let unknown = table.resolve(ResponseEnvelope::ok(99, json!(null)), now, &mut metrics);
        assert_eq!(unknown, Resolution::Unknown);
    }

    #[test]
    fn retired_ring_is_bounded() {
        let mut table = CorrelationTable::new();
        let now = Instant::now();
        for id in 0..(RETIRED_CAPACITY as u64 + 10) {
            let _rx = table.register(id, "ping", 1, ms(10), now);
            table.abandon(id);
        }
        assert_eq!(table.retired.len(), RETIRED_CAPACITY);
        assert!(!table.retired.contains(&0));
    }

    #[tokio::test]
    async fn fail_all_rejects_everyone() {
        let mut table = CorrelationTable::new();
        let now = Instant::now();
        let rx = table.register(5, "listPlugins", 1, ms(10), now);
        table.fail_all(&BridgeError::Disposed);
        assert_eq!(rx.await.expect("rejected"), Err(BridgeError::Disposed));
        assert_eq!(table.len(), 0);
    }
}
