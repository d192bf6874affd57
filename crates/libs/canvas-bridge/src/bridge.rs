use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use canvas_ipc::{BatchEnvelope, Inbound, Method, Outbound, Priority, RequestId, PING_METHOD};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::correlation::{AttemptResult, CorrelationTable};
use crate::dedup::{CallId, DedupKey, Deduplicator, InFlightCall, Waiter, WaiterId};
use crate::error::BridgeError;
use crate::health::{Admission, HealthMonitor, HealthSnapshot, HealthStatus};
use crate::metrics::{MethodMetrics, MetricsAggregator};
use crate::queue::{Request, RequestQueue};
use crate::retry::RetryPolicy;
use crate::transport::{Channel, InboundReceiver, TransportAdapter};

const HEALTH_EVENT_CAPACITY: usize = 16;
const IDLE_SLEEP: Duration = Duration::from_secs(3600);

// ── Call options and handles ──────────────────────────────────────────────────

/// Per-call knobs. The defaults coalesce identical calls, use normal
/// priority and take timeout and retry limits from the bridge config.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallOptions {
    pub priority: Priority,
    /// Per-attempt timeout.
    pub timeout: Option<Duration>,
    pub immediate: bool,
    pub sequential: bool,
    pub dedupe: bool,
    pub max_attempts: Option<u32>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            timeout: None,
            immediate: false,
            sequential: false,
            dedupe: true,
            max_attempts: None,
        }
    }
}

impl CallOptions {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Skip the batch window and send alone.
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Hold dispatch until every earlier sequential call has resolved.
    pub fn sequential(mut self) -> Self {
        self.sequential = true;
        self
    }

    /// Opt in or out of coalescing with identical in-flight calls.
    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Sizes of the bridge's internal tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct BridgeStats {
    /// Logical calls with at least one waiter.
    pub in_flight_calls: usize,
    /// Requests waiting for the scheduler.
    pub queued_requests: usize,
    /// Requests registered and awaiting a response, sent or not.
    pub pending_requests: usize,
}

/// Identifies one caller's interest in a call, for [`Bridge::cancel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallTicket {
    call_id: CallId,
    waiter_id: WaiterId,
}

/// Completion of a bridge call.
#[derive(Debug)]
pub struct CallHandle {
    ticket: CallTicket,
    rx: oneshot::Receiver<AttemptResult>,
}

impl CallHandle {
    fn failed(ticket: CallTicket, error: BridgeError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { ticket, rx }
    }

    pub fn ticket(&self) -> CallTicket {
        self.ticket
    }
}

impl Future for CallHandle {
    type Output = Result<Value, BridgeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| result.unwrap_or(Err(BridgeError::Disposed)))
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct BridgeState {
    correlation: CorrelationTable,
    dedup: Deduplicator,
    queue: RequestQueue,
    health: HealthMonitor,
    metrics: MetricsAggregator,
    last_activity: Instant,
    disposed: bool,
}

/// What every attempt of one logical call sends.
#[derive(Clone, Debug)]
struct CallTemplate {
    method: String,
    params: Value,
    priority: Priority,
    timeout: Duration,
    immediate: bool,
    sequential: bool,
}

/// A registered attempt awaiting its response.
struct Attempt {
    request_id: RequestId,
    deadline: Instant,
    rx: oneshot::Receiver<AttemptResult>,
}

struct Shared {
    config: BridgeConfig,
    retry: RetryPolicy,
    transport: TransportAdapter,
    state: Mutex<BridgeState>,
    next_request_id: AtomicU64,
    next_call_id: AtomicU64,
    next_waiter_id: AtomicU64,
    scheduler_wake: Notify,
    maintenance_wake: Notify,
    health_events: broadcast::Sender<HealthSnapshot>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().expect("bridge state mutex poisoned")
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().expect("bridge task mutex poisoned");
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    fn health_snapshot(&self, state: &BridgeState, now: Instant) -> HealthSnapshot {
        let mut snapshot = state.health.snapshot(now);
        let recent = state.metrics.snapshot(None, Some(self.config.success_window()), now);
        snapshot.recent_success_rate = (recent.count > 0).then_some(recent.success_rate);
        snapshot
    }

    fn publish_health(&self, snapshot: HealthSnapshot) {
        log::debug!("bridge: health is now {}", snapshot.status);
        if snapshot.status == HealthStatus::Open {
            // The maintenance task owns the half-open transition.
            self.maintenance_wake.notify_one();
        }
        let _ = self.health_events.send(snapshot);
    }

    /// Registers and queues the next attempt of `call_id`.
    fn enqueue_attempt(
        &self,
        state: &mut BridgeState,
        call_id: CallId,
        template: &CallTemplate,
        attempt: u32,
        now: Instant,
    ) -> Attempt {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let rx = state.correlation.register(
            request_id,
            template.method.clone(),
            attempt,
            template.timeout,
            now,
        );
        state.queue.enqueue(
            Request {
                id: request_id,
                call_id,
                method: template.method.clone(),
                params: template.params.clone(),
                priority: template.priority,
                enqueued_at: now,
                attempt,
                timeout: template.timeout,
                // Retries skip the batch window; the backoff already delayed them.
                immediate: template.immediate || attempt > 1,
                sequential: template.sequential,
            },
            now,
        );
        if let Some(call) = state.dedup.get_mut(call_id) {
            call.current_request = Some(request_id);
            call.attempts = attempt;
        }
        Attempt { request_id, deadline: now + template.timeout, rx }
    }

    fn send_group(&self, group: Vec<Request>) {
        let ids: Vec<RequestId> = group.iter().map(|request| request.id).collect();
        let message = if group.len() == 1 {
            Outbound::Request(group[0].envelope())
        } else {
            Outbound::Batch(BatchEnvelope { batch: group.iter().map(Request::envelope).collect() })
        };
        for request in group.iter().filter(|request| request.attempt > 1) {
            log::debug!("bridge: resending {} as request {} (attempt {})", request.method, request.id, request.attempt);
        }
        log::debug!("bridge: flushing {} request(s) {:?}", ids.len(), ids);
        if let Err(err) = self.transport.send(message) {
            log::warn!("bridge: send of {} request(s) failed: {err}", ids.len());
            let now = Instant::now();
            let mut guard = self.lock_state();
            let state = &mut *guard;
            for id in ids {
                state.correlation.fail(id, err.clone(), now, &mut state.metrics);
            }
        }
    }

    /// Resolves every waiter of a finished logical call and reports the
    /// outcome to the health monitor once. Calls whose last attempt never
    /// reached the transport leave the health counters alone.
    fn finish_call(&self, call_id: CallId, outcome: AttemptResult, reached_backend: bool) {
        let now = Instant::now();
        let (call, snapshot) = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            if state.queue.release_sequential(call_id) {
                self.scheduler_wake.notify_one();
            }
            let Some(call) = state.dedup.remove(call_id) else {
                return;
            };
            if let Some(request_id) = call.current_request {
                state.queue.remove(request_id);
                state.correlation.abandon(request_id);
            }
            state.last_activity = now;

            let transition = match &outcome {
                Ok(_) => state.health.record_success(now),
                Err(BridgeError::Cancelled { .. }) | Err(BridgeError::Disposed) => {
                    if call.probe {
                        state.health.release_probe();
                    }
                    None
                }
                Err(_) if !reached_backend => {
                    if call.probe {
                        state.health.release_probe();
                    }
                    None
                }
                Err(err) if err.is_backend_failure() => state.health.record_failure(now, call.probe),
                // The backend answered, just not with a result.
                Err(_) => state.health.record_success(now),
            };
            (call, transition.map(|_| self.health_snapshot(state, now)))
        };

        if let Err(err) = &outcome {
            log::debug!("bridge: {} failed after {} attempt(s): {err}", call.method, call.attempts);
        }
        for waiter in call.waiters {
            let _ = waiter.tx.send(outcome.clone());
        }
        if let Some(snapshot) = snapshot {
            self.publish_health(snapshot);
        }
    }

    fn call(self: &Arc<Self>, method: String, params: Value, options: CallOptions) -> CallHandle {
        let waiter_id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let (tx, rx) = oneshot::channel();

        let mut guard = self.lock_state();
        let state = &mut *guard;
        if state.disposed {
            return CallHandle::failed(CallTicket { call_id: 0, waiter_id }, BridgeError::Disposed);
        }

        let key = options.dedupe.then(|| DedupKey::new(&method, &params));
        if let Some(call_id) = key.as_ref().and_then(|key| state.dedup.find(key)) {
            log::debug!("bridge: coalescing {method} into in-flight call {call_id}");
            state.dedup.attach(call_id, Waiter { id: waiter_id, tx });
            return CallHandle { ticket: CallTicket { call_id, waiter_id }, rx };
        }

        let transition = state.health.tick(now);
        let probe = match state.health.admit(now) {
            Admission::Allowed => false,
            Admission::Probe => {
                log::info!("bridge: {method} is the half-open probe");
                true
            }
            Admission::Rejected { retry_after } => {
                let snapshot = transition.map(|_| self.health_snapshot(state, now));
                drop(guard);
                if let Some(snapshot) = snapshot {
                    self.publish_health(snapshot);
                }
                let retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
                return CallHandle::failed(
                    CallTicket { call_id: 0, waiter_id },
                    BridgeError::BackendUnavailable { retry_after_ms },
                );
            }
        };

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown.child_token();
        let mut call = InFlightCall::new(key, method.clone(), token.clone());
        call.probe = probe;
        call.waiters.push(Waiter { id: waiter_id, tx });
        state.dedup.insert(call_id, call);

        let template = CallTemplate {
            method,
            params,
            priority: options.priority,
            timeout: options.timeout.unwrap_or_else(|| self.config.default_timeout()),
            immediate: options.immediate,
            sequential: options.sequential,
        };
        let policy = match options.max_attempts {
            Some(max_attempts) => self.retry.with_max_attempts(max_attempts),
            None => self.retry,
        };
        let attempt = self.enqueue_attempt(state, call_id, &template, 1, now);
        state.last_activity = now;
        let snapshot = transition.map(|_| self.health_snapshot(state, now));
        drop(guard);

        if let Some(snapshot) = snapshot {
            self.publish_health(snapshot);
        }
        self.scheduler_wake.notify_one();
        self.track(tokio::spawn(drive_call(
            self.clone(),
            call_id,
            template,
            policy,
            attempt,
            token,
        )));
        CallHandle { ticket: CallTicket { call_id, waiter_id }, rx }
    }

    fn dispose(&self) {
        let calls = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.queue.drain();
            state.correlation.fail_all(&BridgeError::Disposed);
            state.dedup.drain()
        };
        self.shutdown.cancel();
        self.transport.mark_closed();
        for call in calls {
            for waiter in call.waiters {
                let _ = waiter.tx.send(Err(BridgeError::Disposed));
            }
        }
        let tasks = std::mem::take(&mut *self.tasks.lock().expect("bridge task mutex poisoned"));
        log::info!("bridge: disposed, stopping {} task(s)", tasks.len());
    }
}

// ── Bridge ────────────────────────────────────────────────────────────────────

/// Disposes the bridge when the last [`Bridge`] handle goes away.
struct DisposeOnDrop(Arc<Shared>);

impl Drop for DisposeOnDrop {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

/// Request/response bridge between the editor UI and its backend process.
///
/// Cloning is cheap; clones share one instance. Construction spawns the
/// scheduler, inbound dispatcher and maintenance tasks on the current tokio
/// runtime; they run until [`dispose`](Self::dispose) is called or the last
/// clone is dropped.
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<Shared>,
    _owner: Arc<DisposeOnDrop>,
}

impl Bridge {
    pub fn new(config: BridgeConfig, channel: Arc<dyn Channel>, inbound: InboundReceiver) -> Self {
        let now = Instant::now();
        let state = BridgeState {
            correlation: CorrelationTable::new(),
            dedup: Deduplicator::new(),
            queue: RequestQueue::new(&config.batch),
            health: HealthMonitor::new(&config.health),
            metrics: MetricsAggregator::new(config.metrics.window_capacity),
            last_activity: now,
            disposed: false,
        };
        let (health_events, _) = broadcast::channel(HEALTH_EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            retry: RetryPolicy::from(&config.retry),
            config,
            transport: TransportAdapter::new(channel),
            state: Mutex::new(state),
            next_request_id: AtomicU64::new(1),
            next_call_id: AtomicU64::new(1),
            next_waiter_id: AtomicU64::new(1),
            scheduler_wake: Notify::new(),
            maintenance_wake: Notify::new(),
            health_events,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        shared.track(tokio::spawn(scheduler_loop(shared.clone())));
        shared.track(tokio::spawn(inbound_loop(shared.clone(), inbound)));
        shared.track(tokio::spawn(maintenance_loop(shared.clone())));
        Self { _owner: Arc::new(DisposeOnDrop(shared.clone())), shared }
    }

    /// Waits for the backend's ready signal, up to `call.init_timeout_ms`.
    pub async fn initialize(&self) -> Result<(), BridgeError> {
        let timeout = self.shared.config.init_timeout();
        self.shared.transport.initialize(timeout).await?;
        log::info!("bridge: initialized");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.shared.transport.is_ready()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    /// Issues `method` with `params`. Returns at once; await the handle for
    /// the outcome.
    ///
    /// An identical call already in flight is joined instead of sent again.
    /// While the circuit is open the handle fails with
    /// [`BridgeError::BackendUnavailable`] and nothing reaches the transport.
    pub fn call(&self, method: impl Into<String>, params: Value, options: CallOptions) -> CallHandle {
        self.shared.call(method.into(), params, options)
    }

    /// Issues a modelled method.
    pub fn call_method(&self, method: Method, options: CallOptions) -> CallHandle {
        match method.params() {
            Ok(params) => self.call(method.name(), params, options),
            Err(err) => {
                let waiter_id = self.shared.next_waiter_id.fetch_add(1, Ordering::Relaxed);
                CallHandle::failed(CallTicket { call_id: 0, waiter_id }, BridgeError::codec(err))
            }
        }
    }

    /// Like [`call`](Self::call), decoding the result into `T`.
    pub fn call_typed<T>(
        &self,
        method: impl Into<String>,
        params: Value,
        options: CallOptions,
    ) -> impl Future<Output = Result<T, BridgeError>> + Send + 'static
    where
        T: DeserializeOwned,
    {
        let handle = self.call(method, params, options);
        async move { decode(handle.await?) }
    }

    pub(crate) async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        options: CallOptions,
    ) -> Result<T, BridgeError> {
        let handle = self.call_method(method, options);
        decode(handle.await?)
    }

    /// Withdraws one caller. Only that caller's handle fails with
    /// [`BridgeError::Cancelled`]; the backend request itself is dropped
    /// once no caller is left. Returns `false` if the ticket is no longer
    /// pending.
    pub fn cancel(&self, ticket: CallTicket) -> bool {
        let shared = &self.shared;
        let (tx, method) = {
            let mut guard = shared.lock_state();
            let state = &mut *guard;
            let Some((tx, remaining)) = state.dedup.detach(ticket.call_id, ticket.waiter_id) else {
                return false;
            };
            let method = state
                .dedup
                .get(ticket.call_id)
                .map(|call| call.method.clone())
                .unwrap_or_default();

            if remaining == 0 {
                if let Some(call) = state.dedup.remove(ticket.call_id) {
                    call.token.cancel();
                    if call.probe {
                        state.health.release_probe();
                    }
                    if let Some(request_id) = call.current_request {
                        if state.queue.remove(request_id).is_some() {
                            log::debug!("bridge: cancelled {method} before send");
                        } else {
                            log::debug!("bridge: cancelled {method} in flight, late response will be dropped");
                        }
                        state.correlation.abandon(request_id);
                    }
                }
                if state.queue.release_sequential(ticket.call_id) {
                    shared.scheduler_wake.notify_one();
                }
            }
            (tx, method)
        };
        let _ = tx.send(Err(BridgeError::Cancelled { method }));
        true
    }

    /// Current breaker state, plus the recent success rate.
    pub fn health(&self) -> HealthSnapshot {
        let now = Instant::now();
        let (snapshot, transitioned) = {
            let mut guard = self.shared.lock_state();
            let transitioned = guard.health.tick(now).is_some();
            (self.shared.health_snapshot(&guard, now), transitioned)
        };
        if transitioned {
            self.shared.publish_health(snapshot.clone());
        }
        snapshot
    }

    /// Statistics for `method` (all methods when `None`) over the last
    /// `window` (all retained samples when `None`).
    pub fn metrics(&self, method: Option<&str>, window: Option<Duration>) -> MethodMetrics {
        let state = self.shared.lock_state();
        state.metrics.snapshot(method, window, Instant::now())
    }

    pub fn metrics_by_method(&self, window: Option<Duration>) -> BTreeMap<String, MethodMetrics> {
        let state = self.shared.lock_state();
        state.metrics.by_method(window, Instant::now())
    }

    pub fn reset_metrics(&self) {
        self.shared.lock_state().metrics.clear();
    }

    /// Receives every health transition.
    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthSnapshot> {
        self.shared.health_events.subscribe()
    }

    /// Runs `callback` on every health transition until the bridge is disposed.
    pub fn on_health_change<F>(&self, callback: F)
    where
        F: Fn(HealthSnapshot) + Send + 'static,
    {
        let mut events = self.subscribe_health();
        let shutdown = self.shared.shutdown.clone();
        self.shared.track(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => return,
                    event = events.recv() => event,
                };
                match event {
                    Ok(snapshot) => callback(snapshot),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("bridge: health listener lagged, skipped {skipped} event(s)");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }));
    }

    /// Stops the background tasks and rejects every outstanding caller with
    /// [`BridgeError::Disposed`]. Later calls fail the same way. Dropping the
    /// last handle does the same.
    pub fn dispose(&self) {
        self.shared.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lock_state().disposed
    }

    /// Queue and table sizes, for diagnostics.
    pub fn stats(&self) -> BridgeStats {
        let state = self.shared.lock_state();
        BridgeStats {
            in_flight_calls: state.dedup.len(),
            queued_requests: state.queue.len(),
            pending_requests: state.correlation.len(),
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, BridgeError> {
    serde_json::from_value(value).map_err(BridgeError::codec)
}

// ── Background tasks ──────────────────────────────────────────────────────────

/// Sends one logical call through its attempts and reports the outcome.
async fn drive_call(
    shared: Arc<Shared>,
    call_id: CallId,
    template: CallTemplate,
    policy: RetryPolicy,
    first: Attempt,
    token: CancellationToken,
) {
    let cancelled = || {
        if shared.shutdown.is_cancelled() {
            BridgeError::Disposed
        } else {
            BridgeError::Cancelled { method: template.method.clone() }
        }
    };

    let mut attempt_no = 1;
    let mut attempt = first;
    let mut reached_backend = true;
    let outcome = loop {
        let waited = tokio::select! {
            _ = token.cancelled() => break Err(cancelled()),
            waited = tokio::time::timeout_at(attempt.deadline, &mut attempt.rx) => waited,
        };
        let result = match waited {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(cancelled()),
            Err(_) => {
                let mut guard = shared.lock_state();
                let state = &mut *guard;
                match state.correlation.expire(attempt.request_id, Instant::now(), &mut state.metrics) {
                    Some(err) => {
                        if state.queue.remove(attempt.request_id).is_some() {
                            log::debug!(
                                "bridge: {} request {} timed out before it was sent",
                                template.method,
                                attempt.request_id
                            );
                            reached_backend = false;
                        }
                        Err(err)
                    }
                    // The response won the race with the deadline.
                    None => attempt.rx.try_recv().unwrap_or_else(|_| Err(cancelled())),
                }
            }
        };

        let err = match result {
            Ok(value) => break Ok(value),
            // An attempt still parked in the queue is not resent.
            Err(err) if reached_backend && policy.should_retry(&err, attempt_no) => err,
            Err(err) => break Err(policy.finalize(&template.method, attempt_no, err)),
        };

        let delay = policy.delay_for(attempt_no);
        log::warn!(
            "bridge: {} attempt {}/{} failed: {err}; retrying in {delay:?}",
            template.method,
            attempt_no,
            policy.max_attempts
        );
        tokio::select! {
            _ = token.cancelled() => break Err(cancelled()),
            _ = tokio::time::sleep(delay) => {}
        }

        attempt_no += 1;
        let next = {
            let mut guard = shared.lock_state();
            let state = &mut *guard;
            if state.disposed || state.dedup.get(call_id).is_none() {
                None
            } else {
                Some(shared.enqueue_attempt(state, call_id, &template, attempt_no, Instant::now()))
            }
        };
        match next {
            Some(next) => {
                attempt = next;
                shared.scheduler_wake.notify_one();
            }
            None => break Err(cancelled()),
        }
    };
    shared.finish_call(call_id, outcome, reached_backend);
}

/// Flushes due requests to the transport and sleeps until the next deadline.
async fn scheduler_loop(shared: Arc<Shared>) {
    loop {
        let (groups, wake_at) = {
            let mut guard = shared.lock_state();
            let state = &mut *guard;
            let now = Instant::now();
            let groups = state.queue.take_due(now);
            for request in groups.iter().flatten() {
                state.correlation.mark_sent(request.id, now);
            }
            let wake_at = state.queue.next_deadline(now).unwrap_or(now + IDLE_SLEEP);
            (groups, wake_at)
        };
        for group in groups {
            shared.send_group(group);
        }

        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            _ = shared.scheduler_wake.notified() => {}
            _ = tokio::time::sleep_until(wake_at) => {}
        }
    }
}

/// Routes backend messages: readiness to the adapter, responses to the
/// correlation table.
async fn inbound_loop(shared: Arc<Shared>, mut inbound: InboundReceiver) {
    loop {
        let message = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            message = inbound.recv() => message,
        };
        match message {
            Some(Inbound::Ready(signal)) if signal.ready => {
                log::info!(
                    "bridge: backend ready (version {})",
                    signal.version.as_deref().unwrap_or("unknown")
                );
                shared.transport.mark_ready();
            }
            Some(Inbound::Ready(_)) => {
                log::warn!("bridge: backend is shutting down");
                shared.transport.mark_closed();
            }
            Some(Inbound::Response(response)) => {
                let now = Instant::now();
                let mut guard = shared.lock_state();
                let state = &mut *guard;
                state.last_activity = now;
                state.correlation.resolve(response, now, &mut state.metrics);
            }
            None => {
                log::warn!("bridge: inbound stream closed");
                shared.transport.mark_closed();
                return;
            }
        }
    }
}

/// Applies due half-open transitions and sends idle pings.
async fn maintenance_loop(shared: Arc<Shared>) {
    let ping_interval = shared.config.ping_interval();
    loop {
        let now = Instant::now();
        let (snapshot, status, next_transition, last_activity) = {
            let mut guard = shared.lock_state();
            let state = &mut *guard;
            let snapshot = state.health.tick(now).map(|_| shared.health_snapshot(state, now));
            (
                snapshot,
                state.health.status(),
                state.health.next_transition_at(),
                state.last_activity,
            )
        };
        if let Some(snapshot) = snapshot {
            shared.publish_health(snapshot);
        }

        let mut wake_at = next_transition.unwrap_or(now + IDLE_SLEEP);
        if let Some(interval) = ping_interval {
            let ping_at = last_activity + interval;
            if now >= ping_at && status != HealthStatus::Open && shared.transport.is_ready() {
                log::debug!("bridge: idle for {interval:?}, pinging backend");
                drop(shared.call(PING_METHOD.to_string(), json!({}), CallOptions::default().immediate()));
                wake_at = wake_at.min(now + interval);
            } else if now >= ping_at {
                wake_at = wake_at.min(now + interval);
            } else {
                wake_at = wake_at.min(ping_at);
            }
        }

        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            _ = shared.maintenance_wake.notified() => {}
            _ = tokio::time::sleep_until(wake_at) => {}
        }
    }
}
