//! Priority queue with a batching window.
//!
//! Requests are ordered by priority (highest first), then by enqueue order.
//! A window opens when the first request lands in a queue with nothing
//! eligible to send; the scheduler flushes up to `max_size` requests when the
//! window closes or as soon as `max_size` requests are eligible. Requests
//! that have waited `max_wait` go first in the next flush.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use canvas_ipc::{Priority, RequestEnvelope, RequestId};
use serde_json::Value;
use tokio::time::Instant;

use crate::config::BatchConfig;
use crate::dedup::CallId;

/// One attempt of a logical call, as queued for the transport.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub call_id: CallId,
    pub method: String,
    pub params: Value,
    pub priority: Priority,
    pub enqueued_at: Instant,
    pub attempt: u32,
    pub timeout: Duration,
    /// Sent solo, without waiting for the batch window.
    pub immediate: bool,
    /// Dispatched only while no other sequential call is in flight.
    pub sequential: bool,
}

impl Request {
    pub fn envelope(&self) -> RequestEnvelope {
        let mut envelope = RequestEnvelope::new(self.id, self.method.clone(), self.params.clone());
        envelope.priority = Some(self.priority);
        envelope.timeout_ms = Some(u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX));
        envelope
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey(Reverse<Priority>, u64);

#[derive(Debug)]
pub struct RequestQueue {
    entries: BTreeMap<QueueKey, Request>,
    index: HashMap<RequestId, QueueKey>,
    seq: u64,
    window_started: Option<Instant>,
    sequential_holder: Option<CallId>,
    window: Duration,
    max_size: usize,
    max_wait: Duration,
}

impl RequestQueue {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            seq: 0,
            window_started: None,
            sequential_holder: None,
            window: config.window(),
            max_size: config.max_size.max(1),
            max_wait: config.max_wait().max(config.window()),
        }
    }

    pub fn enqueue(&mut self, request: Request, now: Instant) {
        if self.eligible_count() == 0 {
            self.window_started = Some(now);
        }
        self.seq += 1;
        let key = QueueKey(Reverse(request.priority), self.seq);
        self.index.insert(request.id, key);
        self.entries.insert(key, request);
    }

    /// Takes a request out before it was sent, e.g. on cancel.
    pub fn remove(&mut self, id: RequestId) -> Option<Request> {
        let key = self.index.remove(&id)?;
        let request = self.entries.remove(&key);
        if self.entries.is_empty() {
            self.window_started = None;
        }
        request
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Releases the sequential gate held by `call_id`.
    pub fn release_sequential(&mut self, call_id: CallId) -> bool {
        if self.sequential_holder == Some(call_id) {
            self.sequential_holder = None;
            true
        } else {
            false
        }
    }

    /// Everything ready to go at `now`: immediate requests as single-element
    /// groups, then full batches, then one window-expiry batch.
    pub fn take_due(&mut self, now: Instant) -> Vec<Vec<Request>> {
        let mut groups = Vec::new();

        while let Some(key) = self.first_eligible(|request| request.immediate) {
            groups.extend(self.take(key).map(|request| vec![request]));
        }

        let mut flushed = false;
        while self.eligible_count() >= self.max_size {
            groups.push(self.take_batch(now));
            flushed = true;
        }

        let window_closed = self.flush_deadline().is_some_and(|deadline| now >= deadline);
        if window_closed && self.eligible_count() > 0 {
            groups.push(self.take_batch(now));
            flushed = true;
        }

        if self.entries.is_empty() {
            self.window_started = None;
        } else if flushed {
            self.window_started = Some(now);
        }
        groups.retain(|group| !group.is_empty());
        groups
    }

    /// When [`take_due`](Self::take_due) next has something to return.
    /// `None` while nothing queued is eligible.
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        if self.first_eligible(|request| request.immediate).is_some()
            || self.eligible_count() >= self.max_size
        {
            return Some(now);
        }
        self.flush_deadline()
    }

    pub fn drain(&mut self) -> Vec<Request> {
        self.index.clear();
        self.window_started = None;
        std::mem::take(&mut self.entries).into_values().collect()
    }

    fn flush_deadline(&self) -> Option<Instant> {
        let head = self.sequential_head();
        let oldest = self
            .entries
            .values()
            .filter(|request| is_eligible(request, head))
            .map(|request| request.enqueued_at)
            .min()?;
        let window_end = self.window_started.unwrap_or(oldest) + self.window;
        Some(window_end.min(oldest + self.max_wait))
    }

    fn take_batch(&mut self, now: Instant) -> Vec<Request> {
        let mut batch = Vec::with_capacity(self.max_size);

        let mut starved: Vec<QueueKey> = self
            .entries
            .iter()
            .filter(|(_, request)| now.saturating_duration_since(request.enqueued_at) >= self.max_wait)
            .map(|(key, _)| *key)
            .collect();
        starved.sort_by_key(|key| key.1);
        for key in starved {
            if batch.len() == self.max_size {
                break;
            }
            let head = self.sequential_head();
            if self.entries.get(&key).is_some_and(|request| is_eligible(request, head)) {
                batch.extend(self.take(key));
            }
        }

        while batch.len() < self.max_size {
            match self.first_eligible(|_| true) {
                Some(key) => batch.extend(self.take(key)),
                None => break,
            }
        }
        batch
    }

    fn take(&mut self, key: QueueKey) -> Option<Request> {
        let request = self.entries.remove(&key)?;
        self.index.remove(&request.id);
        if request.sequential {
            self.sequential_holder = Some(request.call_id);
        }
        Some(request)
    }

    fn first_eligible(&self, filter: impl Fn(&Request) -> bool) -> Option<QueueKey> {
        let head = self.sequential_head();
        self.entries
            .iter()
            .find(|(_, request)| filter(request) && is_eligible(request, head))
            .map(|(key, _)| *key)
    }

    fn eligible_count(&self) -> usize {
        let head = self.sequential_head();
        self.entries.values().filter(|request| is_eligible(request, head)).count()
    }

    /// The call allowed through the sequential gate: the holder, or else the
    /// call of the earliest-enqueued sequential request whatever its priority.
    fn sequential_head(&self) -> Option<CallId> {
        self.sequential_holder.or_else(|| {
            self.entries
                .iter()
                .filter(|(_, request)| request.sequential)
                .min_by_key(|(key, _)| key.1)
                .map(|(_, request)| request.call_id)
        })
    }
}

fn is_eligible(request: &Request, head: Option<CallId>) -> bool {
    !request.sequential || head == Some(request.call_id)
}
