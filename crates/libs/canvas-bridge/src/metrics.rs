//! Rolling per-method latency and success statistics.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug)]
struct Sample {
    at: Instant,
    latency: Duration,
    success: bool,
}

/// Summary over a set of samples. Times are in milliseconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MethodMetrics {
    pub count: usize,
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    /// Fraction of successful samples; `1.0` when there are none.
    pub success_rate: f64,
}

impl MethodMetrics {
    fn from_samples<'a>(samples: impl Iterator<Item = &'a Sample>) -> Self {
        let mut latencies = Vec::new();
        let mut successes = 0usize;
        for sample in samples {
            latencies.push(sample.latency.as_micros() as f64 / 1_000.0);
            if sample.success {
                successes += 1;
            }
        }
        if latencies.is_empty() {
            return Self { success_rate: 1.0, ..Self::default() };
        }
        latencies.sort_by(f64::total_cmp);

        let count = latencies.len();
        let total_ms: f64 = latencies.iter().sum();
        Self {
            count,
            total_ms,
            min_ms: latencies[0],
            max_ms: latencies[count - 1],
            avg_ms: total_ms / count as f64,
            p50_ms: percentile(&latencies, 0.50),
            p95_ms: percentile(&latencies, 0.95),
            p99_ms: percentile(&latencies, 0.99),
            success_rate: successes as f64 / count as f64,
        }
    }
}

/// Nearest-rank percentile over sorted values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

/// Bounded ring of samples per method. Recording is O(1); the oldest sample
/// is evicted once a method reaches capacity.
#[derive(Debug)]
pub struct MetricsAggregator {
    capacity: usize,
    methods: HashMap<String, VecDeque<Sample>>,
}

impl MetricsAggregator {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), methods: HashMap::new() }
    }

    pub fn record(&mut self, method: &str, latency: Duration, success: bool, now: Instant) {
        if !self.methods.contains_key(method) {
            self.methods.insert(method.to_string(), VecDeque::with_capacity(self.capacity.min(64)));
        }
        let Some(ring) = self.methods.get_mut(method) else {
            return;
        };
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(Sample { at: now, latency, success });
    }

    /// Statistics for one method, or across all methods when `method` is
    /// `None`, restricted to samples recorded within `window` of `now`.
    pub fn snapshot(
        &self,
        method: Option<&str>,
        window: Option<Duration>,
        now: Instant,
    ) -> MethodMetrics {
        let cutoff = window.and_then(|window| now.checked_sub(window));
        let in_window = move |sample: &&Sample| cutoff.map_or(true, |cutoff| sample.at >= cutoff);
        match method {
            Some(method) => match self.methods.get(method) {
                Some(ring) => MethodMetrics::from_samples(ring.iter().filter(in_window)),
                None => MethodMetrics::from_samples(std::iter::empty()),
            },
            None => MethodMetrics::from_samples(self.methods.values().flatten().filter(in_window)),
        }
    }

    pub fn by_method(&self, window: Option<Duration>, now: Instant) -> BTreeMap<String, MethodMetrics> {
        self.methods
            .keys()
            .map(|method| (method.clone(), self.snapshot(Some(method), window, now)))
            .filter(|(_, metrics)| metrics.count > 0)
            .collect()
    }

    pub fn clear(&mut self) {
        self.methods.clear();
    }
}
