//! Metrics registry (C9, §4.9). Global atomic counters plus a response-time
//! accumulator, exported as Prometheus text on `/metrics` alongside a JSON
//! snapshot used by the owner-facing endpoints. The request-scoped
//! [`RequestTimer`] is a RAII guard: it marks entry on construction and
//! records the duration + outcome on drop, so a
//! handler that returns early (via `?`) still gets counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use serde::{Deserialize, Serialize};

/// Bucket upper bounds in milliseconds for the response-time histogram.
/// Logarithmic spacing, matching the "logarithmic buckets for percentiles"
/// requirement in §4.9.
const BUCKET_BOUNDS_MS: [u64; 12] = [1, 2, 5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

#[derive(Debug, Default)]
struct Histogram {
    buckets: [AtomicU64; BUCKET_BOUNDS_MS.len() + 1],
    sum_ms: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn observe(&self, elapsed_ms: u64) {
        let idx = BUCKET_BOUNDS_MS
            .iter()
            .position(|&bound| elapsed_ms <= bound)
            .unwrap_or(BUCKET_BOUNDS_MS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            bucket_bounds_ms: BUCKET_BOUNDS_MS.to_vec(),
            bucket_counts: self
                .buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
            sum_ms: self.sum_ms.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub bucket_bounds_ms: Vec<u64>,
    pub bucket_counts: Vec<u64>,
    pub sum_ms: u64,
    pub count: u64,
}

impl Default for HistogramSnapshot {
    fn default() -> Self {
        Self {
            bucket_bounds_ms: BUCKET_BOUNDS_MS.to_vec(),
            bucket_counts: vec![0; BUCKET_BOUNDS_MS.len() + 1],
            sum_ms: 0,
            count: 0,
        }
    }
}

impl HistogramSnapshot {
    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ms as f64 / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub active_connections: u64,
    pub error_400: u64,
    pub error_403: u64,
    pub error_404: u64,
    pub error_500: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Process-wide metrics singleton (§5 "Global state"). All fields are
/// relaxed atomics; readers tolerate slight skew across fields per §4.9.
pub struct Metrics {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    active_connections: AtomicU64,
    error_400: AtomicU64,
    error_403: AtomicU64,
    error_404: AtomicU64,
    error_500: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    response_time: Histogram,
    registry: Registry,
    g_active_connections: IntGauge,
    c_total_requests: IntCounter,
    c_bytes_in: IntCounter,
    c_bytes_out: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let g_active_connections =
            IntGauge::new("wavy_active_connections", "in-flight HTTP requests").unwrap();
        let c_total_requests =
            IntCounter::new("wavy_total_requests", "total HTTP requests received").unwrap();
        let c_bytes_in = IntCounter::new("wavy_bytes_in_total", "bytes received").unwrap();
        let c_bytes_out = IntCounter::new("wavy_bytes_out_total", "bytes sent").unwrap();

        registry
            .register(Box::new(g_active_connections.clone()))
            .expect("metric registration cannot fail for unique names");
        registry
            .register(Box::new(c_total_requests.clone()))
            .expect("metric registration cannot fail for unique names");
        registry
            .register(Box::new(c_bytes_in.clone()))
            .expect("metric registration cannot fail for unique names");
        registry
            .register(Box::new(c_bytes_out.clone()))
            .expect("metric registration cannot fail for unique names");

        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            error_400: AtomicU64::new(0),
            error_403: AtomicU64::new(0),
            error_404: AtomicU64::new(0),
            error_500: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            response_time: Histogram::default(),
            registry,
            g_active_connections,
            c_total_requests,
            c_bytes_in,
            c_bytes_out,
        }
    }

    pub fn record_bytes_in(&self, n: u64) {
        self.bytes_in.fetch_add(n, Ordering::Relaxed);
        self.c_bytes_in.inc_by(n);
    }

    pub fn record_bytes_out(&self, n: u64) {
        self.bytes_out.fetch_add(n, Ordering::Relaxed);
        self.c_bytes_out.inc_by(n);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            error_400: self.error_400.load(Ordering::Relaxed),
            error_403: self.error_403.load(Ordering::Relaxed),
            error_404: self.error_404.load(Ordering::Relaxed),
            error_500: self.error_500.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }

    pub fn response_time_snapshot(&self) -> HistogramSnapshot {
        self.response_time.snapshot()
    }

    /// Renders the current counters in Prometheus text exposition format.
    pub fn encode_prometheus(&self) -> Result<Vec<u8>, prometheus::Error> {
        let families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&families, &mut buf)?;
        Ok(buf)
    }
}

/// Per-request RAII guard. Construct at the top of the middleware span;
/// call exactly one `mark_*` method before it drops, or it is counted as a
/// failure by default (a handler that panics or returns without marking is
/// still a failure, not silently dropped).
pub struct RequestTimer<'a> {
    metrics: &'a Metrics,
    start: Instant,
    outcome: RequestOutcome,
}

#[derive(Clone, Copy)]
enum RequestOutcome {
    Unmarked,
    Success,
    Failure,
    Error400,
    Error403,
    Error404,
    Error500,
}

impl<'a> RequestTimer<'a> {
    pub fn start(metrics: &'a Metrics) -> Self {
        metrics.total_requests.fetch_add(1, Ordering::Relaxed);
        metrics.active_connections.fetch_add(1, Ordering::Relaxed);
        metrics.c_total_requests.inc();
        metrics.g_active_connections.inc();
        Self {
            metrics,
            start: Instant::now(),
            outcome: RequestOutcome::Unmarked,
        }
    }

    pub fn mark_success(&mut self) {
        self.outcome = RequestOutcome::Success;
    }

    pub fn mark_failure(&mut self) {
        self.outcome = RequestOutcome::Failure;
    }

    pub fn mark_status(&mut self, status: u16) {
        self.outcome = match status {
            200..=399 => RequestOutcome::Success,
            400 => RequestOutcome::Error400,
            403 => RequestOutcome::Error403,
            404 => RequestOutcome::Error404,
            500..=599 => RequestOutcome::Error500,
            _ => RequestOutcome::Failure,
        };
    }
}

impl Drop for RequestTimer<'_> {
    fn drop(&mut self) {
        let elapsed_ms = self.start.elapsed().as_millis() as u64;
        self.metrics.response_time.observe(elapsed_ms);
        self.metrics
            .active_connections
            .fetch_sub(1, Ordering::Relaxed);
        self.metrics.g_active_connections.dec();

        match self.outcome {
            RequestOutcome::Success => {
                self.metrics.successful_requests.fetch_add(1, Ordering::Relaxed);
            }
            RequestOutcome::Unmarked | RequestOutcome::Failure => {
                self.metrics.failed_requests.fetch_add(1, Ordering::Relaxed);
            }
            RequestOutcome::Error400 => {
                self.metrics.failed_requests.fetch_add(1, Ordering::Relaxed);
                self.metrics.error_400.fetch_add(1, Ordering::Relaxed);
            }
            RequestOutcome::Error403 => {
                self.metrics.failed_requests.fetch_add(1, Ordering::Relaxed);
                self.metrics.error_403.fetch_add(1, Ordering::Relaxed);
            }
            RequestOutcome::Error404 => {
                self.metrics.failed_requests.fetch_add(1, Ordering::Relaxed);
                self.metrics.error_404.fetch_add(1, Ordering::Relaxed);
            }
            RequestOutcome::Error500 => {
                self.metrics.failed_requests.fetch_add(1, Ordering::Relaxed);
                self.metrics.error_500.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_marks_success_by_default_path() {
        let metrics = Metrics::new();
        {
            let mut timer = RequestTimer::start(&metrics);
            timer.mark_success();
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.successful_requests, 1);
        assert_eq!(snap.active_connections, 0);
    }

    #[test]
    fn unmarked_timer_counts_as_failure() {
        let metrics = Metrics::new();
        {
            let _timer = RequestTimer::start(&metrics);
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.failed_requests, 1);
    }

    #[test]
    fn histogram_buckets_observations() {
        let metrics = Metrics::new();
        metrics.response_time.observe(1);
        metrics.response_time.observe(9999);
        let snap = metrics.response_time_snapshot();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.bucket_counts[0], 1);
        assert_eq!(*snap.bucket_counts.last().unwrap(), 1);
    }

    #[test]
    fn prometheus_encoding_includes_counters() {
        let metrics = Metrics::new();
        metrics.record_bytes_in(42);
        let text = String::from_utf8(metrics.encode_prometheus().unwrap()).unwrap();
        assert!(text.contains("wavy_bytes_in_total"));
    }
}
