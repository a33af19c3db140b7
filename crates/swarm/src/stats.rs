//! Request statistics aggregation.

use crate::client::RequestOutcome;
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;

/// Name of the row that sums every endpoint.
pub const AGGREGATED_NAME: &str = "Aggregated";

/// Running counters for one endpoint (or for the aggregate).
struct EndpointStats {
    histogram: Histogram<u64>,
    requests: u64,
    failures: u64,
    bytes: u64,
}

impl EndpointStats {
    fn new() -> Self {
        Self {
            histogram: Histogram::new(3).expect("Failed to create histogram"),
            requests: 0,
            failures: 0,
            bytes: 0,
        }
    }

    fn record(&mut self, latency_us: u64, bytes: usize, failed: bool) {
        self.requests += 1;
        self.bytes += bytes as u64;
        if failed {
            self.failures += 1;
        }
        self.histogram.saturating_record(latency_us);
    }

    fn record_failure_only(&mut self) {
        self.requests += 1;
        self.failures += 1;
    }

    fn report(&self, method: &str, name: &str, elapsed_secs: f64) -> EndpointReport {
        let h = &self.histogram;
        let ms = |us: u64| us as f64 / 1000.0;
        let at = |p: f64| {
            if h.is_empty() {
                0.0
            } else {
                ms(h.value_at_percentile(p))
            }
        };
        let per_sec = |n: u64| {
            if elapsed_secs > 0.0 {
                n as f64 / elapsed_secs
            } else {
                0.0
            }
        };

        EndpointReport {
            method: method.to_string(),
            name: name.to_string(),
            requests: self.requests,
            failures: self.failures,
            bytes: self.bytes,
            avg_bytes: if self.requests > 0 {
                self.bytes as f64 / self.requests as f64
            } else {
                0.0
            },
            requests_per_second: per_sec(self.requests),
            failures_per_second: per_sec(self.failures),
            latency_avg: if h.is_empty() { 0.0 } else { h.mean() / 1000.0 },
            latency_min: if h.is_empty() { 0.0 } else { ms(h.min()) },
            latency_max: if h.is_empty() { 0.0 } else { ms(h.max()) },
            latency_p50: at(50.0),
            latency_p66: at(66.0),
            latency_p75: at(75.0),
            latency_p80: at(80.0),
            latency_p90: at(90.0),
            latency_p95: at(95.0),
            latency_p98: at(98.0),
            latency_p99: at(99.0),
            latency_p999: at(99.9),
        }
    }
}

struct StatsState {
    entries: BTreeMap<(String, String), EndpointStats>,
    total: EndpointStats,
    errors: BTreeMap<(String, String, String), u64>,
    started: Instant,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl StatsState {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            total: EndpointStats::new(),
            errors: BTreeMap::new(),
            started: Instant::now(),
            started_at: chrono::Utc::now(),
        }
    }

    fn note_error(&mut self, method: &str, name: &str, error: &str) {
        *self
            .errors
            .entry((method.to_string(), name.to_string(), error.to_string()))
            .or_insert(0) += 1;
    }
}

/// Shared collector that every virtual user reports into.
pub struct StatsAggregator {
    state: Mutex<StatsState>,
    user_count: AtomicUsize,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StatsState::new()),
            user_count: AtomicUsize::new(0),
        }
    }

    /// Record the outcome of one HTTP request.
    pub async fn record(&self, outcome: &RequestOutcome) {
        let failed = !outcome.is_success();
        let mut state = self.state.lock().await;

        state
            .entries
            .entry((outcome.method.clone(), outcome.name.clone()))
            .or_insert_with(EndpointStats::new)
            .record(outcome.latency_us, outcome.bytes, failed);
        state.total.record(outcome.latency_us, outcome.bytes, failed);

        if let Some(ref err) = outcome.error {
            state.note_error(&outcome.method, &outcome.name, err);
        }
    }

    /// Record a task that failed before producing a request outcome.
    pub async fn record_task_error(&self, task_name: &str, message: &str) {
        let mut state = self.state.lock().await;
        state
            .entries
            .entry(("TASK".to_string(), task_name.to_string()))
            .or_insert_with(EndpointStats::new)
            .record_failure_only();
        state.total.record_failure_only();
        state.note_error("TASK", task_name, message);
    }

    /// Drop everything recorded so far and restart the clock.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = StatsState::new();
    }

    pub fn set_user_count(&self, users: usize) {
        self.user_count.store(users, Ordering::Relaxed);
    }

    pub fn user_count(&self) -> usize {
        self.user_count.load(Ordering::Relaxed)
    }

    /// Produce a point-in-time report.
    pub async fn snapshot(&self) -> StatsSnapshot {
        let state = self.state.lock().await;
        let elapsed = state.started.elapsed().as_secs_f64();

        let entries = state
            .entries
            .iter()
            .map(|((method, name), stats)| stats.report(method, name, elapsed))
            .collect();

        let errors = state
            .errors
            .iter()
            .map(|((method, name, error), &occurrences)| ErrorReport {
                method: method.clone(),
                name: name.clone(),
                error: error.clone(),
                occurrences,
            })
            .collect();

        StatsSnapshot {
            started_at: state.started_at.to_rfc3339(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            duration_secs: elapsed,
            user_count: self.user_count(),
            entries,
            total: state.total.report("", AGGREGATED_NAME, elapsed),
            errors,
        }
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for one `(method, name)` key. Latencies are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointReport {
    pub method: String,
    pub name: String,
    pub requests: u64,
    pub failures: u64,
    pub bytes: u64,
    pub avg_bytes: f64,
    pub requests_per_second: f64,
    pub failures_per_second: f64,

    pub latency_avg: f64,
    pub latency_min: f64,
    pub latency_max: f64,
    pub latency_p50: f64,
    pub latency_p66: f64,
    pub latency_p75: f64,
    pub latency_p80: f64,
    pub latency_p90: f64,
    pub latency_p95: f64,
    pub latency_p98: f64,
    pub latency_p99: f64,
    pub latency_p999: f64,
}

impl EndpointReport {
    /// Percentage of requests that failed.
    pub fn failure_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub method: String,
    pub name: String,
    pub error: String,
    pub occurrences: u64,
}

/// Full statistics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub started_at: String,
    pub timestamp: String,
    pub duration_secs: f64,
    pub user_count: usize,
    pub entries: Vec<EndpointReport>,
    pub total: EndpointReport,
    pub errors: Vec<ErrorReport>,
}

impl StatsSnapshot {
    /// Look up the row for a method and stats name.
    pub fn entry(&self, method: &str, name: &str) -> Option<&EndpointReport> {
        self.entries
            .iter()
            .find(|e| e.method == method && e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(method: &str, name: &str, status: u16, latency_us: u64) -> RequestOutcome {
        RequestOutcome {
            method: method.to_string(),
            name: name.to_string(),
            url: format!("http://localhost{}", name),
            status,
            latency_us,
            bytes: 100,
            error: if status == 0 || status >= 400 {
                Some(format!("HTTP {}", status))
            } else {
                None
            },
            timestamp: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_records_per_endpoint_and_total() {
        let stats = StatsAggregator::new();
        stats.record(&outcome("POST", "/api/book/get", 200, 10_000)).await;
        stats.record(&outcome("POST", "/api/book/get", 200, 30_000)).await;
        stats.record(&outcome("GET", "/api/recommendations", 500, 5_000)).await;

        let snap = stats.snapshot().await;
        assert_eq!(snap.entries.len(), 2);
        assert_eq!(snap.total.requests, 3);
        assert_eq!(snap.total.failures, 1);
        assert_eq!(snap.total.bytes, 300);

        let books = snap.entry("POST", "/api/book/get").unwrap();
        assert_eq!(books.requests, 2);
        assert_eq!(books.failures, 0);
        assert!((books.latency_min - 10.0).abs() < 0.1);
        assert!((books.latency_max - 30.0).abs() < 0.1);
        assert!((books.latency_avg - 20.0).abs() < 0.1);

        let recs = snap.entry("GET", "/api/recommendations").unwrap();
        assert_eq!(recs.failure_rate(), 100.0);
    }

    #[tokio::test]
    async fn test_error_tally() {
        let stats = StatsAggregator::new();
        for _ in 0..3 {
            stats.record(&outcome("GET", "/x", 503, 1_000)).await;
        }
        stats.record_task_error("checkout", "no cart").await;

        let snap = stats.snapshot().await;
        assert_eq!(snap.errors.len(), 2);
        let http = snap.errors.iter().find(|e| e.name == "/x").unwrap();
        assert_eq!(http.error, "HTTP 503");
        assert_eq!(http.occurrences, 3);
        assert_eq!(snap.total.failures, 4);
        assert!(snap.entry("TASK", "checkout").is_some());
    }

    #[tokio::test]
    async fn test_percentiles_ordered() {
        let stats = StatsAggregator::new();
        for i in 1..=1000u64 {
            stats.record(&outcome("GET", "/p", 200, i * 100)).await;
        }

        let row = stats.snapshot().await.total;
        assert!(row.latency_min <= row.latency_p50);
        assert!(row.latency_p50 <= row.latency_p90);
        assert!(row.latency_p90 <= row.latency_p99);
        assert!(row.latency_p99 <= row.latency_max);
        assert!((row.latency_p50 - 50.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let stats = StatsAggregator::new();
        stats.record(&outcome("GET", "/a", 404, 1_000)).await;
        stats.reset().await;

        let snap = stats.snapshot().await;
        assert!(snap.entries.is_empty());
        assert!(snap.errors.is_empty());
        assert_eq!(snap.total.requests, 0);
        assert_eq!(snap.total.latency_max, 0.0);
    }

    #[test]
    fn test_user_count() {
        let stats = StatsAggregator::new();
        stats.set_user_count(12);
        assert_eq!(stats.user_count(), 12);
    }
}
