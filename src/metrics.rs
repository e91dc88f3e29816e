//! Process-local metrics registry
//!
//! Counters and histograms backed by atomics, rendered in the Prometheus
//! text exposition format. The registry is constructed once at startup and
//! handed to each subsystem as an explicit collaborator.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

const DURATION_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0];
const CONFIDENCE_BUCKETS: &[f64] = &[50.0, 60.0, 70.0, 75.0, 80.0, 85.0, 90.0, 95.0, 100.0];

/// Fixed-bucket histogram with atomic counts
struct Histogram {
    bounds: &'static [f64],
    buckets: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn new(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            buckets: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, value: f64) {
        for (i, bound) in self.bounds.iter().enumerate() {
            if value <= *bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum_micros
            .fetch_add((value * 1_000_000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn render(&self, out: &mut String, name: &str, help: &str) {
        out.push_str(&format!("# HELP {} {}\n# TYPE {} histogram\n", name, help, name));
        for (i, bound) in self.bounds.iter().enumerate() {
            out.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                name,
                bound,
                self.buckets[i].load(Ordering::Relaxed)
            ));
        }
        let count = self.count.load(Ordering::Relaxed);
        out.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, count));
        out.push_str(&format!(
            "{}_sum {}\n",
            name,
            self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
        ));
        out.push_str(&format!("{}_count {}\n", name, count));
    }
}

/// Counter keyed by a small label set
struct LabeledCounter {
    values: Mutex<BTreeMap<String, u64>>,
}

impl LabeledCounter {
    fn new() -> Self {
        Self {
            values: Mutex::new(BTreeMap::new()),
        }
    }

    fn inc(&self, labels: String) {
        *self.values.lock().entry(labels).or_insert(0) += 1;
    }

    fn render(&self, out: &mut String, name: &str, help: &str) {
        out.push_str(&format!("# HELP {} {}\n# TYPE {} counter\n", name, help, name));
        for (labels, value) in self.values.lock().iter() {
            out.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
        }
    }
}

/// Metrics registry shared across the service
pub struct Metrics {
    triage_requests: LabeledCounter,
    triage_duration: Histogram,
    guardrails: LabeledCounter,
    llm_errors: LabeledCounter,
    triage_confidence: Histogram,
    triage_severity: LabeledCounter,
    false_positives: AtomicU64,
    circuit_transitions: LabeledCounter,
    iocs_ingested: AtomicU64,
    batches_flushed: AtomicU64,
    batch_failures: AtomicU64,
    provider_failures: AtomicU64,
    http_requests: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            triage_requests: LabeledCounter::new(),
            triage_duration: Histogram::new(DURATION_BUCKETS),
            guardrails: LabeledCounter::new(),
            llm_errors: LabeledCounter::new(),
            triage_confidence: Histogram::new(CONFIDENCE_BUCKETS),
            triage_severity: LabeledCounter::new(),
            false_positives: AtomicU64::new(0),
            circuit_transitions: LabeledCounter::new(),
            iocs_ingested: AtomicU64::new(0),
            batches_flushed: AtomicU64::new(0),
            batch_failures: AtomicU64::new(0),
            provider_failures: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
        }
    }

    /// status: success, error, skipped; reason: llm, pre_filter, parse, ...
    pub fn record_triage_request(&self, status: &str, reason: &str) {
        self.triage_requests
            .inc(format!("status=\"{}\",reason=\"{}\"", status, reason));
    }

    pub fn observe_triage_duration(&self, duration: Duration) {
        self.triage_duration.observe(duration.as_secs_f64());
    }

    /// stage: pre, post; action: skip, override, boost, downgrade
    pub fn record_guardrail(&self, stage: &str, action: &str) {
        self.guardrails
            .inc(format!("stage=\"{}\",action=\"{}\"", stage, action));
    }

    /// kind: timeout, auth, rate_limit, server_error, connection, parse,
    /// circuit_open, http_error
    pub fn record_error(&self, kind: &str) {
        self.llm_errors.inc(format!("error_type=\"{}\"", kind));
    }

    pub fn observe_confidence(&self, confidence: i64) {
        self.triage_confidence.observe(confidence as f64);
    }

    pub fn record_severity(&self, severity: &str) {
        self.triage_severity.inc(format!("severity=\"{}\"", severity));
    }

    pub fn record_false_positive(&self) {
        self.false_positives.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_transition(&self, from: &str, to: &str) {
        self.circuit_transitions
            .inc(format!("from=\"{}\",to=\"{}\"", from, to));
    }

    pub fn add_iocs_ingested(&self, count: u64) {
        self.iocs_ingested.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_batches_flushed(&self) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_batch_failures(&self) {
        self.batch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_provider_failures(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_http_requests(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Render the full registry in Prometheus text exposition format
    pub fn render(&self) -> String {
        let mut out = String::new();

        self.triage_requests.render(
            &mut out,
            "llm_triage_requests_total",
            "Total triage requests by status and reason",
        );
        self.triage_duration.render(
            &mut out,
            "llm_triage_duration_seconds",
            "Duration of triage operations in seconds",
        );
        self.guardrails.render(
            &mut out,
            "llm_triage_guardrails_total",
            "Guardrail activations by stage and action",
        );
        self.llm_errors.render(
            &mut out,
            "llm_api_errors_total",
            "LLM API errors by error type",
        );
        self.triage_confidence.render(
            &mut out,
            "llm_triage_confidence",
            "Distribution of triage confidence scores",
        );
        self.triage_severity.render(
            &mut out,
            "llm_triage_severity_total",
            "Triage results by severity",
        );
        self.circuit_transitions.render(
            &mut out,
            "llm_circuit_transitions_total",
            "Circuit breaker state transitions",
        );

        render_counter(
            &mut out,
            "llm_triage_false_positives_total",
            "Alerts classified as false positives",
            self.false_positives.load(Ordering::Relaxed),
        );
        render_counter(
            &mut out,
            "ingest_iocs_total",
            "IOCs accepted from providers",
            self.iocs_ingested.load(Ordering::Relaxed),
        );
        render_counter(
            &mut out,
            "ingest_batches_flushed_total",
            "Catalog batches flushed",
            self.batches_flushed.load(Ordering::Relaxed),
        );
        render_counter(
            &mut out,
            "ingest_batch_failures_total",
            "Catalog batches dropped after a save failure",
            self.batch_failures.load(Ordering::Relaxed),
        );
        render_counter(
            &mut out,
            "ingest_provider_failures_total",
            "Provider fetches that failed",
            self.provider_failures.load(Ordering::Relaxed),
        );
        render_counter(
            &mut out,
            "http_requests_total",
            "HTTP requests received",
            self.http_requests.load(Ordering::Relaxed),
        );

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn render_counter(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!(
        "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
        name, help, name, name, value
    ));
}
