//! Metrics collection and reporting

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of a model fetch, used as a metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Installed,
    Failed,
    UpToDate,
}

impl FetchOutcome {
    fn as_label(self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Failed => "failed",
            Self::UpToDate => "up_to_date",
        }
    }
}

/// Metrics collector for classification and model lifecycle
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    classify_requests: AtomicU64,
    classify_rejected: AtomicU64,
    classifiers_run: AtomicU64,
    classifiers_skipped: AtomicU64,
    inference_failures: AtomicU64,
    inference_latency_us: AtomicU64,
    fetches_installed: AtomicU64,
    fetches_failed: AtomicU64,
    fetches_up_to_date: AtomicU64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                classify_requests: AtomicU64::new(0),
                classify_rejected: AtomicU64::new(0),
                classifiers_run: AtomicU64::new(0),
                classifiers_skipped: AtomicU64::new(0),
                inference_failures: AtomicU64::new(0),
                inference_latency_us: AtomicU64::new(0),
                fetches_installed: AtomicU64::new(0),
                fetches_failed: AtomicU64::new(0),
                fetches_up_to_date: AtomicU64::new(0),
            }),
        }
    }

    /// Record a classification request
    pub fn record_request(&self) {
        self.inner.classify_requests.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("sightline_classify_requests_total").increment(1);
    }

    /// Record a request rejected before any model work (bad input)
    pub fn record_rejected(&self) {
        self.inner.classify_rejected.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("sightline_classify_rejected_total").increment(1);
    }

    /// Record a classifier that was skipped, with the reason as a label
    pub fn record_skipped(&self, reason: &'static str) {
        self.inner.classifiers_skipped.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("sightline_classifiers_skipped_total", "reason" => reason)
            .increment(1);
    }

    /// Record a completed inference
    pub fn record_inference(&self, latency_us: u64) {
        self.inner.classifiers_run.fetch_add(1, Ordering::Relaxed);
        self.inner
            .inference_latency_us
            .fetch_add(latency_us, Ordering::Relaxed);
        ::metrics::histogram!("sightline_inference_latency_us").record(latency_us as f64);
    }

    /// Record a failed or abandoned inference
    pub fn record_inference_failure(&self) {
        self.inner.inference_failures.fetch_add(1, Ordering::Relaxed);
        self.record_skipped("inference_failed");
    }

    /// Record the outcome of a fetch or update
    pub fn record_fetch(&self, outcome: FetchOutcome) {
        let counter = match outcome {
            FetchOutcome::Installed => &self.inner.fetches_installed,
            FetchOutcome::Failed => &self.inner.fetches_failed,
            FetchOutcome::UpToDate => &self.inner.fetches_up_to_date,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("sightline_fetch_total", "outcome" => outcome.as_label()).increment(1);
        tracing::trace!(outcome = outcome.as_label(), "fetch recorded");
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            classify_requests: self.inner.classify_requests.load(Ordering::Relaxed),
            classify_rejected: self.inner.classify_rejected.load(Ordering::Relaxed),
            classifiers_run: self.inner.classifiers_run.load(Ordering::Relaxed),
            classifiers_skipped: self.inner.classifiers_skipped.load(Ordering::Relaxed),
            inference_failures: self.inner.inference_failures.load(Ordering::Relaxed),
            inference_latency_us: self.inner.inference_latency_us.load(Ordering::Relaxed),
            fetches_installed: self.inner.fetches_installed.load(Ordering::Relaxed),
            fetches_failed: self.inner.fetches_failed.load(Ordering::Relaxed),
            fetches_up_to_date: self.inner.fetches_up_to_date.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub classify_requests: u64,
    pub classify_rejected: u64,
    pub classifiers_run: u64,
    pub classifiers_skipped: u64,
    pub inference_failures: u64,
    pub inference_latency_us: u64,
    pub fetches_installed: u64,
    pub fetches_failed: u64,
    pub fetches_up_to_date: u64,
}

impl MetricsSnapshot {
    /// Average latency per completed inference
    pub fn avg_inference_latency_us(&self) -> u64 {
        if self.classifiers_run == 0 {
            0
        } else {
            self.inference_latency_us / self.classifiers_run
        }
    }

    /// Share of requested classifiers that were skipped
    pub fn skip_rate(&self) -> f64 {
        let attempted = self.classifiers_run + self.classifiers_skipped;
        if attempted == 0 {
            0.0
        } else {
            self.classifiers_skipped as f64 / attempted as f64
        }
    }
}
