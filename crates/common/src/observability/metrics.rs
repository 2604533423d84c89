//! Pipeline metrics.
//!
//! Counters are plain atomics so they can be bumped from any task without
//! coordination; processing durations go into a bounded ring buffer (VecDeque
//! with O(1) eviction) for percentile reads. Lock poisoning is recovered, not
//! propagated.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Ring buffer capacity for processing-time percentiles.
const PROCESSING_RING_CAPACITY: usize = 1_000;

/// Thread-safe metrics for the classification pipeline.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Documents accepted by the upload endpoint.
    uploaded_total: AtomicU64,
    /// Worker attempts that wrote a verdict back.
    classified_total: AtomicU64,
    /// Worker attempts that ended in an error (any kind).
    classification_errors_total: AtomicU64,
    /// Attempts rejected fast because the classifier circuit was open.
    circuit_open_total: AtomicU64,
    /// Messages re-injected by the DLQ reprocessor.
    reprocessed_total: AtomicU64,
    /// Messages parked after exhausting the retry budget.
    parked_total: AtomicU64,
    /// Worker processing durations in milliseconds (bounded ring).
    processing_times_ms: Mutex<VecDeque<u64>>,
}

/// Point-in-time copy of all metrics, safe to hand across threads.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub uploaded_total: u64,
    pub classified_total: u64,
    pub classification_errors_total: u64,
    pub circuit_open_total: u64,
    pub reprocessed_total: u64,
    pub parked_total: u64,
    pub processing_p50_ms: Option<u64>,
    pub processing_p95_ms: Option<u64>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_uploaded(&self) {
        self.uploaded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_classified(&self) {
        self.classified_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_classification_error(&self) {
        self.classification_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_open(&self) {
        self.circuit_open_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reprocessed(&self) {
        self.reprocessed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parked(&self) {
        self.parked_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long one worker attempt took, end to end.
    pub fn record_processing_time(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let mut times = self.lock_times();
        if times.len() == PROCESSING_RING_CAPACITY {
            times.pop_front();
        }
        times.push_back(millis);
    }

    /// Copy out all current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let times = self.lock_times();
        let mut sorted: Vec<u64> = times.iter().copied().collect();
        drop(times);
        sorted.sort_unstable();

        MetricsSnapshot {
            uploaded_total: self.uploaded_total.load(Ordering::Relaxed),
            classified_total: self.classified_total.load(Ordering::Relaxed),
            classification_errors_total: self
                .classification_errors_total
                .load(Ordering::Relaxed),
            circuit_open_total: self.circuit_open_total.load(Ordering::Relaxed),
            reprocessed_total: self.reprocessed_total.load(Ordering::Relaxed),
            parked_total: self.parked_total.load(Ordering::Relaxed),
            processing_p50_ms: percentile(&sorted, 50),
            processing_p95_ms: percentile(&sorted, 95),
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::with_capacity(1024);

        counter(&mut out, "docflow_documents_uploaded_total", snapshot.uploaded_total);
        counter(&mut out, "docflow_documents_classified_total", snapshot.classified_total);
        counter(
            &mut out,
            "docflow_classification_errors_total",
            snapshot.classification_errors_total,
        );
        counter(&mut out, "docflow_circuit_open_rejections_total", snapshot.circuit_open_total);
        counter(&mut out, "docflow_dlq_reprocessed_total", snapshot.reprocessed_total);
        counter(&mut out, "docflow_dlq_parked_total", snapshot.parked_total);

        if let Some(p50) = snapshot.processing_p50_ms {
            gauge(&mut out, "docflow_processing_time_p50_ms", p50);
        }
        if let Some(p95) = snapshot.processing_p95_ms {
            gauge(&mut out, "docflow_processing_time_p95_ms", p95);
        }

        out
    }

    fn lock_times(&self) -> std::sync::MutexGuard<'_, VecDeque<u64>> {
        self.processing_times_ms.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn percentile(sorted: &[u64], pct: usize) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (sorted.len().saturating_sub(1)) * pct / 100;
    sorted.get(rank).copied()
}

fn counter(out: &mut String, name: &str, value: u64) {
    out.push_str(&format!("# TYPE {name} counter\n{name} {value}\n"));
}

fn gauge(out: &mut String, name: &str, value: u64) {
    out.push_str(&format!("# TYPE {name} gauge\n{name} {value}\n"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = PipelineMetrics::new();
        metrics.record_uploaded();
        metrics.record_classified();
        metrics.record_classified();
        metrics.record_classification_error();
        metrics.record_circuit_open();
        metrics.record_reprocessed();
        metrics.record_parked();

        let snap = metrics.snapshot();
        assert_eq!(snap.uploaded_total, 1);
        assert_eq!(snap.classified_total, 2);
        assert_eq!(snap.classification_errors_total, 1);
        assert_eq!(snap.circuit_open_total, 1);
        assert_eq!(snap.reprocessed_total, 1);
        assert_eq!(snap.parked_total, 1);
    }

    #[test]
    fn empty_processing_times_yield_no_percentiles() {
        let metrics = PipelineMetrics::new();
        let snap = metrics.snapshot();
        assert_eq!(snap.processing_p50_ms, None);
        assert_eq!(snap.processing_p95_ms, None);
    }

    #[test]
    fn percentiles_come_from_recorded_times() {
        let metrics = PipelineMetrics::new();
        for ms in [10u64, 20, 30, 40, 50, 60, 70, 80, 90, 100] {
            metrics.record_processing_time(Duration::from_millis(ms));
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.processing_p50_ms, Some(50));
        assert_eq!(snap.processing_p95_ms, Some(90));
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let metrics = PipelineMetrics::new();
        for _ in 0..PROCESSING_RING_CAPACITY {
            metrics.record_processing_time(Duration::from_millis(1));
        }
        metrics.record_processing_time(Duration::from_millis(1_000));

        let times = metrics.lock_times();
        assert_eq!(times.len(), PROCESSING_RING_CAPACITY);
        assert_eq!(times.back().copied(), Some(1_000));
    }

    #[test]
    fn prometheus_render_contains_counters() {
        let metrics = PipelineMetrics::new();
        metrics.record_parked();
        let text = metrics.render_prometheus();
        assert!(text.contains("docflow_dlq_parked_total 1"));
        assert!(text.contains("# TYPE docflow_documents_uploaded_total counter"));
    }
}
