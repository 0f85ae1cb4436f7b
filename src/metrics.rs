//! Execution metrics: counters, duration histogram, active gauges, and
//! breaker-transition counters, per tool (spec §4.6).
//!
//! Registration is one-shot per process — tool entries are created lazily
//! on first use and reused thereafter, mirroring the teacher's
//! `MetricsExporter`/`CompositeExporter` one-shot-registration discipline,
//! scaled down to the per-tool granularity this pipeline needs. Recording
//! must never fail the request: every method here is infallible.

use crate::error::ErrorType;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::SystemTime;

#[derive(Debug, Default)]
struct ToolMetrics {
    success: AtomicU64,
    failure: AtomicU64,
    rejected: AtomicU64,
    active: AtomicI64,
    duration_sum_millis: AtomicU64,
    duration_count: AtomicU64,
    duration_min_millis: AtomicU64,
    duration_max_millis: AtomicU64,
    last_timestamp_unix_millis: AtomicU64,
    /// Per-error_type counts, keyed by the stable tag from [`ErrorType`].
    /// Populated for every outcome that carries an error (spec §4.6).
    error_types: DashMap<String, AtomicU64>,
}

#[derive(Debug, Default)]
struct BreakerTransitions {
    // keyed as "{from}->{to}" -> count
    counts: DashMap<String, AtomicU64>,
}

/// Per-tool, per-outcome running aggregate for the `/stats`-style readout
/// (spec §4.6 "per-tool running aggregates").
#[derive(Debug, Clone, Serialize)]
pub struct ToolStats {
    pub tool: String,
    pub success: u64,
    pub failure: u64,
    pub rejected: u64,
    pub active: i64,
    pub duration_count: u64,
    pub duration_sum_seconds: f64,
    pub duration_min_seconds: f64,
    pub duration_max_seconds: f64,
    pub last_timestamp_unix_millis: u64,
    /// Count of completed executions by `error_type` tag (spec §4.6); absent
    /// from the map for tags that have never occurred for this tool.
    pub error_type_counts: HashMap<String, u64>,
}

#[derive(Default)]
pub struct MetricsSink {
    tools: DashMap<String, ToolMetrics>,
    transitions: DashMap<String, BreakerTransitions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Rejected,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, tool: &str) -> dashmap::mapref::one::RefMut<'_, String, ToolMetrics> {
        self.tools
            .entry(tool.to_string())
            .or_insert_with(ToolMetrics::default)
    }

    pub fn incr_active(&self, tool: &str) {
        self.entry(tool).active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr_active(&self, tool: &str) {
        self.entry(tool).active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Records a completed execution's outcome, optional error_type, and
    /// duration. `error_type` is `None` on a clean success and `Some(_)` on
    /// every failure/rejection path (spec §4.6, §4.9 step 11).
    pub fn record(&self, tool: &str, outcome: Outcome, error_type: Option<ErrorType>, duration_seconds: f64) {
        let m = self.entry(tool);
        match outcome {
            Outcome::Success => m.success.fetch_add(1, Ordering::Relaxed),
            Outcome::Failure => m.failure.fetch_add(1, Ordering::Relaxed),
            Outcome::Rejected => m.rejected.fetch_add(1, Ordering::Relaxed),
        };

        if let Some(error_type) = error_type {
            m.error_types
                .entry(error_type.to_string())
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }

        let millis = (duration_seconds * 1000.0).round().max(0.0) as u64;
        m.duration_sum_millis.fetch_add(millis, Ordering::Relaxed);
        m.duration_count.fetch_add(1, Ordering::Relaxed);
        m.duration_min_millis.fetch_min(millis, Ordering::Relaxed);
        m.duration_max_millis.fetch_max(millis, Ordering::Relaxed);

        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        m.last_timestamp_unix_millis.store(now, Ordering::Relaxed);
    }

    pub fn record_transition(&self, tool: &str, from: &str, to: &str) {
        let bucket = self
            .transitions
            .entry(tool.to_string())
            .or_insert_with(BreakerTransitions::default);
        let key = format!("{from}->{to}");
        bucket
            .counts
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Vec<ToolStats> {
        self.tools
            .iter()
            .map(|entry| {
                let tool = entry.key().clone();
                let m = entry.value();
                let count = m.duration_count.load(Ordering::Relaxed);
                let min_ms = m.duration_min_millis.load(Ordering::Relaxed);
                let error_type_counts = m
                    .error_types
                    .iter()
                    .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
                    .collect();
                ToolStats {
                    tool,
                    success: m.success.load(Ordering::Relaxed),
                    failure: m.failure.load(Ordering::Relaxed),
                    rejected: m.rejected.load(Ordering::Relaxed),
                    active: m.active.load(Ordering::Relaxed),
                    duration_count: count,
                    duration_sum_seconds: m.duration_sum_millis.load(Ordering::Relaxed) as f64 / 1000.0,
                    duration_min_seconds: if count == 0 { 0.0 } else { min_ms as f64 / 1000.0 },
                    duration_max_seconds: m.duration_max_millis.load(Ordering::Relaxed) as f64 / 1000.0,
                    last_timestamp_unix_millis: m.last_timestamp_unix_millis.load(Ordering::Relaxed),
                    error_type_counts,
                }
            })
            .collect()
    }
}

// `AtomicU64::fetch_min`/`fetch_max` are unstable on some targets at the
// exact signature used above for `u64`; provide the standard-library
// equivalent explicitly to stay on stable semantics across targets.
trait AtomicMinMax {
    fn fetch_min(&self, val: u64, order: Ordering) -> u64;
    fn fetch_max(&self, val: u64, order: Ordering) -> u64;
}

impl AtomicMinMax for AtomicU64 {
    fn fetch_min(&self, val: u64, order: Ordering) -> u64 {
        self.fetch_update(order, order, |cur| {
            if cur == 0 || val < cur {
                Some(val)
            } else {
                None
            }
        })
        .unwrap_or_else(|cur| cur)
    }

    fn fetch_max(&self, val: u64, order: Ordering) -> u64 {
        self.fetch_update(order, order, |cur| if val > cur { Some(val) } else { None })
            .unwrap_or_else(|cur| cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_outcomes_and_active_gauge() {
        let sink = MetricsSink::new();
        sink.incr_active("nmap");
        sink.record("nmap", Outcome::Success, None, 0.25);
        sink.decr_active("nmap");
        sink.record("nmap", Outcome::Failure, Some(ErrorType::Timeout), 1.5);

        let snap = sink.snapshot();
        let nmap = snap.iter().find(|s| s.tool == "nmap").unwrap();
        assert_eq!(nmap.success, 1);
        assert_eq!(nmap.failure, 1);
        assert_eq!(nmap.active, 0);
        assert_eq!(nmap.duration_count, 2);
        assert_eq!(nmap.error_type_counts.get("timeout").copied(), Some(1));
    }

    #[test]
    fn transitions_are_counted_independently_of_executions() {
        let sink = MetricsSink::new();
        sink.record_transition("nmap", "closed", "open");
        sink.record_transition("nmap", "closed", "open");
        let bucket = sink.transitions.get("nmap").unwrap();
        assert_eq!(
            bucket
                .counts
                .get("closed->open")
                .unwrap()
                .load(Ordering::Relaxed),
            2
        );
    }
}
