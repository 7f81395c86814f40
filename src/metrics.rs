//! Render metrics for monitoring and observability.
//!
//! This module provides the counters a [`Pool`](crate::Pool) keeps about its
//! renders and worker lifecycle, and the snapshot type it reports them in.

use crate::error::ErrorCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time statistics for a pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Version hash of the active code
    pub version: String,

    /// When the active code was installed
    pub code_updated_at: DateTime<Utc>,

    /// Idle workers currently on the free list (stale ones included)
    pub idle_workers: usize,

    /// Workers constructed since the pool was created
    pub workers_created: u64,

    /// Workers closed by the pool (stale, errored or retired)
    pub workers_discarded: u64,

    /// Renders attempted through the pool
    pub total_renders: u64,

    /// Renders that returned a response
    pub successful_renders: u64,

    /// Renders that returned an error
    pub failed_renders: u64,

    /// Renders that timed out
    pub timeouts: u64,

    /// Successful code updates
    pub code_updates: u64,

    /// Average render time in microseconds
    pub avg_render_time_us: f64,
}

/// Metrics collector for aggregating pool metrics
pub struct MetricsCollector {
    total_renders: AtomicU64,
    successful_renders: AtomicU64,
    failed_renders: AtomicU64,
    total_render_time_us: AtomicU64,
    workers_created: AtomicU64,
    workers_discarded: AtomicU64,
    code_updates: AtomicU64,
    error_counts: parking_lot::Mutex<HashMap<ErrorCode, u64>>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            total_renders: AtomicU64::new(0),
            successful_renders: AtomicU64::new(0),
            failed_renders: AtomicU64::new(0),
            total_render_time_us: AtomicU64::new(0),
            workers_created: AtomicU64::new(0),
            workers_discarded: AtomicU64::new(0),
            code_updates: AtomicU64::new(0),
            error_counts: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Record a finished render
    pub fn record_render(&self, duration: Duration, success: bool) {
        self.total_renders.fetch_add(1, Ordering::Relaxed);

        if success {
            self.successful_renders.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_renders.fetch_add(1, Ordering::Relaxed);
        }

        self.total_render_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record an error
    pub fn record_error(&self, code: ErrorCode) {
        let mut counts = self.error_counts.lock();
        *counts.entry(code).or_insert(0) += 1;
    }

    /// Record a newly constructed worker
    pub fn record_worker_created(&self) {
        self.workers_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record workers closed by the pool
    pub fn record_workers_discarded(&self, count: usize) {
        self.workers_discarded
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a successful code update
    pub fn record_code_update(&self) {
        self.code_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total renders
    pub fn total_renders(&self) -> u64 {
        self.total_renders.load(Ordering::Relaxed)
    }

    /// Get successful renders
    pub fn successful_renders(&self) -> u64 {
        self.successful_renders.load(Ordering::Relaxed)
    }

    /// Get failed renders
    pub fn failed_renders(&self) -> u64 {
        self.failed_renders.load(Ordering::Relaxed)
    }

    /// Get workers created
    pub fn workers_created(&self) -> u64 {
        self.workers_created.load(Ordering::Relaxed)
    }

    /// Get workers discarded
    pub fn workers_discarded(&self) -> u64 {
        self.workers_discarded.load(Ordering::Relaxed)
    }

    /// Get successful code updates
    pub fn code_updates(&self) -> u64 {
        self.code_updates.load(Ordering::Relaxed)
    }

    /// Get the number of errors recorded with the given code
    pub fn error_count(&self, code: ErrorCode) -> u64 {
        self.error_counts.lock().get(&code).copied().unwrap_or(0)
    }

    /// Get error counts
    pub fn error_counts(&self) -> HashMap<ErrorCode, u64> {
        self.error_counts.lock().clone()
    }

    /// Get average render time in microseconds
    pub fn avg_render_time_us(&self) -> f64 {
        let total = self.total_renders.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.total_render_time_us.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    /// Export Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP reactor_renders_total Total renders\n");
        output.push_str("# TYPE reactor_renders_total counter\n");
        output.push_str(&format!(
            "reactor_renders_total{{status=\"success\"}} {}\n",
            self.successful_renders()
        ));
        output.push_str(&format!(
            "reactor_renders_total{{status=\"error\"}} {}\n",
            self.failed_renders()
        ));

        output.push_str("\n# HELP reactor_render_time_us Average render time\n");
        output.push_str("# TYPE reactor_render_time_us gauge\n");
        output.push_str(&format!(
            "reactor_render_time_us {:.2}\n",
            self.avg_render_time_us()
        ));

        output.push_str("\n# HELP reactor_workers_created_total Workers constructed\n");
        output.push_str("# TYPE reactor_workers_created_total counter\n");
        output.push_str(&format!(
            "reactor_workers_created_total {}\n",
            self.workers_created()
        ));

        output.push_str("\n# HELP reactor_workers_discarded_total Workers closed by the pool\n");
        output.push_str("# TYPE reactor_workers_discarded_total counter\n");
        output.push_str(&format!(
            "reactor_workers_discarded_total {}\n",
            self.workers_discarded()
        ));

        output.push_str("\n# HELP reactor_code_updates_total Successful code updates\n");
        output.push_str("# TYPE reactor_code_updates_total counter\n");
        output.push_str(&format!(
            "reactor_code_updates_total {}\n",
            self.code_updates()
        ));

        // Errors
        output.push_str("\n# HELP reactor_errors_total Error counts by code\n");
        output.push_str("# TYPE reactor_errors_total counter\n");
        for (code, count) in self.error_counts() {
            output.push_str(&format!(
                "reactor_errors_total{{code=\"{}\"}} {}\n",
                code, count
            ));
        }

        output
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
