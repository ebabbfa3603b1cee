//! Dispatch statistics: per-queue-kind counters plus manager-wide totals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use hydrogen_core::types::QueueKind;

// Fixed reporting order, Lead last.
const QUEUE_ORDER: [QueueKind; 5] = [
    QueueKind::Slow,
    QueueKind::Medium,
    QueueKind::Fast,
    QueueKind::Cache,
    QueueKind::Lead,
];

fn index(kind: QueueKind) -> usize {
    match kind {
        QueueKind::Slow => 0,
        QueueKind::Medium => 1,
        QueueKind::Fast => 2,
        QueueKind::Cache => 3,
        QueueKind::Lead => 4,
    }
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Default)]
struct QueueCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    total_execution_ms: AtomicU64,
    last_used: AtomicU64,
}

/// Counters for one database's queue family.
#[derive(Debug, Default)]
pub struct DispatchStats {
    queues: [QueueCounters; 5],
    total_timeouts: AtomicU64,
    total_deduplicated: AtomicU64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submission(&self, kind: QueueKind) {
        let counters = &self.queues[index(kind)];
        counters.submitted.fetch_add(1, Ordering::Relaxed);
        counters.last_used.store(epoch_seconds(), Ordering::Relaxed);
    }

    pub fn record_completion(&self, kind: QueueKind, execution_time_ms: u64) {
        let counters = &self.queues[index(kind)];
        counters.completed.fetch_add(1, Ordering::Relaxed);
        counters.total_execution_ms.fetch_add(execution_time_ms, Ordering::Relaxed);
    }

    pub fn record_failure(&self, kind: QueueKind) {
        self.queues[index(kind)].failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.total_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduplicated(&self, kind: QueueKind) {
        self.total_deduplicated.fetch_add(1, Ordering::Relaxed);
        self.queues[index(kind)].last_used.store(epoch_seconds(), Ordering::Relaxed);
    }

    pub fn submitted(&self, kind: QueueKind) -> u64 {
        self.queues[index(kind)].submitted.load(Ordering::Relaxed)
    }

    pub fn completed(&self, kind: QueueKind) -> u64 {
        self.queues[index(kind)].completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self, kind: QueueKind) -> u64 {
        self.queues[index(kind)].failed.load(Ordering::Relaxed)
    }

    pub fn deduplicated(&self) -> u64 {
        self.total_deduplicated.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.total_timeouts.load(Ordering::Relaxed)
    }

    /// Render the counters as JSON for monitoring endpoints.
    pub fn to_json(&self) -> serde_json::Value {
        let mut total_submitted = 0;
        let mut total_completed = 0;
        let mut total_failed = 0;

        let per_queue: Vec<serde_json::Value> = QUEUE_ORDER
            .iter()
            .map(|&kind| {
                let counters = &self.queues[index(kind)];
                let submitted = counters.submitted.load(Ordering::Relaxed);
                let completed = counters.completed.load(Ordering::Relaxed);
                let failed = counters.failed.load(Ordering::Relaxed);
                let total_ms = counters.total_execution_ms.load(Ordering::Relaxed);
                total_submitted += submitted;
                total_completed += completed;
                total_failed += failed;
                serde_json::json!({
                    "queue_type": kind.as_str(),
                    "submitted": submitted,
                    "completed": completed,
                    "failed": failed,
                    "avg_execution_time_ms": if completed > 0 { total_ms / completed } else { 0 },
                    "last_used": counters.last_used.load(Ordering::Relaxed),
                })
            })
            .collect();

        serde_json::json!({
            "total_queries_submitted": total_submitted,
            "total_queries_completed": total_completed,
            "total_queries_failed": total_failed,
            "total_timeouts": self.total_timeouts.load(Ordering::Relaxed),
            "total_deduplicated": self.total_deduplicated.load(Ordering::Relaxed),
            "per_queue_stats": per_queue,
        })
    }
}
