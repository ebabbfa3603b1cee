//! Per-database runtime configuration.

use serde::{Deserialize, Serialize};

use crate::types::QueueKind;

/// Configuration for one managed database.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database identifier (e.g., "Acuranzo"). Used in queue designators.
    pub name: String,
    /// Engine name ("postgresql", "sqlite", "mysql", "db2"). When absent the
    /// engine is detected from the connection string.
    pub engine: Option<String>,
    /// Connection string; format depends on the engine.
    pub connection_string: String,
    /// Query the Lead runs after its first connection to seed the template
    /// cache. Rows must carry `query_ref` and `query_template` columns.
    pub bootstrap_query: Option<String>,
    /// Worker-queue scaling bounds.
    pub queues: QueueScaling,
    /// Seconds between connection health checks. Default: 30.
    pub heartbeat_interval_seconds: Option<u64>,
    /// Default per-query timeout. Default: 30.
    pub query_timeout_seconds: Option<u64>,
    /// Per-connection prepared-statement cache capacity. Default: 1000.
    pub prepared_statement_cache_size: Option<usize>,
    /// Bound of each queue's job channel. Default: 1024.
    pub queue_capacity: Option<usize>,
    /// Template cache capacity. Default: 4096.
    pub template_cache_capacity: Option<u64>,
}

impl DatabaseConfig {
    pub fn new(name: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection_string: connection_string.into(),
            ..Self::default()
        }
    }

    pub fn effective_heartbeat_interval(&self) -> u64 {
        self.heartbeat_interval_seconds.unwrap_or(30)
    }

    pub fn effective_query_timeout(&self) -> u64 {
        self.query_timeout_seconds.unwrap_or(30)
    }

    pub fn effective_prepared_cache_size(&self) -> usize {
        self.prepared_statement_cache_size.unwrap_or(1000)
    }

    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(1024)
    }

    pub fn effective_template_cache_capacity(&self) -> u64 {
        self.template_cache_capacity.unwrap_or(4096)
    }
}

/// Scaling bounds for one worker-queue kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingBounds {
    /// Queues spawned by the Lead at startup.
    pub start: usize,
    /// Floor the rebalancer never scales below.
    pub min: usize,
    /// Ceiling the rebalancer never scales above.
    pub max: usize,
}

impl Default for ScalingBounds {
    fn default() -> Self {
        Self { start: 1, min: 1, max: 3 }
    }
}

/// Scaling bounds for all four worker-queue kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QueueScaling {
    pub slow: ScalingBounds,
    pub medium: ScalingBounds,
    pub fast: ScalingBounds,
    pub cache: ScalingBounds,
}

impl QueueScaling {
    pub fn bounds(&self, kind: QueueKind) -> ScalingBounds {
        match kind {
            QueueKind::Slow => self.slow,
            QueueKind::Medium => self.medium,
            QueueKind::Fast => self.fast,
            QueueKind::Cache => self.cache,
            // The Lead is never scaled; treat it as a fixed singleton.
            QueueKind::Lead => ScalingBounds { start: 1, min: 1, max: 1 },
        }
    }
}
