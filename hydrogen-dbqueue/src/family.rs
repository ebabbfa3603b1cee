//! A database's queue family: shared state plus the set of worker queues.
//!
//! The Lead queue (ordinal 00) is owned by the manager; the worker queues
//! live here, spawned by the Lead's conductor and rebalanced on its
//! heartbeat.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use hydrogen_core::config::DatabaseConfig;
use hydrogen_core::types::{ConnectionConfig, EngineKind, QueueKind};

use crate::engines::EngineRegistry;
use crate::lock;
use crate::pending::PendingRegistry;
use crate::queue::{spawn_queue, WorkerHandle};
use crate::stats::DispatchStats;
use crate::templates::TemplateCache;

/// State shared by every queue of one database.
pub(crate) struct QueueCore {
    pub database: String,
    pub engine_kind: EngineKind,
    pub conn_config: ConnectionConfig,
    pub config: DatabaseConfig,
    pub registry: Arc<EngineRegistry>,
    pub pending: Arc<PendingRegistry>,
    pub templates: TemplateCache,
    pub stats: Arc<DispatchStats>,
    next_ordinal: AtomicUsize,
    shutdown: AtomicBool,
}

impl QueueCore {
    pub fn new(
        config: DatabaseConfig,
        engine_kind: EngineKind,
        conn_config: ConnectionConfig,
        registry: Arc<EngineRegistry>,
    ) -> Self {
        Self {
            database: config.name.clone(),
            engine_kind,
            conn_config,
            templates: TemplateCache::new(config.effective_template_cache_capacity()),
            config,
            registry,
            pending: Arc::new(PendingRegistry::new()),
            stats: Arc::new(DispatchStats::new()),
            next_ordinal: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Claim the next queue ordinal and build its designator
    /// (`DQM-<database>-<NN>-<tag>`).
    pub fn next_designator(&self, kind: QueueKind) -> String {
        let ordinal = self.next_ordinal.fetch_add(1, Ordering::SeqCst);
        format!("DQM-{}-{:02}-{}", self.database, ordinal, kind.tag())
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// The worker queues of one database.
pub(crate) struct QueueFamily {
    pub core: Arc<QueueCore>,
    workers: Mutex<Vec<Arc<WorkerHandle>>>,
}

impl QueueFamily {
    pub fn new(core: Arc<QueueCore>) -> Arc<Self> {
        Arc::new(Self { core, workers: Mutex::new(Vec::new()) })
    }

    /// Spawn one worker queue of the given kind.
    pub fn spawn_worker(family: &Arc<Self>, kind: QueueKind) {
        let handle = spawn_queue(family, kind);
        lock(&family.workers).push(handle);
    }

    /// Pick the shallowest queue of a kind for a submission.
    pub fn route(&self, kind: QueueKind) -> Option<Arc<WorkerHandle>> {
        lock(&self.workers)
            .iter()
            .filter(|worker| worker.kind == kind)
            .min_by_key(|worker| worker.depth())
            .cloned()
    }

    pub fn depths(&self, kind: QueueKind) -> Vec<usize> {
        lock(&self.workers)
            .iter()
            .filter(|worker| worker.kind == kind)
            .map(|worker| worker.depth())
            .collect()
    }

    pub fn total_depth(&self) -> usize {
        lock(&self.workers).iter().map(|worker| worker.depth()).sum()
    }

    pub fn worker_count(&self) -> usize {
        lock(&self.workers).len()
    }

    /// Scale worker queues by load: a kind whose queues are all busy grows
    /// toward `max`; a kind whose queues are all idle shrinks toward `min`.
    pub fn rebalance(family: &Arc<Self>) {
        for kind in QueueKind::WORKER_KINDS {
            let bounds = family.core.config.queues.bounds(kind);
            let depths = family.depths(kind);
            if depths.is_empty() {
                continue;
            }
            if depths.iter().all(|&depth| depth > 0) && depths.len() < bounds.max {
                tracing::info!(database = %family.core.database, kind = %kind,
                    queues = depths.len() + 1, "scaling up worker queues");
                Self::spawn_worker(family, kind);
            } else if depths.iter().all(|&depth| depth == 0) && depths.len() > bounds.min {
                family.retire_one(kind);
            }
        }
    }

    /// Retire the newest idle worker of a kind.
    fn retire_one(&self, kind: QueueKind) {
        let retired = {
            let mut workers = lock(&self.workers);
            let position = workers
                .iter()
                .rposition(|worker| worker.kind == kind && worker.depth() == 0);
            position.map(|i| workers.remove(i))
        };
        if let Some(worker) = retired {
            tracing::info!(database = %self.core.database, designator = %worker.designator,
                "scaling down idle worker queue");
            worker.request_shutdown();
            worker.join();
        }
    }

    /// Signal every worker and join their threads.
    pub fn shutdown(&self) {
        self.core.request_shutdown();
        let workers: Vec<Arc<WorkerHandle>> = lock(&self.workers).drain(..).collect();
        for worker in &workers {
            worker.request_shutdown();
        }
        for worker in &workers {
            worker.join();
        }
    }
}
