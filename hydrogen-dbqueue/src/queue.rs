//! Worker queues: one bounded channel and one dedicated thread per queue.
//!
//! The worker thread is the sole owner of its engine connection — the
//! at-most-one-writer-per-connection discipline is structural, not locked.
//! The loop mirrors the recv-with-timeout pattern: wait up to a second for
//! a job, run the heartbeat when its interval elapses, drain on shutdown.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use hydrogen_core::engine::EngineConnection;
use hydrogen_core::error::{DbError, Result};
use hydrogen_core::signature::QuerySignature;
use hydrogen_core::types::{QueryRequest, QueryResult, QueueKind};

use crate::connstring;
use crate::family::{QueueCore, QueueFamily};
use crate::lead;
use crate::lock;

/// A query travelling through a queue.
#[derive(Debug)]
pub(crate) struct QueryJob {
    pub request: QueryRequest,
    pub signature: QuerySignature,
}

#[derive(Debug)]
pub(crate) enum Job {
    Query(Box<QueryJob>),
    Shutdown,
}

/// Submission-side handle on one queue.
pub(crate) struct WorkerHandle {
    pub kind: QueueKind,
    pub designator: String,
    sender: Sender<Job>,
    depth: AtomicUsize,
    connected: AtomicBool,
    join: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl WorkerHandle {
    /// Enqueue a job. A full channel is a saturation error, not a block.
    pub fn submit(&self, job: QueryJob) -> Result<()> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        match self.sender.try_send(Job::Query(Box::new(job))) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                Err(DbError::QueueSaturated { queue: self.designator.clone() })
            }
            Err(TrySendError::Disconnected(_)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                Err(DbError::Shutdown)
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        let _ = self.sender.try_send(Job::Shutdown);
    }

    pub fn join(&self) {
        if let Some(handle) = lock(&self.join).take() {
            let _ = handle.join();
        }
    }
}

/// Spawn one queue: channel, handle, worker thread.
pub(crate) fn spawn_queue(family: &Arc<QueueFamily>, kind: QueueKind) -> Arc<WorkerHandle> {
    let core = &family.core;
    let designator = core.next_designator(kind);
    let (tx, rx) = bounded(core.config.effective_queue_capacity());

    let handle = Arc::new(WorkerHandle {
        kind,
        designator: designator.clone(),
        sender: tx,
        depth: AtomicUsize::new(0),
        connected: AtomicBool::new(false),
        join: Mutex::new(None),
    });

    let thread = {
        let family = Arc::clone(family);
        let handle = Arc::clone(&handle);
        std::thread::Builder::new()
            .name(designator)
            .spawn(move || worker_loop(family, handle, rx))
            .expect("failed to spawn queue worker thread")
    };
    *lock(&handle.join) = Some(thread);

    handle
}

fn worker_loop(family: Arc<QueueFamily>, handle: Arc<WorkerHandle>, rx: Receiver<Job>) {
    let core = Arc::clone(&family.core);
    tracing::debug!(designator = %handle.designator, "worker thread started");

    let interval = Duration::from_secs(core.config.effective_heartbeat_interval().max(1));
    let mut conn: Option<Box<dyn EngineConnection>> = None;
    let mut conductor_done = false;

    // First connection attempt happens immediately, not one interval in.
    let mut last_heartbeat = Instant::now();
    heartbeat(&family, &handle, &mut conn, &mut conductor_done);

    loop {
        if core.shutdown_requested() {
            break;
        }
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(Job::Shutdown) => break,
            Ok(Job::Query(job)) => {
                handle.depth.fetch_sub(1, Ordering::SeqCst);
                process_job(&core, &handle, &mut conn, *job);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if last_heartbeat.elapsed() >= interval {
            last_heartbeat = Instant::now();
            heartbeat(&family, &handle, &mut conn, &mut conductor_done);
        }
    }

    // Fail whatever is still queued so waiters do not sit out their timeout.
    while let Ok(job) = rx.try_recv() {
        if let Job::Query(job) = job {
            handle.depth.fetch_sub(1, Ordering::SeqCst);
            core.pending.complete(
                job.signature,
                QueryResult::failure(job.request.query_id.clone(), "shutdown in progress"),
            );
        }
    }

    handle.connected.store(false, Ordering::SeqCst);
    tracing::debug!(designator = %handle.designator, "worker thread exiting");
}

/// Connection upkeep plus the Lead's periodic duties.
fn heartbeat(
    family: &Arc<QueueFamily>,
    handle: &WorkerHandle,
    conn: &mut Option<Box<dyn EngineConnection>>,
    conductor_done: &mut bool,
) {
    let core = &family.core;

    if let Some(live) = conn.as_deref_mut() {
        if let Err(error) = live.health_check() {
            tracing::warn!(designator = %handle.designator, %error,
                connection = %connstring::mask(&core.config.connection_string),
                "health check failed, dropping connection");
            *conn = None;
            handle.connected.store(false, Ordering::SeqCst);
        }
    }

    if conn.is_none() {
        match core.registry.connect(core.engine_kind, &core.conn_config, &handle.designator) {
            Ok(fresh) => {
                *conn = Some(fresh);
                handle.connected.store(true, Ordering::SeqCst);
                tracing::info!(designator = %handle.designator, "connection established");
                // A Lead reconnecting after its conductor ran re-seeds the
                // template cache.
                if handle.kind == QueueKind::Lead && *conductor_done {
                    if let Some(live) = conn.as_deref_mut() {
                        lead::run_bootstrap(core, live);
                    }
                }
            }
            Err(error) => {
                tracing::warn!(designator = %handle.designator, %error,
                    connection = %connstring::mask(&core.config.connection_string),
                    "connection attempt failed");
            }
        }
    }

    if handle.kind == QueueKind::Lead {
        if !*conductor_done {
            if let Some(live) = conn.as_deref_mut() {
                lead::run_conductor(family, live);
                *conductor_done = true;
            }
        } else {
            QueueFamily::rebalance(family);
        }
        core.pending.sweep_expired();
    }
}

fn process_job(
    core: &QueueCore,
    handle: &WorkerHandle,
    conn: &mut Option<Box<dyn EngineConnection>>,
    job: QueryJob,
) {
    let result = match conn.as_deref_mut() {
        None => QueryResult::failure(job.request.query_id.clone(), "no database connection"),
        Some(live) => {
            let outcome = if job.request.use_prepared_statement {
                live.execute_prepared(&job.request)
            } else {
                live.execute(&job.request)
            };
            match outcome {
                Ok(result) => result,
                Err(error) => {
                    tracing::debug!(designator = %handle.designator, %error,
                        query_id = %job.request.query_id, "query failed");
                    QueryResult::failure(job.request.query_id.clone(), error.to_string())
                }
            }
        }
    };

    if result.success {
        core.stats.record_completion(handle.kind, result.execution_time_ms);
    } else {
        core.stats.record_failure(handle.kind);
    }

    if !core.pending.complete(job.signature, result) {
        tracing::debug!(designator = %handle.designator,
            query_id = %job.request.query_id, "no waiter for completed query");
    }
}
