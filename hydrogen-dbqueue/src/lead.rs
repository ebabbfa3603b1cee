//! Lead-queue conductor.
//!
//! Runs once, on the Lead's first successful connection: bootstrap query →
//! seed the template cache → launch the configured worker queues. The Lead
//! keeps processing queries itself afterwards; rebalancing and pending-entry
//! sweeps ride its heartbeat.

use std::sync::Arc;

use hydrogen_core::engine::EngineConnection;
use hydrogen_core::types::{QueryRequest, QueueKind};

use crate::family::{QueueCore, QueueFamily};

pub(crate) fn run_conductor(family: &Arc<QueueFamily>, conn: &mut dyn EngineConnection) {
    run_bootstrap(&family.core, conn);
    launch_worker_queues(family);
}

/// Execute the configured bootstrap query and seed the template cache from
/// its rows. Bootstrap failure leaves the database usable — queries just
/// cannot be submitted by reference until a reconnect re-runs it.
pub(crate) fn run_bootstrap(core: &QueueCore, conn: &mut dyn EngineConnection) {
    let Some(bootstrap) = core.config.bootstrap_query.as_deref() else {
        return;
    };

    let request = QueryRequest::new(format!("{}-bootstrap", core.database), bootstrap);
    match conn.execute(&request) {
        Ok(result) if result.success => {
            let seeded = core.templates.seed_from_rows(&result.rows);
            tracing::info!(database = %core.database, rows = result.row_count, seeded,
                "bootstrap query completed");
        }
        Ok(result) => {
            tracing::warn!(database = %core.database,
                error = result.error_message.as_deref().unwrap_or("unknown"),
                "bootstrap query failed");
        }
        Err(error) => {
            tracing::warn!(database = %core.database, %error, "bootstrap query failed");
        }
    }
}

fn launch_worker_queues(family: &Arc<QueueFamily>) {
    for kind in QueueKind::WORKER_KINDS {
        let bounds = family.core.config.queues.bounds(kind);
        for _ in 0..bounds.start {
            QueueFamily::spawn_worker(family, kind);
        }
    }
    tracing::info!(database = %family.core.database, queues = family.worker_count(),
        "worker queues launched");
}
