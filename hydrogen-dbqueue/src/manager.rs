//! The queue manager: every managed database's queue family, plus routing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustc_hash::FxHashMap;

use hydrogen_core::config::DatabaseConfig;
use hydrogen_core::error::{DbError, Result};
use hydrogen_core::signature::QuerySignature;
use hydrogen_core::types::{QueryRequest, QueryResult, QueueKind};

use crate::connstring;
use crate::engines::EngineRegistry;
use crate::family::{QueueCore, QueueFamily};
use crate::lock;
use crate::pending::{PendingTicket, Registration};
use crate::queue::{spawn_queue, QueryJob, WorkerHandle};

struct DatabaseRuntime {
    family: Arc<QueueFamily>,
    lead: Arc<WorkerHandle>,
}

/// Coordinates the queue families of every managed database.
///
/// `submit` routes a query by queue-kind hint, deduplicates identical
/// concurrent submissions by signature, and returns a ticket the caller can
/// wait on; `execute` is submit-and-wait.
pub struct QueueManager {
    registry: Arc<EngineRegistry>,
    databases: Mutex<FxHashMap<String, DatabaseRuntime>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(EngineRegistry::builtin()),
            databases: Mutex::new(FxHashMap::default()),
        }
    }

    /// Register a database and start its Lead queue. The Lead connects,
    /// runs the bootstrap query, and launches the worker queues.
    pub fn add_database(&self, config: DatabaseConfig) -> Result<()> {
        if config.name.is_empty() {
            return Err(DbError::param("database name must not be empty"));
        }

        let engine = match config.engine.as_deref() {
            Some(name) => self.registry.get_by_name(name)?,
            None => self.registry.get(connstring::detect_engine(&config.connection_string))?,
        };
        if !engine.validate_connection_string(&config.connection_string) {
            return Err(DbError::param(format!(
                "connection string does not match engine {}",
                engine.kind()
            )));
        }

        let mut conn_config = connstring::parse(&config.connection_string)?;
        conn_config.timeout_seconds = config.effective_query_timeout();
        conn_config.prepared_statement_cache_size = config.effective_prepared_cache_size();

        let mut databases = lock(&self.databases);
        if databases.contains_key(&config.name) {
            return Err(DbError::param(format!("database {} is already registered", config.name)));
        }

        let name = config.name.clone();
        let core = Arc::new(QueueCore::new(
            config,
            engine.kind(),
            conn_config,
            Arc::clone(&self.registry),
        ));
        let family = QueueFamily::new(core);
        let lead = spawn_queue(&family, QueueKind::Lead);

        tracing::info!(database = %name, engine = %engine.kind(), "database registered");
        databases.insert(name, DatabaseRuntime { family, lead });
        Ok(())
    }

    /// Unregister a database, stopping its queues and joining their threads.
    pub fn remove_database(&self, name: &str) -> Result<()> {
        let runtime = lock(&self.databases)
            .remove(name)
            .ok_or_else(|| DbError::UnknownDatabase { name: name.to_string() })?;
        shutdown_runtime(&runtime);
        tracing::info!(database = name, "database removed");
        Ok(())
    }

    pub fn database_names(&self) -> Vec<String> {
        lock(&self.databases).keys().cloned().collect()
    }

    /// Submit a query. Returns a ticket to wait on; identical concurrent
    /// submissions share one execution.
    pub fn submit(
        &self,
        database: &str,
        request: QueryRequest,
        queue_hint: Option<&str>,
    ) -> Result<PendingTicket> {
        let (family, lead) = {
            let databases = lock(&self.databases);
            let runtime = databases
                .get(database)
                .ok_or_else(|| DbError::UnknownDatabase { name: database.to_string() })?;
            (Arc::clone(&runtime.family), Arc::clone(&runtime.lead))
        };
        let core = &family.core;

        let kind = QueueKind::from_hint(queue_hint);
        let timeout = request
            .timeout_seconds
            .unwrap_or_else(|| core.config.effective_query_timeout());
        let signature = QuerySignature::compute(
            database,
            &request.sql_template,
            request.parameters_json.as_deref(),
        );

        match core.pending.register(signature, Duration::from_secs(timeout)) {
            Registration::Joined(ticket) => {
                core.stats.record_deduplicated(kind);
                tracing::debug!(database, %signature, query_id = %request.query_id,
                    "joined identical in-flight query");
                Ok(ticket)
            }
            Registration::Registered(ticket) => {
                core.stats.record_submission(kind);
                // Until the Lead has launched the workers, it takes the
                // queries itself.
                let target = family.route(kind).unwrap_or(lead);
                let query_id = request.query_id.clone();
                if let Err(error) = target.submit(QueryJob { request, signature }) {
                    core.pending
                        .complete(signature, QueryResult::failure(query_id, error.to_string()));
                    core.stats.record_failure(kind);
                    return Err(error);
                }
                Ok(ticket)
            }
        }
    }

    /// Submit and block for the result.
    pub fn execute(
        &self,
        database: &str,
        request: QueryRequest,
        queue_hint: Option<&str>,
    ) -> Result<QueryResult> {
        let stats = {
            let databases = lock(&self.databases);
            databases
                .get(database)
                .map(|runtime| Arc::clone(&runtime.family.core.stats))
                .ok_or_else(|| DbError::UnknownDatabase { name: database.to_string() })?
        };
        let ticket = self.submit(database, request, queue_hint)?;
        ticket.wait().inspect_err(|error| {
            if matches!(error, DbError::Timeout { .. }) {
                stats.record_timeout();
            }
        })
    }

    /// Submit a query by template-cache reference instead of raw SQL.
    pub fn submit_ref(
        &self,
        database: &str,
        query_id: &str,
        query_ref: &str,
        parameters_json: Option<&str>,
        queue_hint: Option<&str>,
    ) -> Result<PendingTicket> {
        let template = {
            let databases = lock(&self.databases);
            let runtime = databases
                .get(database)
                .ok_or_else(|| DbError::UnknownDatabase { name: database.to_string() })?;
            runtime
                .family
                .core
                .templates
                .get(query_ref)
                .ok_or_else(|| DbError::UnknownQueryRef { reference: query_ref.to_string() })?
        };

        let mut request = QueryRequest::new(query_id, template.sql_template.clone());
        if let Some(parameters_json) = parameters_json {
            request = request.with_parameters(parameters_json);
        }
        self.submit(database, request, queue_hint)
    }

    /// Per-database statistics as JSON.
    pub fn stats_json(&self, database: &str) -> Result<serde_json::Value> {
        let databases = lock(&self.databases);
        let runtime = databases
            .get(database)
            .ok_or_else(|| DbError::UnknownDatabase { name: database.to_string() })?;
        Ok(runtime.family.core.stats.to_json())
    }

    /// Jobs waiting across the database's whole queue family.
    pub fn queue_depth(&self, database: &str) -> Result<usize> {
        let databases = lock(&self.databases);
        let runtime = databases
            .get(database)
            .ok_or_else(|| DbError::UnknownDatabase { name: database.to_string() })?;
        Ok(runtime.lead.depth() + runtime.family.total_depth())
    }

    /// Worker queues currently running for a database (the Lead not
    /// included). Zero until the Lead's conductor has launched them.
    pub fn worker_queue_count(&self, database: &str) -> Result<usize> {
        let databases = lock(&self.databases);
        let runtime = databases
            .get(database)
            .ok_or_else(|| DbError::UnknownDatabase { name: database.to_string() })?;
        Ok(runtime.family.worker_count())
    }

    /// Whether the database's Lead currently holds a live connection.
    pub fn is_connected(&self, database: &str) -> Result<bool> {
        let databases = lock(&self.databases);
        let runtime = databases
            .get(database)
            .ok_or_else(|| DbError::UnknownDatabase { name: database.to_string() })?;
        Ok(runtime.lead.is_connected())
    }

    /// Stop every database's queues and join their worker threads.
    pub fn shutdown(&self) {
        let runtimes: Vec<DatabaseRuntime> =
            lock(&self.databases).drain().map(|(_, runtime)| runtime).collect();
        for runtime in &runtimes {
            shutdown_runtime(runtime);
        }
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for QueueManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn shutdown_runtime(runtime: &DatabaseRuntime) {
    runtime.family.core.request_shutdown();
    runtime.lead.request_shutdown();
    runtime.family.shutdown();
    runtime.lead.join();
}
