//! The engine contract every backend implements.
//!
//! A [`QueryEngine`] is a stateless factory registered once per build; an
//! [`EngineConnection`] is a live connection owned by exactly one worker
//! thread. Every connection method takes `&mut self` — exclusive ownership
//! is what enforces the at-most-one-writer-per-connection discipline, not a
//! lock.

use crate::error::Result;
use crate::types::{ConnectionConfig, EngineKind, IsolationLevel, QueryRequest, QueryResult};

/// Stateless engine factory.
pub trait QueryEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Whether a raw connection string has this engine's shape.
    fn validate_connection_string(&self, raw: &str) -> bool;

    /// Open a connection. The designator (`DQM-<db>-<NN>-<tag>`) is carried
    /// into logs emitted by the connection.
    fn connect(
        &self,
        config: &ConnectionConfig,
        designator: &str,
    ) -> Result<Box<dyn EngineConnection>>;
}

/// A live connection to one database, owned by one worker.
pub trait EngineConnection: Send {
    fn kind(&self) -> EngineKind;

    fn designator(&self) -> &str;

    /// Cheap liveness probe, run on the heartbeat interval.
    fn health_check(&mut self) -> Result<()>;

    /// Execute a templated query: parse typed parameters, rewrite
    /// placeholders for this engine's dialect, run, and shape the rows as
    /// JSON objects keyed by column name.
    fn execute(&mut self, request: &QueryRequest) -> Result<QueryResult>;

    /// Execute through the prepared-statement cache, preparing on miss.
    /// The request must carry `prepared_statement_name`.
    fn execute_prepared(&mut self, request: &QueryRequest) -> Result<QueryResult>;

    /// Prepare a statement into the cache under `name`. Replaces an existing
    /// entry of the same name; may evict the least recently used entry.
    fn prepare(&mut self, name: &str, sql: &str) -> Result<()>;

    /// Drop a statement from the cache and release its backend handle.
    fn unprepare(&mut self, name: &str) -> Result<()>;

    fn begin_transaction(&mut self, level: IsolationLevel) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;

    /// Number of statements currently cached, for monitoring.
    fn prepared_count(&self) -> usize;
}
