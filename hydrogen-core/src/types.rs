//! Engine, queue and query types shared across the dispatch layer.

use serde::{Deserialize, Serialize};

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Postgres,
    Sqlite,
    Mysql,
    Db2,
}

impl EngineKind {
    /// Engine identifier as used in configuration and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgresql",
            Self::Sqlite => "sqlite",
            Self::Mysql => "mysql",
            Self::Db2 => "db2",
        }
    }

    /// Parse an engine name. Accepts the short form "postgres" as well.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "postgresql" | "postgres" => Some(Self::Postgres),
            "sqlite" => Some(Self::Sqlite),
            "mysql" => Some(Self::Mysql),
            "db2" => Some(Self::Db2),
            _ => None,
        }
    }

    /// Whether this engine uses numbered `$n` placeholders rather than `?`.
    pub fn uses_numbered_placeholders(self) -> bool {
        matches!(self, Self::Postgres)
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue kinds within a database's queue family.
///
/// Every database has exactly one Lead queue (ordinal 00); the worker kinds
/// are spawned and scaled by the Lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Lead,
    Slow,
    Medium,
    Fast,
    Cache,
}

impl QueueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Slow => "slow",
            Self::Medium => "medium",
            Self::Fast => "fast",
            Self::Cache => "cache",
        }
    }

    /// Single-letter tag used in queue designators (`DQM-Acuranzo-01-F`).
    pub fn tag(self) -> char {
        match self {
            Self::Lead => 'L',
            Self::Slow => 'S',
            Self::Medium => 'M',
            Self::Fast => 'F',
            Self::Cache => 'C',
        }
    }

    /// Route a queue hint. Unknown hints fall back to Medium.
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint {
            Some("slow") => Self::Slow,
            Some("medium") => Self::Medium,
            Some("fast") => Self::Fast,
            Some("cache") => Self::Cache,
            _ => Self::Medium,
        }
    }

    /// The worker kinds a Lead can spawn, in spawn order.
    pub const WORKER_KINDS: [QueueKind; 4] =
        [Self::Slow, Self::Medium, Self::Fast, Self::Cache];
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction isolation levels, mapped per engine dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling, shared by every engine that accepts SET TRANSACTION.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// A query submitted to the dispatch layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Caller-chosen identifier, carried through to the result.
    pub query_id: String,
    /// SQL template with `:name` placeholders.
    pub sql_template: String,
    /// Typed parameters as JSON (see `params`). None means no parameters.
    pub parameters_json: Option<String>,
    /// Per-query timeout; falls back to the database default when None.
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub isolation_level: IsolationLevel,
    /// Execute through the prepared-statement cache.
    #[serde(default)]
    pub use_prepared_statement: bool,
    /// Cache key for the prepared path. Required when `use_prepared_statement`.
    pub prepared_statement_name: Option<String>,
}

impl QueryRequest {
    /// A plain one-shot query with no parameters.
    pub fn new(query_id: impl Into<String>, sql_template: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            sql_template: sql_template.into(),
            parameters_json: None,
            timeout_seconds: None,
            isolation_level: IsolationLevel::default(),
            use_prepared_statement: false,
            prepared_statement_name: None,
        }
    }

    pub fn with_parameters(mut self, parameters_json: impl Into<String>) -> Self {
        self.parameters_json = Some(parameters_json.into());
        self
    }

    pub fn prepared(mut self, statement_name: impl Into<String>) -> Self {
        self.use_prepared_statement = true;
        self.prepared_statement_name = Some(statement_name.into());
        self
    }
}

/// The outcome of a query execution.
///
/// Cloneable: a deduplicated execution fans the same result out to every
/// waiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub query_id: String,
    pub success: bool,
    /// Rows as JSON objects keyed by column name.
    pub rows: Vec<serde_json::Value>,
    pub column_names: Vec<String>,
    pub row_count: usize,
    pub affected_rows: u64,
    pub execution_time_ms: u64,
    pub error_message: Option<String>,
}

impl QueryResult {
    /// An empty success result (DDL, inserts with no RETURNING, …).
    pub fn empty(query_id: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            success: true,
            rows: Vec::new(),
            column_names: Vec::new(),
            row_count: 0,
            affected_rows: 0,
            execution_time_ms: 0,
            error_message: None,
        }
    }

    /// A failure carrying the engine's error message.
    pub fn failure(query_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            success: false,
            rows: Vec::new(),
            column_names: Vec::new(),
            row_count: 0,
            affected_rows: 0,
            execution_time_ms: 0,
            error_message: Some(message.into()),
        }
    }
}

/// Parsed connection parameters for one database.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// The raw connection string this config was parsed from, if any.
    pub connection_string: Option<String>,
    pub timeout_seconds: u64,
    /// Capacity of the per-connection prepared-statement cache.
    pub prepared_statement_cache_size: usize,
}
