//! Errors for the database dispatch layer.

/// Errors that can occur anywhere in the dispatch layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("connection to {engine} failed: {message}")]
    Connect { engine: String, message: String },

    #[error("query failed: {message}")]
    Query { message: String },

    #[error("invalid parameters: {message}")]
    Param { message: String },

    #[error("placeholder :{name} has no matching parameter")]
    UnknownPlaceholder { name: String },

    #[error("query timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("engine {name} is not available in this build")]
    UnsupportedEngine { name: String },

    #[error("queue {queue} is saturated")]
    QueueSaturated { queue: String },

    #[error("database {name} is not registered")]
    UnknownDatabase { name: String },

    #[error("prepared statement {name} is not cached on this connection")]
    StatementMissing { name: String },

    #[error("query reference {reference} not found in template cache")]
    UnknownQueryRef { reference: String },

    #[error("shutdown in progress")]
    Shutdown,
}

impl DbError {
    /// Shorthand for a query failure wrapping an engine error message.
    pub fn query(message: impl std::fmt::Display) -> Self {
        Self::Query {
            message: message.to_string(),
        }
    }

    /// Shorthand for a parameter error.
    pub fn param(message: impl std::fmt::Display) -> Self {
        Self::Param {
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
