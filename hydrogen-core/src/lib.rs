//! # hydrogen-core
//!
//! Core types for the Hydrogen database dispatch layer.
//! Engine/queue enums, query request/result types, typed parameters with
//! named→positional conversion, query signatures, errors, configuration.
//! No I/O here — the machinery lives in `hydrogen-dbqueue`.

pub mod config;
pub mod engine;
pub mod error;
pub mod params;
pub mod signature;
pub mod types;

pub use config::DatabaseConfig;
pub use error::{DbError, Result};
pub use types::{EngineKind, IsolationLevel, QueryRequest, QueryResult, QueueKind};
