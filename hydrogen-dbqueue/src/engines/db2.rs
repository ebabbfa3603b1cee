//! DB2 backend over ODBC (feature `db2`).
//!
//! DB2's connection strings are already ODBC key/value strings, so the raw
//! string goes straight to the driver. ODBC prepared handles borrow the
//! connection, so the cache handle here is the analysed template; each
//! execution binds values as text and lets DB2 coerce — the same behavior
//! the CLI driver applies to untyped markers.

use std::sync::LazyLock;
use std::time::Instant;

use odbc_api::buffers::TextRowSet;
use odbc_api::parameter::VarCharBox;
use odbc_api::{Connection, ConnectionOptions, Cursor, Environment, IntoParameter, ResultSetMetadata};

use hydrogen_core::engine::{EngineConnection, QueryEngine};
use hydrogen_core::error::{DbError, Result};
use hydrogen_core::params::{analyze_template, parse_typed_parameters, ParamValue, ParameterList, PreparedTemplate};
use hydrogen_core::types::{
    ConnectionConfig, EngineKind, IsolationLevel, QueryRequest, QueryResult,
};

use crate::connstring;
use crate::prepared::PreparedStatementCache;

/// Rows fetched per ODBC round trip.
const FETCH_BATCH_SIZE: usize = 256;
/// Upper bound per text cell.
const MAX_CELL_BYTES: usize = 65536;

static ODBC_ENV: LazyLock<Environment> =
    LazyLock::new(|| Environment::new().expect("ODBC environment initialization failed"));

pub struct Db2Engine;

impl QueryEngine for Db2Engine {
    fn kind(&self) -> EngineKind {
        EngineKind::Db2
    }

    fn validate_connection_string(&self, raw: &str) -> bool {
        connstring::validate(EngineKind::Db2, raw)
    }

    fn connect(
        &self,
        config: &ConnectionConfig,
        designator: &str,
    ) -> Result<Box<dyn EngineConnection>> {
        let raw = config
            .connection_string
            .as_deref()
            .ok_or_else(|| DbError::param("db2 requires a raw ODBC connection string"))?;

        let conn = ODBC_ENV
            .connect_with_connection_string(raw, ConnectionOptions::default())
            .map_err(|e| DbError::Connect {
                engine: EngineKind::Db2.as_str().to_string(),
                message: e.to_string(),
            })?;

        tracing::debug!(designator, database = %config.database, "db2 connection established");
        Ok(Box::new(Db2Connection {
            conn,
            designator: designator.to_string(),
            cache: PreparedStatementCache::new(config.prepared_statement_cache_size),
        }))
    }
}

pub struct Db2Connection {
    conn: Connection<'static>,
    designator: String,
    cache: PreparedStatementCache<PreparedTemplate>,
}

fn text_params(values: &[ParamValue]) -> Vec<VarCharBox> {
    values
        .iter()
        .map(|value| match value {
            ParamValue::Integer(i) => i.to_string().into_parameter(),
            ParamValue::Text(s) => s.clone().into_parameter(),
            ParamValue::Bool(b) => if *b { "1" } else { "0" }.to_string().into_parameter(),
            ParamValue::Float(f) => f.to_string().into_parameter(),
        })
        .collect()
}

fn request_params(request: &QueryRequest) -> Result<ParameterList> {
    match request.parameters_json.as_deref() {
        Some(json) => parse_typed_parameters(json),
        None => Ok(ParameterList::default()),
    }
}

impl Db2Connection {
    fn run(&self, sql: &str, values: &[ParamValue], query_id: &str) -> Result<QueryResult> {
        let started = Instant::now();
        let params = text_params(values);

        let mut result = QueryResult::empty(query_id);
        let cursor = self.conn.execute(sql, &params[..]).map_err(DbError::query)?;

        if let Some(mut cursor) = cursor {
            let column_names: Vec<String> = cursor
                .column_names()
                .map_err(DbError::query)?
                .collect::<std::result::Result<_, _>>()
                .map_err(DbError::query)?;

            let buffer = TextRowSet::for_cursor(FETCH_BATCH_SIZE, &mut cursor, Some(MAX_CELL_BYTES))
                .map_err(DbError::query)?;
            let mut row_set = cursor.bind_buffer(buffer).map_err(DbError::query)?;

            while let Some(batch) = row_set.fetch().map_err(DbError::query)? {
                for row in 0..batch.num_rows() {
                    let mut object = serde_json::Map::with_capacity(column_names.len());
                    for (col, name) in column_names.iter().enumerate() {
                        let value = match batch.at(col, row) {
                            Some(bytes) => serde_json::Value::String(
                                String::from_utf8_lossy(bytes).into_owned(),
                            ),
                            None => serde_json::Value::Null,
                        };
                        object.insert(name.clone(), value);
                    }
                    result.rows.push(serde_json::Value::Object(object));
                }
            }
            result.row_count = result.rows.len();
            result.column_names = column_names;
        }

        result.execution_time_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }
}

impl EngineConnection for Db2Connection {
    fn kind(&self) -> EngineKind {
        EngineKind::Db2
    }

    fn designator(&self) -> &str {
        &self.designator
    }

    fn health_check(&mut self) -> Result<()> {
        self.conn
            .execute("SELECT 1 FROM SYSIBM.SYSDUMMY1", ())
            .map_err(DbError::query)?;
        Ok(())
    }

    fn execute(&mut self, request: &QueryRequest) -> Result<QueryResult> {
        let params = request_params(request)?;
        let template = analyze_template(&request.sql_template, EngineKind::Db2)?;
        let values = template.bind_values(&params)?;
        self.run(&template.sql, &values, &request.query_id)
    }

    fn execute_prepared(&mut self, request: &QueryRequest) -> Result<QueryResult> {
        let name = request
            .prepared_statement_name
            .as_deref()
            .ok_or_else(|| DbError::param("prepared execution requires a statement name"))?;

        if !self.cache.contains(name) {
            self.prepare(name, &request.sql_template)?;
        }
        let template = self
            .cache
            .touch(name)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| DbError::StatementMissing { name: name.to_string() })?;

        let params = request_params(request)?;
        let values = template.bind_values(&params)?;
        self.run(&template.sql, &values, &request.query_id)
    }

    fn prepare(&mut self, name: &str, sql: &str) -> Result<()> {
        let template = analyze_template(sql, EngineKind::Db2)?;
        // Round-trip through the driver so malformed SQL fails here.
        self.conn.prepare(&template.sql).map_err(DbError::query)?;
        self.cache.insert(name, sql, template);
        Ok(())
    }

    fn unprepare(&mut self, name: &str) -> Result<()> {
        self.cache
            .remove(name)
            .ok_or_else(|| DbError::StatementMissing { name: name.to_string() })?;
        Ok(())
    }

    fn begin_transaction(&mut self, level: IsolationLevel) -> Result<()> {
        // DB2 isolation names: UR, CS, RS, RR.
        let db2_level = match level {
            IsolationLevel::ReadUncommitted => "UR",
            IsolationLevel::ReadCommitted => "CS",
            IsolationLevel::RepeatableRead => "RS",
            IsolationLevel::Serializable => "RR",
        };
        self.conn
            .execute(&format!("SET CURRENT ISOLATION = {db2_level}"), ())
            .map_err(DbError::query)?;
        self.conn.set_autocommit(false).map_err(DbError::query)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.commit().map_err(DbError::query)?;
        self.conn.set_autocommit(true).map_err(DbError::query)
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.rollback().map_err(DbError::query)?;
        self.conn.set_autocommit(true).map_err(DbError::query)
    }

    fn prepared_count(&self) -> usize {
        self.cache.len()
    }
}
