//! SQLite backend.
//!
//! Statement compilation goes through rusqlite's own statement cache; our
//! prepared-statement cache holds the analysed template (rewritten SQL plus
//! placeholder order), so the name→SQL contract and LRU accounting live
//! here while rusqlite keeps the compiled handles.

use std::time::{Duration, Instant};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, ToSql};

use hydrogen_core::engine::{EngineConnection, QueryEngine};
use hydrogen_core::error::{DbError, Result};
use hydrogen_core::params::{analyze_template, parse_typed_parameters, ParamValue, ParameterList, PreparedTemplate};
use hydrogen_core::types::{
    ConnectionConfig, EngineKind, IsolationLevel, QueryRequest, QueryResult,
};

use crate::connstring;
use crate::prepared::PreparedStatementCache;

pub struct SqliteEngine;

impl QueryEngine for SqliteEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn validate_connection_string(&self, raw: &str) -> bool {
        connstring::validate(EngineKind::Sqlite, raw)
    }

    fn connect(
        &self,
        config: &ConnectionConfig,
        designator: &str,
    ) -> Result<Box<dyn EngineConnection>> {
        let path = config.database.as_str();
        let in_memory = path.is_empty() || path == ":memory:";

        let connect_err = |e: rusqlite::Error| DbError::Connect {
            engine: EngineKind::Sqlite.as_str().to_string(),
            message: e.to_string(),
        };

        let conn = if in_memory {
            Connection::open_in_memory().map_err(connect_err)?
        } else {
            Connection::open(path).map_err(connect_err)?
        };

        conn.busy_timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .map_err(connect_err)?;
        if !in_memory {
            conn.pragma_update(None, "journal_mode", "WAL").map_err(connect_err)?;
        }
        conn.set_prepared_statement_cache_capacity(config.prepared_statement_cache_size.max(1));

        tracing::debug!(designator, path, "sqlite connection established");
        Ok(Box::new(SqliteConnection {
            conn,
            designator: designator.to_string(),
            cache: PreparedStatementCache::new(config.prepared_statement_cache_size),
        }))
    }
}

pub struct SqliteConnection {
    conn: Connection,
    designator: String,
    cache: PreparedStatementCache<PreparedTemplate>,
}

/// Adapter so `ParamValue` binds through rusqlite.
struct SqlParam<'a>(&'a ParamValue);

impl ToSql for SqlParam<'_> {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        match self.0 {
            ParamValue::Integer(i) => i.to_sql(),
            ParamValue::Text(s) => s.to_sql(),
            ParamValue::Bool(b) => b.to_sql(),
            ParamValue::Float(f) => f.to_sql(),
        }
    }
}

fn value_ref_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        // Blobs render as lowercase hex.
        ValueRef::Blob(b) => {
            serde_json::Value::String(b.iter().map(|byte| format!("{byte:02x}")).collect())
        }
    }
}

fn request_params(request: &QueryRequest) -> Result<ParameterList> {
    match request.parameters_json.as_deref() {
        Some(json) => parse_typed_parameters(json),
        None => Ok(ParameterList::default()),
    }
}

impl SqliteConnection {
    fn run(&self, sql: &str, values: &[ParamValue], query_id: &str) -> Result<QueryResult> {
        let started = Instant::now();
        let mut stmt = self.conn.prepare_cached(sql).map_err(DbError::query)?;
        let bind = rusqlite::params_from_iter(values.iter().map(SqlParam));

        let mut result = QueryResult::empty(query_id);
        if stmt.column_count() == 0 {
            let affected = stmt.execute(bind).map_err(DbError::query)?;
            result.affected_rows = affected as u64;
        } else {
            let column_names: Vec<String> =
                stmt.column_names().iter().map(|name| name.to_string()).collect();
            let mut rows = stmt.query(bind).map_err(DbError::query)?;
            let mut collected = Vec::new();
            while let Some(row) = rows.next().map_err(DbError::query)? {
                let mut object = serde_json::Map::with_capacity(column_names.len());
                for (i, name) in column_names.iter().enumerate() {
                    let value = row.get_ref(i).map_err(DbError::query)?;
                    object.insert(name.clone(), value_ref_to_json(value));
                }
                collected.push(serde_json::Value::Object(object));
            }
            result.row_count = collected.len();
            result.rows = collected;
            result.column_names = column_names;
        }

        result.execution_time_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }
}

impl EngineConnection for SqliteConnection {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn designator(&self) -> &str {
        &self.designator
    }

    fn health_check(&mut self) -> Result<()> {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(DbError::query)?;
        Ok(())
    }

    fn execute(&mut self, request: &QueryRequest) -> Result<QueryResult> {
        let params = request_params(request)?;
        let template = analyze_template(&request.sql_template, EngineKind::Sqlite)?;
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
        let template = analyze_template(sql, EngineKind::Sqlite)?;
        // Compile now so malformed SQL fails at prepare time, not first use.
        self.conn.prepare_cached(&template.sql).map_err(DbError::query)?;
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
        // SQLite is SERIALIZABLE by nature; READ UNCOMMITTED is the only
        // level it can actually relax to, via pragma.
        if level == IsolationLevel::ReadUncommitted {
            self.conn
                .pragma_update(None, "read_uncommitted", true)
                .map_err(DbError::query)?;
        }
        self.conn.execute_batch("BEGIN").map_err(DbError::query)
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT").map_err(DbError::query)
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK").map_err(DbError::query)
    }

    fn prepared_count(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(cache_size: usize) -> Box<dyn EngineConnection> {
        let config = ConnectionConfig {
            database: ":memory:".to_string(),
            timeout_seconds: 5,
            prepared_statement_cache_size: cache_size,
            ..ConnectionConfig::default()
        };
        SqliteEngine.connect(&config, "DQM-test-00-L").unwrap()
    }

    fn seed(conn: &mut dyn EngineConnection) {
        conn.execute(&QueryRequest::new(
            "ddl",
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY, name TEXT, balance REAL, active INTEGER)",
        ))
        .unwrap();
        let insert = QueryRequest::new(
            "seed",
            "INSERT INTO accounts (id, name, balance, active) VALUES (:id, :name, :balance, :active)",
        )
        .with_parameters(
            r#"{"INTEGER": {"id": 1, "active": 1}, "STRING": {"name": "ada"}, "FLOAT": {"balance": 12.5}}"#,
        );
        let result = conn.execute(&insert).unwrap();
        assert_eq!(result.affected_rows, 1);
    }

    #[test]
    fn executes_typed_parameters_and_shapes_rows() {
        let mut conn = connect(8);
        seed(conn.as_mut());

        let select = QueryRequest::new("q1", "SELECT id, name, balance FROM accounts WHERE id = :id")
            .with_parameters(r#"{"INTEGER": {"id": 1}}"#);
        let result = conn.execute(&select).unwrap();

        assert!(result.success);
        assert_eq!(result.row_count, 1);
        assert_eq!(result.column_names, vec!["id", "name", "balance"]);
        assert_eq!(result.rows[0]["id"], 1);
        assert_eq!(result.rows[0]["name"], "ada");
        assert_eq!(result.rows[0]["balance"], 12.5);
    }

    #[test]
    fn prepared_path_caches_and_counts_usage() {
        let mut conn = connect(8);
        seed(conn.as_mut());

        let request = QueryRequest::new("q1", "SELECT name FROM accounts WHERE id = :id")
            .with_parameters(r#"{"INTEGER": {"id": 1}}"#)
            .prepared("account_by_id");

        assert_eq!(conn.prepared_count(), 0);
        conn.execute_prepared(&request).unwrap();
        assert_eq!(conn.prepared_count(), 1);
        conn.execute_prepared(&request).unwrap();
        assert_eq!(conn.prepared_count(), 1);

        conn.unprepare("account_by_id").unwrap();
        assert_eq!(conn.prepared_count(), 0);
    }

    #[test]
    fn prepared_cache_evicts_at_capacity() {
        let mut conn = connect(2);
        conn.prepare("a", "SELECT 1").unwrap();
        conn.prepare("b", "SELECT 2").unwrap();
        conn.prepare("c", "SELECT 3").unwrap();
        assert_eq!(conn.prepared_count(), 2);
        // "a" was least recently used and must be gone.
        assert!(matches!(
            conn.unprepare("a"),
            Err(DbError::StatementMissing { .. })
        ));
    }

    #[test]
    fn prepare_rejects_malformed_sql() {
        let mut conn = connect(8);
        assert!(conn.prepare("bad", "SELEKT 1").is_err());
        assert_eq!(conn.prepared_count(), 0);
    }

    #[test]
    fn transactions_commit_and_roll_back() {
        let mut conn = connect(8);
        seed(conn.as_mut());

        conn.begin_transaction(IsolationLevel::ReadCommitted).unwrap();
        conn.execute(&QueryRequest::new("del", "DELETE FROM accounts")).unwrap();
        conn.rollback().unwrap();
        let count = conn
            .execute(&QueryRequest::new("count", "SELECT COUNT(*) AS n FROM accounts"))
            .unwrap();
        assert_eq!(count.rows[0]["n"], 1);

        conn.begin_transaction(IsolationLevel::ReadCommitted).unwrap();
        conn.execute(&QueryRequest::new("del", "DELETE FROM accounts")).unwrap();
        conn.commit().unwrap();
        let count = conn
            .execute(&QueryRequest::new("count", "SELECT COUNT(*) AS n FROM accounts"))
            .unwrap();
        assert_eq!(count.rows[0]["n"], 0);
    }

    #[test]
    fn health_check_passes_on_live_connection() {
        let mut conn = connect(8);
        conn.health_check().unwrap();
    }

    #[test]
    fn null_columns_come_back_as_json_null() {
        let mut conn = connect(8);
        conn.execute(&QueryRequest::new("ddl", "CREATE TABLE t (a TEXT)")).unwrap();
        conn.execute(&QueryRequest::new("ins", "INSERT INTO t (a) VALUES (NULL)")).unwrap();
        let result = conn.execute(&QueryRequest::new("sel", "SELECT a FROM t")).unwrap();
        assert_eq!(result.rows[0]["a"], serde_json::Value::Null);
    }
}
