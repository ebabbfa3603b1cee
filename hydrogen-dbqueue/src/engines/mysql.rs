//! MySQL backend (feature `mysql`).

use std::time::Instant;

use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder, Params, Row, Value};

use hydrogen_core::engine::{EngineConnection, QueryEngine};
use hydrogen_core::error::{DbError, Result};
use hydrogen_core::params::{analyze_template, parse_typed_parameters, ParamValue, ParameterList, PreparedTemplate};
use hydrogen_core::types::{
    ConnectionConfig, EngineKind, IsolationLevel, QueryRequest, QueryResult,
};

use crate::connstring;
use crate::prepared::PreparedStatementCache;

pub struct MysqlEngine;

impl QueryEngine for MysqlEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Mysql
    }

    fn validate_connection_string(&self, raw: &str) -> bool {
        connstring::validate(EngineKind::Mysql, raw)
    }

    fn connect(
        &self,
        config: &ConnectionConfig,
        designator: &str,
    ) -> Result<Box<dyn EngineConnection>> {
        let mut builder = OptsBuilder::new()
            .ip_or_hostname(Some(config.host.clone()))
            .tcp_port(config.port)
            .db_name(Some(config.database.clone()));
        if !config.username.is_empty() {
            builder = builder.user(Some(config.username.clone()));
        }
        if !config.password.is_empty() {
            builder = builder.pass(Some(config.password.clone()));
        }

        let conn = Conn::new(Opts::from(builder)).map_err(|e| DbError::Connect {
            engine: EngineKind::Mysql.as_str().to_string(),
            message: e.to_string(),
        })?;

        tracing::debug!(designator, host = %config.host, database = %config.database,
            "mysql connection established");
        Ok(Box::new(MysqlConnection {
            conn,
            designator: designator.to_string(),
            cache: PreparedStatementCache::new(config.prepared_statement_cache_size),
        }))
    }
}

/// Cache handle: the server-side statement plus the analysed template.
#[derive(Clone)]
struct MyStatement {
    statement: mysql::Statement,
    template: PreparedTemplate,
}

pub struct MysqlConnection {
    conn: Conn,
    designator: String,
    cache: PreparedStatementCache<MyStatement>,
}

fn to_mysql_values(values: &[ParamValue]) -> Vec<Value> {
    values
        .iter()
        .map(|value| match value {
            ParamValue::Integer(i) => Value::Int(*i),
            ParamValue::Text(s) => Value::Bytes(s.clone().into_bytes()),
            // MySQL has no wire-level boolean; TINYINT(1) convention.
            ParamValue::Bool(b) => Value::Int(i64::from(*b)),
            ParamValue::Float(f) => Value::Double(*f),
        })
        .collect()
}

fn mysql_value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::NULL => serde_json::Value::Null,
        Value::Int(i) => serde_json::Value::from(*i),
        Value::UInt(u) => serde_json::Value::from(*u),
        Value::Float(f) => serde_json::Number::from_f64(f64::from(*f))
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Double(d) => serde_json::Number::from_f64(*d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Bytes(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
        Value::Date(y, m, d, hh, mm, ss, us) => serde_json::Value::String(format!(
            "{y:04}-{m:02}-{d:02} {hh:02}:{mm:02}:{ss:02}.{us:06}"
        )),
        Value::Time(neg, d, hh, mm, ss, us) => {
            let sign = if *neg { "-" } else { "" };
            let hours = u32::from(*hh) + *d * 24;
            serde_json::Value::String(format!("{sign}{hours:02}:{mm:02}:{ss:02}.{us:06}"))
        }
    }
}

fn rows_to_result(rows: Vec<Row>, affected: u64, query_id: &str) -> QueryResult {
    let mut result = QueryResult::empty(query_id);
    result.affected_rows = affected;
    if let Some(first) = rows.first() {
        result.column_names = first
            .columns_ref()
            .iter()
            .map(|column| column.name_str().into_owned())
            .collect();
    }
    result.rows = rows
        .iter()
        .map(|row| {
            let mut object = serde_json::Map::with_capacity(result.column_names.len());
            for (i, name) in result.column_names.iter().enumerate() {
                let value = row.as_ref(i).unwrap_or(&Value::NULL);
                object.insert(name.clone(), mysql_value_to_json(value));
            }
            serde_json::Value::Object(object)
        })
        .collect();
    result.row_count = result.rows.len();
    result
}

fn request_params(request: &QueryRequest) -> Result<ParameterList> {
    match request.parameters_json.as_deref() {
        Some(json) => parse_typed_parameters(json),
        None => Ok(ParameterList::default()),
    }
}

fn bind(values: Vec<Value>) -> Params {
    if values.is_empty() {
        Params::Empty
    } else {
        Params::Positional(values)
    }
}

impl EngineConnection for MysqlConnection {
    fn kind(&self) -> EngineKind {
        EngineKind::Mysql
    }

    fn designator(&self) -> &str {
        &self.designator
    }

    fn health_check(&mut self) -> Result<()> {
        self.conn.query_drop("SELECT 1").map_err(DbError::query)
    }

    fn execute(&mut self, request: &QueryRequest) -> Result<QueryResult> {
        let params = request_params(request)?;
        let template = analyze_template(&request.sql_template, EngineKind::Mysql)?;
        let values = template.bind_values(&params)?;

        let started = Instant::now();
        let rows: Vec<Row> = self
            .conn
            .exec(template.sql.as_str(), bind(to_mysql_values(&values)))
            .map_err(DbError::query)?;
        let mut result = rows_to_result(rows, self.conn.affected_rows(), &request.query_id);
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    fn execute_prepared(&mut self, request: &QueryRequest) -> Result<QueryResult> {
        let name = request
            .prepared_statement_name
            .as_deref()
            .ok_or_else(|| DbError::param("prepared execution requires a statement name"))?;

        if !self.cache.contains(name) {
            self.prepare(name, &request.sql_template)?;
        }
        let handle = self
            .cache
            .touch(name)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| DbError::StatementMissing { name: name.to_string() })?;

        let params = request_params(request)?;
        let values = handle.template.bind_values(&params)?;

        let started = Instant::now();
        let rows: Vec<Row> = self
            .conn
            .exec(&handle.statement, bind(to_mysql_values(&values)))
            .map_err(DbError::query)?;
        let mut result = rows_to_result(rows, self.conn.affected_rows(), &request.query_id);
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    fn prepare(&mut self, name: &str, sql: &str) -> Result<()> {
        let template = analyze_template(sql, EngineKind::Mysql)?;
        let statement = self.conn.prep(&template.sql).map_err(DbError::query)?;
        for displaced in self.cache.insert(name, sql, MyStatement { statement, template }) {
            // Close the server-side statement eagerly.
            let _ = self.conn.close(displaced.statement);
        }
        Ok(())
    }

    fn unprepare(&mut self, name: &str) -> Result<()> {
        let handle = self
            .cache
            .remove(name)
            .ok_or_else(|| DbError::StatementMissing { name: name.to_string() })?;
        self.conn.close(handle.statement).map_err(DbError::query)
    }

    fn begin_transaction(&mut self, level: IsolationLevel) -> Result<()> {
        self.conn
            .query_drop(format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()))
            .map_err(DbError::query)?;
        self.conn.query_drop("START TRANSACTION").map_err(DbError::query)
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.query_drop("COMMIT").map_err(DbError::query)
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.query_drop("ROLLBACK").map_err(DbError::query)
    }

    fn prepared_count(&self) -> usize {
        self.cache.len()
    }
}
