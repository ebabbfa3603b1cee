//! PostgreSQL backend (feature `postgres`).
//!
//! Server-side prepared statements are first-class here: the cache handle is
//! the `postgres::Statement` itself, so eviction drops the server-side
//! statement when the handle goes.

use std::time::{Duration, Instant};

use postgres::types::{ToSql, Type};
use postgres::{Client, NoTls, Row};

use hydrogen_core::engine::{EngineConnection, QueryEngine};
use hydrogen_core::error::{DbError, Result};
use hydrogen_core::params::{analyze_template, parse_typed_parameters, ParamValue, ParameterList, PreparedTemplate};
use hydrogen_core::types::{
    ConnectionConfig, EngineKind, IsolationLevel, QueryRequest, QueryResult,
};

use crate::connstring;
use crate::prepared::PreparedStatementCache;

pub struct PostgresEngine;

impl QueryEngine for PostgresEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Postgres
    }

    fn validate_connection_string(&self, raw: &str) -> bool {
        connstring::validate(EngineKind::Postgres, raw)
    }

    fn connect(
        &self,
        config: &ConnectionConfig,
        designator: &str,
    ) -> Result<Box<dyn EngineConnection>> {
        let mut pg = postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .connect_timeout(Duration::from_secs(config.timeout_seconds.max(1)));
        if !config.username.is_empty() {
            pg.user(&config.username);
        }
        if !config.password.is_empty() {
            pg.password(&config.password);
        }

        let client = pg.connect(NoTls).map_err(|e| DbError::Connect {
            engine: EngineKind::Postgres.as_str().to_string(),
            message: e.to_string(),
        })?;

        tracing::debug!(designator, host = %config.host, database = %config.database,
            "postgresql connection established");
        Ok(Box::new(PostgresConnection {
            client,
            designator: designator.to_string(),
            cache: PreparedStatementCache::new(config.prepared_statement_cache_size),
        }))
    }
}

/// Cache handle: the server-side statement plus the analysed template.
#[derive(Clone)]
struct PgStatement {
    statement: postgres::Statement,
    template: PreparedTemplate,
}

pub struct PostgresConnection {
    client: Client,
    designator: String,
    cache: PreparedStatementCache<PgStatement>,
}

fn boxed_params(values: &[ParamValue]) -> Vec<Box<dyn ToSql + Sync>> {
    values
        .iter()
        .map(|value| match value {
            ParamValue::Integer(i) => Box::new(*i) as Box<dyn ToSql + Sync>,
            ParamValue::Text(s) => Box::new(s.clone()),
            ParamValue::Bool(b) => Box::new(*b),
            ParamValue::Float(f) => Box::new(*f),
        })
        .collect()
}

fn row_value_to_json(row: &Row, i: usize) -> serde_json::Value {
    let ty = row.columns()[i].type_();
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(i).ok().flatten().map(serde_json::Value::from)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(i).ok().flatten().map(|v| serde_json::Value::from(i64::from(v)))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(i).ok().flatten().map(|v| serde_json::Value::from(i64::from(v)))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(i).ok().flatten().map(serde_json::Value::from)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(i)
            .ok()
            .flatten()
            .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
            .map(serde_json::Value::Number)
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(i)
            .ok()
            .flatten()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
    } else {
        // Everything else comes back in its text form.
        row.try_get::<_, Option<String>>(i).ok().flatten().map(serde_json::Value::String)
    };
    value.unwrap_or(serde_json::Value::Null)
}

fn request_params(request: &QueryRequest) -> Result<ParameterList> {
    match request.parameters_json.as_deref() {
        Some(json) => parse_typed_parameters(json),
        None => Ok(ParameterList::default()),
    }
}

impl PostgresConnection {
    fn run(
        &mut self,
        statement: &postgres::Statement,
        values: &[ParamValue],
        query_id: &str,
    ) -> Result<QueryResult> {
        let started = Instant::now();
        let owned = boxed_params(values);
        let params: Vec<&(dyn ToSql + Sync)> = owned.iter().map(AsRef::as_ref).collect();

        let mut result = QueryResult::empty(query_id);
        if statement.columns().is_empty() {
            result.affected_rows =
                self.client.execute(statement, &params).map_err(DbError::query)?;
        } else {
            let column_names: Vec<String> =
                statement.columns().iter().map(|c| c.name().to_string()).collect();
            let rows = self.client.query(statement, &params).map_err(DbError::query)?;
            result.rows = rows
                .iter()
                .map(|row| {
                    let mut object = serde_json::Map::with_capacity(column_names.len());
                    for (i, name) in column_names.iter().enumerate() {
                        object.insert(name.clone(), row_value_to_json(row, i));
                    }
                    serde_json::Value::Object(object)
                })
                .collect();
            result.row_count = result.rows.len();
            result.column_names = column_names;
        }

        result.execution_time_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }
}

impl EngineConnection for PostgresConnection {
    fn kind(&self) -> EngineKind {
        EngineKind::Postgres
    }

    fn designator(&self) -> &str {
        &self.designator
    }

    fn health_check(&mut self) -> Result<()> {
        if self.client.is_closed() {
            return Err(DbError::query("connection closed"));
        }
        self.client.simple_query("SELECT 1").map_err(DbError::query)?;
        Ok(())
    }

    fn execute(&mut self, request: &QueryRequest) -> Result<QueryResult> {
        let params = request_params(request)?;
        let template = analyze_template(&request.sql_template, EngineKind::Postgres)?;
        let values = template.bind_values(&params)?;
        let statement = self.client.prepare(&template.sql).map_err(DbError::query)?;
        self.run(&statement, &values, &request.query_id)
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
        self.run(&handle.statement, &values, &request.query_id)
    }

    fn prepare(&mut self, name: &str, sql: &str) -> Result<()> {
        let template = analyze_template(sql, EngineKind::Postgres)?;
        let statement = self.client.prepare(&template.sql).map_err(DbError::query)?;
        // Displaced handles drop here, which deallocates them server-side.
        self.cache.insert(name, sql, PgStatement { statement, template });
        Ok(())
    }

    fn unprepare(&mut self, name: &str) -> Result<()> {
        self.cache
            .remove(name)
            .ok_or_else(|| DbError::StatementMissing { name: name.to_string() })?;
        Ok(())
    }

    fn begin_transaction(&mut self, level: IsolationLevel) -> Result<()> {
        self.client
            .batch_execute(&format!("BEGIN ISOLATION LEVEL {}", level.as_sql()))
            .map_err(DbError::query)
    }

    fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").map_err(DbError::query)
    }

    fn rollback(&mut self) -> Result<()> {
        self.client.batch_execute("ROLLBACK").map_err(DbError::query)
    }

    fn prepared_count(&self) -> usize {
        self.cache.len()
    }
}
