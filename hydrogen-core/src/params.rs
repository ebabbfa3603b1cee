//! Typed query parameters.
//!
//! Parameters arrive as JSON grouped under type keys:
//!
//! ```json
//! {"INTEGER": {"id": 42}, "STRING": {"name": "x"}, "BOOLEAN": {"on": true}, "FLOAT": {"ratio": 0.5}}
//! ```
//!
//! SQL templates use `:name` placeholders; [`convert_named_to_positional`]
//! rewrites them to the engine's positional style (`$1…$n` for PostgreSQL,
//! `?` elsewhere) and returns the bind values in occurrence order.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{DbError, Result};
use crate::types::EngineKind;

/// Longest accepted placeholder name.
const MAX_PARAM_NAME_LEN: usize = 64;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":[A-Za-z_][A-Za-z0-9_]*").unwrap());

/// A single typed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Integer(i64),
    Text(String),
    Bool(bool),
    Float(f64),
}

impl ParamValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "INTEGER",
            Self::Text(_) => "STRING",
            Self::Bool(_) => "BOOLEAN",
            Self::Float(_) => "FLOAT",
        }
    }
}

/// Named parameters for one query, parsed from the typed JSON form.
#[derive(Debug, Clone, Default)]
pub struct ParameterList {
    values: HashMap<String, ParamValue>,
}

impl ParameterList {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    #[cfg(test)]
    pub(crate) fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }
}

/// Parse the typed JSON parameter form into a [`ParameterList`].
///
/// The top level must be an object. Sections other than the four type keys
/// are ignored. A value whose JSON type does not match its section is an
/// error, except that JSON integers are accepted under FLOAT.
pub fn parse_typed_parameters(json_params: &str) -> Result<ParameterList> {
    let root: serde_json::Value = serde_json::from_str(json_params)
        .map_err(|e| DbError::param(format!("parameter JSON did not parse: {e}")))?;

    let root = root
        .as_object()
        .ok_or_else(|| DbError::param("parameters must be a JSON object"))?;

    let mut values = HashMap::new();
    for section in ["INTEGER", "STRING", "BOOLEAN", "FLOAT"] {
        let Some(entries) = root.get(section) else {
            continue;
        };
        let entries = entries.as_object().ok_or_else(|| {
            DbError::param(format!("{section} section must be a JSON object"))
        })?;

        for (name, value) in entries {
            if name.len() > MAX_PARAM_NAME_LEN {
                return Err(DbError::param(format!("parameter name too long: {name}")));
            }
            let typed = match section {
                "INTEGER" => value.as_i64().map(ParamValue::Integer),
                "STRING" => value.as_str().map(|s| ParamValue::Text(s.to_string())),
                "BOOLEAN" => value.as_bool().map(ParamValue::Bool),
                // Integers widen to floats; everything else must be a real.
                "FLOAT" => value.as_f64().map(ParamValue::Float),
                _ => unreachable!(),
            }
            .ok_or_else(|| {
                DbError::param(format!("parameter {name} is not a valid {section} value"))
            })?;
            values.insert(name.clone(), typed);
        }
    }

    Ok(ParameterList { values })
}

/// A template analysed once: placeholders rewritten for an engine dialect,
/// with the placeholder names kept in occurrence order so the same template
/// can be bound repeatedly (the prepared-statement path).
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTemplate {
    /// SQL with positional placeholders (`$1…$n` or `?`).
    pub sql: String,
    /// Placeholder names, one per occurrence, in template order.
    pub placeholder_names: Vec<String>,
}

impl PreparedTemplate {
    /// Resolve bind values for one execution, in occurrence order.
    pub fn bind_values(&self, params: &ParameterList) -> Result<Vec<ParamValue>> {
        self.placeholder_names
            .iter()
            .map(|name| {
                params
                    .get(name)
                    .cloned()
                    .ok_or_else(|| DbError::UnknownPlaceholder { name: name.clone() })
            })
            .collect()
    }
}

/// Rewrite a template's `:name` placeholders to the engine's positional
/// style without resolving values.
///
/// Each occurrence consumes a position, so a name used twice binds twice.
/// `::` (SQL cast syntax) is never treated as a placeholder.
pub fn analyze_template(sql_template: &str, engine: EngineKind) -> Result<PreparedTemplate> {
    let mut sql = String::with_capacity(sql_template.len());
    let mut names = Vec::new();
    let mut cursor = 0;

    for m in PLACEHOLDER.find_iter(sql_template) {
        // `foo::text` — the match starts at the second colon of a cast.
        if m.start() > 0 && sql_template.as_bytes()[m.start() - 1] == b':' {
            continue;
        }

        let name = &m.as_str()[1..];
        if name.len() > MAX_PARAM_NAME_LEN {
            return Err(DbError::param(format!("placeholder name too long: {name}")));
        }

        sql.push_str(&sql_template[cursor..m.start()]);
        if engine.uses_numbered_placeholders() {
            sql.push('$');
            sql.push_str(&(names.len() + 1).to_string());
        } else {
            sql.push('?');
        }
        names.push(name.to_string());
        cursor = m.end();
    }

    sql.push_str(&sql_template[cursor..]);
    Ok(PreparedTemplate { sql, placeholder_names: names })
}

/// Rewrite `:name` placeholders to the engine's positional style.
///
/// Returns the rewritten SQL and the bind values in occurrence order. A
/// placeholder with no matching parameter is an error; parameters the
/// template never uses are tolerated.
pub fn convert_named_to_positional(
    sql_template: &str,
    params: &ParameterList,
    engine: EngineKind,
) -> Result<(String, Vec<ParamValue>)> {
    let template = analyze_template(sql_template, engine)?;
    let values = template.bind_values(params)?;
    Ok((template.sql, values))
}
