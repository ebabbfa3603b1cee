//! Engine implementations and the build-time registry.

pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "db2")]
pub mod db2;

use hydrogen_core::engine::{EngineConnection, QueryEngine};
use hydrogen_core::error::{DbError, Result};
use hydrogen_core::types::{ConnectionConfig, EngineKind};

/// The engines available in this build.
pub struct EngineRegistry {
    engines: Vec<Box<dyn QueryEngine>>,
}

impl EngineRegistry {
    /// Register every engine compiled into this build.
    pub fn builtin() -> Self {
        #[allow(unused_mut)]
        let mut engines: Vec<Box<dyn QueryEngine>> = vec![Box::new(sqlite::SqliteEngine)];
        #[cfg(feature = "postgres")]
        engines.push(Box::new(postgres::PostgresEngine));
        #[cfg(feature = "mysql")]
        engines.push(Box::new(mysql::MysqlEngine));
        #[cfg(feature = "db2")]
        engines.push(Box::new(db2::Db2Engine));
        Self { engines }
    }

    pub fn get(&self, kind: EngineKind) -> Result<&dyn QueryEngine> {
        self.engines
            .iter()
            .find(|engine| engine.kind() == kind)
            .map(|engine| &**engine)
            .ok_or_else(|| DbError::UnsupportedEngine { name: kind.as_str().to_string() })
    }

    pub fn get_by_name(&self, name: &str) -> Result<&dyn QueryEngine> {
        let kind = EngineKind::parse(name)
            .ok_or_else(|| DbError::UnsupportedEngine { name: name.to_string() })?;
        self.get(kind)
    }

    pub fn connect(
        &self,
        kind: EngineKind,
        config: &ConnectionConfig,
        designator: &str,
    ) -> Result<Box<dyn EngineConnection>> {
        self.get(kind)?.connect(config, designator)
    }

    pub fn supported(&self) -> Vec<EngineKind> {
        self.engines.iter().map(|engine| engine.kind()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_is_always_registered() {
        let registry = EngineRegistry::builtin();
        assert!(registry.get(EngineKind::Sqlite).is_ok());
        assert!(registry.supported().contains(&EngineKind::Sqlite));
    }

    #[test]
    fn unknown_engine_name_is_unsupported() {
        let registry = EngineRegistry::builtin();
        let err = match registry.get_by_name("oracle") {
            Ok(_) => panic!("expected unsupported engine error"),
            Err(e) => e,
        };
        assert!(matches!(err, DbError::UnsupportedEngine { name } if name == "oracle"));
    }

    #[cfg(not(feature = "db2"))]
    #[test]
    fn uncompiled_engines_are_unsupported() {
        let registry = EngineRegistry::builtin();
        assert!(matches!(
            registry.get(EngineKind::Db2),
            Err(DbError::UnsupportedEngine { .. })
        ));
    }
}
