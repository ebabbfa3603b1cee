//! Query signatures — the identity used to deduplicate concurrent requests.
//!
//! Two submissions with the same signature while one is in flight share a
//! single execution. The signature covers the database name, the SQL
//! template, and the canonicalised parameter JSON, so the same query with
//! different parameters never collides.

use xxhash_rust::xxh3::Xxh3;

/// A 64-bit query signature, rendered as 16 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuerySignature(u64);

impl QuerySignature {
    /// Compute the signature for a submission.
    ///
    /// Parameter JSON is canonicalised by parsing and re-serialising it
    /// (object keys come out sorted), so field order in the wire form does
    /// not change identity. JSON that fails to parse is hashed verbatim —
    /// the submission will fail parameter validation later anyway, and an
    /// unparseable duplicate should still dedup against itself.
    pub fn compute(database: &str, sql_template: &str, parameters_json: Option<&str>) -> Self {
        let mut hasher = Xxh3::new();
        hasher.update(database.as_bytes());
        hasher.update(&[0]);
        hasher.update(sql_template.as_bytes());
        hasher.update(&[0]);
        if let Some(json) = parameters_json {
            match serde_json::from_str::<serde_json::Value>(json) {
                Ok(value) => hasher.update(value.to_string().as_bytes()),
                Err(_) => hasher.update(json.as_bytes()),
            }
        }
        Self(hasher.digest())
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_submissions_collide() {
        let a = QuerySignature::compute("main", "SELECT :id", Some(r#"{"INTEGER":{"id":1}}"#));
        let b = QuerySignature::compute("main", "SELECT :id", Some(r#"{"INTEGER":{"id":1}}"#));
        assert_eq!(a, b);
    }

    #[test]
    fn parameter_order_does_not_change_identity() {
        let a = QuerySignature::compute(
            "main",
            "SELECT :a, :b",
            Some(r#"{"INTEGER":{"a":1,"b":2}}"#),
        );
        let b = QuerySignature::compute(
            "main",
            "SELECT :a, :b",
            Some(r#"{"INTEGER":{"b":2,"a":1}}"#),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn different_parameters_do_not_collide() {
        let a = QuerySignature::compute("main", "SELECT :id", Some(r#"{"INTEGER":{"id":1}}"#));
        let b = QuerySignature::compute("main", "SELECT :id", Some(r#"{"INTEGER":{"id":2}}"#));
        assert_ne!(a, b);
    }

    #[test]
    fn different_databases_do_not_collide() {
        let a = QuerySignature::compute("main", "SELECT 1", None);
        let b = QuerySignature::compute("audit", "SELECT 1", None);
        assert_ne!(a, b);
    }

    #[test]
    fn renders_as_sixteen_hex_digits() {
        let sig = QuerySignature::compute("main", "SELECT 1", None);
        assert_eq!(sig.to_string().len(), 16);
    }
}
