//! Query template cache, seeded by the Lead's bootstrap query.
//!
//! Callers can submit by query reference instead of shipping SQL; the Lead
//! seeds the cache from bootstrap rows carrying `query_ref` and
//! `query_template` columns. Shared across a database's queues — the handle
//! is a cheap clone.

use std::sync::Arc;

use moka::sync::Cache;

/// One cached template.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTemplate {
    pub query_ref: String,
    pub sql_template: String,
}

/// Bounded in-memory cache of SQL templates keyed by query reference.
#[derive(Clone)]
pub struct TemplateCache {
    inner: Cache<String, Arc<QueryTemplate>>,
}

impl TemplateCache {
    pub fn new(capacity: u64) -> Self {
        Self { inner: Cache::new(capacity) }
    }

    pub fn insert(&self, query_ref: impl Into<String>, sql_template: impl Into<String>) {
        let query_ref = query_ref.into();
        let template = Arc::new(QueryTemplate {
            query_ref: query_ref.clone(),
            sql_template: sql_template.into(),
        });
        self.inner.insert(query_ref, template);
    }

    pub fn get(&self, query_ref: &str) -> Option<Arc<QueryTemplate>> {
        self.inner.get(query_ref)
    }

    /// Seed from bootstrap rows. Each row is a JSON object; rows without a
    /// usable `query_ref`/`query_template` pair are skipped. Returns how
    /// many templates were stored.
    pub fn seed_from_rows(&self, rows: &[serde_json::Value]) -> usize {
        let mut seeded = 0;
        for row in rows {
            let Some(object) = row.as_object() else { continue };
            let query_ref = match object.get("query_ref") {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                _ => continue,
            };
            let Some(sql_template) = object.get("query_template").and_then(|v| v.as_str()) else {
                continue;
            };
            self.insert(query_ref, sql_template);
            seeded += 1;
        }
        if seeded > 0 {
            tracing::debug!(seeded, "template cache seeded from bootstrap rows");
        }
        seeded
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_and_lookup() {
        let cache = TemplateCache::new(16);
        cache.insert("1000", "SELECT * FROM accounts WHERE id = :id");
        let template = cache.get("1000").unwrap();
        assert_eq!(template.sql_template, "SELECT * FROM accounts WHERE id = :id");
        assert!(cache.get("2000").is_none());
    }

    #[test]
    fn seeds_from_bootstrap_rows() {
        let cache = TemplateCache::new(16);
        let rows = vec![
            json!({"query_ref": 1000, "query_template": "SELECT 1"}),
            json!({"query_ref": "1001", "query_template": "SELECT 2"}),
            json!({"query_ref": 1002}),              // no template — skipped
            json!({"query_template": "SELECT 3"}),   // no ref — skipped
            json!("not an object"),
        ];
        assert_eq!(cache.seed_from_rows(&rows), 2);
        assert_eq!(cache.get("1000").unwrap().sql_template, "SELECT 1");
        assert_eq!(cache.get("1001").unwrap().sql_template, "SELECT 2");
        assert_eq!(cache.entry_count(), 2);
    }

    #[test]
    fn reseeding_overwrites() {
        let cache = TemplateCache::new(16);
        cache.insert("1000", "SELECT 1");
        cache.insert("1000", "SELECT 99");
        assert_eq!(cache.get("1000").unwrap().sql_template, "SELECT 99");
    }
}
