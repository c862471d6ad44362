//! Cache-key generation (§4.8), grounded on
//! `original_source/semantic_layer/cache/cache_key.py`: canonical JSON of
//! the query plus schema version and security context, hashed with SHA-256.

use crate::query::ast::Query;
use crate::schema::model::Schema;
use crate::security::context::SecurityContext;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Deterministic cache key: same query + same schema generation + same
/// security context always hashes identically, regardless of incidental
/// field ordering (HashMap iteration, JSON object key order).
pub fn generate(query: &Query, schema: &Schema, security_context: Option<&SecurityContext>) -> String {
    let mut envelope = Map::new();
    envelope.insert("query".to_string(), canonicalize(serde_json::to_value(query).unwrap_or(Value::Null)));
    envelope.insert("schema_version".to_string(), Value::String(schema.version.clone()));
    envelope.insert(
        "security_context".to_string(),
        match security_context {
            Some(ctx) => canonicalize(serde_json::to_value(ctx).unwrap_or(Value::Null)),
            None => Value::Null,
        },
    );

    let canonical = serde_json::to_string(&Value::Object(envelope)).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex(&digest)[..16].to_string()
}

/// Recursively sorts object keys, and sorts array elements by their own
/// canonical string form, so structurally-equal values always serialize to
/// the same string independent of source map ordering or list order
/// (dimensions, measures, and a filter leaf's `values` are all unordered
/// for cache-key purposes).
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(map[key].clone()));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => {
            let mut canonicalized: Vec<Value> = items.into_iter().map(canonicalize).collect();
            canonicalized.sort_by(|a, b| {
                serde_json::to_string(a).unwrap_or_default().cmp(&serde_json::to_string(b).unwrap_or_default())
            });
            Value::Array(canonicalized)
        }
        other => other,
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Query;
    use crate::schema::model::Schema;

    fn schema(version: &str) -> Schema {
        Schema { version: version.to_string(), ..Default::default() }
    }

    #[test]
    fn same_query_same_version_same_key() {
        let query = Query { measures: vec!["orders.count".into()], ..Default::default() };
        let a = generate(&query, &schema("1"), None);
        let b = generate(&query, &schema("1"), None);
        assert_eq!(a, b);
    }

    #[test]
    fn schema_version_bump_changes_key() {
        let query = Query { measures: vec!["orders.count".into()], ..Default::default() };
        let a = generate(&query, &schema("1"), None);
        let b = generate(&query, &schema("2"), None);
        assert_ne!(a, b);
    }

    #[test]
    fn key_is_a_16_char_hex_prefix() {
        let query = Query { measures: vec!["orders.count".into()], ..Default::default() };
        let key = generate(&query, &schema("1"), None);
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn dimension_and_measure_order_does_not_affect_the_key() {
        let a = Query {
            dimensions: vec!["orders.status".into(), "orders.region".into()],
            measures: vec!["orders.count".into(), "orders.total".into()],
            ..Default::default()
        };
        let b = Query {
            dimensions: vec!["orders.region".into(), "orders.status".into()],
            measures: vec!["orders.total".into(), "orders.count".into()],
            ..Default::default()
        };
        assert_eq!(generate(&a, &schema("1"), None), generate(&b, &schema("1"), None));
    }

    #[test]
    fn security_context_is_part_of_the_key() {
        let query = Query { measures: vec!["orders.count".into()], ..Default::default() };
        let ctx = SecurityContext { tenant_id: Some("acme".into()), ..Default::default() };
        let a = generate(&query, &schema("1"), None);
        let b = generate(&query, &schema("1"), Some(&ctx));
        assert_ne!(a, b);
    }
}
