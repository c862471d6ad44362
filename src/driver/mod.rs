//! Driver trait (§4.9 / GLOSSARY "Driver"): pluggable SQL execution
//! backend, grounded on `original_source/semantic_layer/drivers/base.py`
//! and the teacher's `async_trait` pattern for swappable collaborators.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("query execution failed: {0}")]
    Query(String),
    #[error("query timed out after {0}ms")]
    Timeout(u64),
}

/// One result row: column name -> value, using `serde_json::Value` as the
/// wire-agnostic row representation (§4.10 result formatting consumes this
/// directly).
pub type Row = HashMap<String, Value>;

#[async_trait]
pub trait Driver: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>, DriverError>;

    /// Driver identifier used in logs and response metadata.
    fn name(&self) -> &str;
}

/// In-process test double that returns a fixed row set regardless of the
/// SQL text, used by orchestrator and integration tests.
pub struct FixtureDriver {
    rows: Vec<Row>,
}

impl FixtureDriver {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self { rows: Vec::new() }
    }
}

#[async_trait]
impl Driver for FixtureDriver {
    async fn execute(&self, _sql: &str) -> Result<Vec<Row>, DriverError> {
        Ok(self.rows.clone())
    }

    fn name(&self) -> &str {
        "fixture"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fixture_driver_returns_configured_rows() {
        let mut row = HashMap::new();
        row.insert("orders_count".to_string(), json!(42));
        let driver = FixtureDriver::new(vec![row]);
        let rows = driver.execute("SELECT 1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("orders_count"), Some(&json!(42)));
    }
}
