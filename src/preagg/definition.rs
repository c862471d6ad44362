//! Pre-aggregation (rollup) definitions (§4.9), re-exporting the schema
//! model type and adding the computed rollup table name.

pub use crate::schema::model::{PreAggregationSpec, RefreshKey};

/// Deterministic rollup table name for a cube's pre-aggregation, grounded
/// on `original_source/semantic_layer/preagg/definition.py::table_name`:
/// `<storage_schema>.<cube>_<preagg_name>_rollup`.
pub fn table_name(storage_schema: &str, cube_name: &str, preagg: &PreAggregationSpec) -> String {
    format!("{storage_schema}.{cube_name}_{}_rollup", preagg.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_qualified_table_name() {
        let spec = PreAggregationSpec {
            name: "daily".into(),
            dimensions: vec![],
            measures: vec![],
            time_dimension: None,
            granularity: None,
            refresh_key: RefreshKey::default(),
        };
        assert_eq!(table_name("rollups", "orders", &spec), "rollups.orders_daily_rollup");
    }
}
