//! Result-row formatting (§4.10 tail), grounded on
//! `original_source/semantic_layer/orchestrator/formatter.py`. Converts
//! backend-native driver rows into JSON-safe values; column names pass
//! through unchanged since they are already the builder's chosen aliases.

use crate::driver::Row;
use serde_json::Value;

pub fn format_rows(rows: Vec<Row>) -> Vec<serde_json::Map<String, Value>> {
    rows.into_iter().map(format_row).collect()
}

fn format_row(row: Row) -> serde_json::Map<String, Value> {
    row.into_iter().map(|(k, v)| (k, format_value(v))).collect()
}

/// A concrete `Driver` is responsible for the backend-native -> JSON-safe
/// conversion named in §4.10 (arbitrary-precision numerics to `double`,
/// dates/datetimes to ISO-8601 strings, byte strings to UTF-8 lossily)
/// before a row ever reaches this boundary, since `Row` is already
/// `HashMap<String, serde_json::Value>`. This is therefore an identity
/// pass today, kept as its own function so a future structural
/// normalization (e.g. null handling) has a single place to live.
fn format_value(value: Value) -> Value {
    value
}
