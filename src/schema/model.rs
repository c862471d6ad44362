//! Typed schema entities: §3 Cube/Dimension/Measure/Relationship.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionType {
    String,
    Number,
    Time,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MeasureType {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
    Number,
    Calculated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    BelongsTo,
    HasOne,
    HasMany,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dimension {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default = "default_dimension_type")]
    pub kind: DimensionType,
    /// Bare `sql` fragment, prefixed with the cube alias at render time.
    #[serde(default)]
    pub sql: Option<String>,
    /// Full computed expression; `{CUBE}` is replaced with the table alias.
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
    /// Granularities this time dimension permits. Empty means "any".
    #[serde(default)]
    pub granularities: Vec<String>,
}

fn default_dimension_type() -> DimensionType {
    DimensionType::String
}

impl Dimension {
    pub fn has_expression(&self) -> bool {
        self.sql.is_some() || self.expression.is_some()
    }

    /// §9 Dimension expression resolution, grounded on
    /// `models/dimension.py::get_sql_expression`: `expression` wins (with
    /// `{CUBE}` substituted), else `sql` (qualified by the alias unless it
    /// already contains a dot), else `alias.name`.
    pub fn sql_expression(&self, alias: &str) -> String {
        if let Some(expr) = &self.expression {
            return expr.replace("{CUBE}", alias);
        }
        if let Some(sql) = &self.sql {
            if sql.contains('.') || alias.is_empty() {
                return sql.clone();
            }
            return format!("{alias}.{sql}");
        }
        format!("{alias}.{}", self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measure {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MeasureType,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
    /// Formula referencing sibling measures by `cube.name`, resolved at
    /// build time rather than returned verbatim (DESIGN.md Open Question 5).
    #[serde(default)]
    pub formula: Option<String>,
}

impl Measure {
    pub fn has_expression(&self) -> bool {
        self.sql.is_some() || self.expression.is_some() || self.formula.is_some()
    }

    /// Inner (un-aggregated) SQL expression, before aggregation wrapping.
    pub fn inner_sql_expression(&self, alias: &str) -> String {
        if let Some(expr) = &self.expression {
            return expr.replace("{CUBE}", alias);
        }
        if let Some(sql) = &self.sql {
            if sql.contains('.') || alias.is_empty() {
                return sql.clone();
            }
            return format!("{alias}.{sql}");
        }
        format!("{alias}.{}", self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RelationshipKind,
    pub cube: String,
    pub foreign_key: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
}

fn default_primary_key() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Security {
    /// Row filter template using `{CUBE}` / `{USER_CONTEXT.*}` tokens.
    pub row_filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreAggregationSpec {
    pub name: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub measures: Vec<String>,
    pub time_dimension: Option<String>,
    pub granularity: Option<String>,
    #[serde(default)]
    pub refresh_key: RefreshKey,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RefreshKey {
    /// Human interval string, e.g. `"every 1 hour"` or `"1 hour"`.
    pub every: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cube {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub dimensions: HashMap<String, Dimension>,
    #[serde(default)]
    pub measures: HashMap<String, Measure>,
    #[serde(default)]
    pub relationships: HashMap<String, Relationship>,
    #[serde(default)]
    pub security: Security,
    #[serde(default)]
    pub pre_aggregations: Vec<PreAggregationSpec>,
}

impl Cube {
    /// Physical `FROM` source: the table name, or a parenthesized raw-SQL
    /// subquery when the cube is defined by `sql` instead of `table`.
    pub fn from_source(&self, table_override: Option<&str>) -> String {
        if let Some(table) = table_override {
            return table.to_string();
        }
        if let Some(table) = &self.table {
            return table.clone();
        }
        format!("({})", self.sql.as_deref().unwrap_or_default())
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.get(name)
    }

    pub fn measure(&self, name: &str) -> Option<&Measure> {
        self.measures.get(name)
    }

    pub fn primary_key_dimension(&self) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|(_, d)| d.primary_key)
            .map(|(name, _)| name.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub cubes: HashMap<String, Cube>,
    /// forward: cube -> relationship name -> relationship
    pub(crate) graph: super::graph::RelationshipGraph,
    /// Monotonic generation id, used as part of the cache key.
    pub version: String,
}

impl Schema {
    pub fn get_cube(&self, name: &str) -> Option<&Cube> {
        self.cubes.get(name)
    }

    pub fn graph(&self) -> &super::graph::RelationshipGraph {
        &self.graph
    }
}
