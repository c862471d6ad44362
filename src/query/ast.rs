//! Query request AST per §3 / §6. Grounded on
//! `original_source/semantic_layer/query/query.py`: `LogicalFilter` (`or`/
//! `and`, exactly one set), `QueryFilter` (`member`/`dimension` alias),
//! `Query` with dimensions/measures/filters/measure_filters/time_dimensions/
//! order_by/limit/offset/ctes.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    String(String),
    Number(f64),
    Bool(bool),
}

impl std::fmt::Display for FilterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterValue::String(s) => write!(f, "{s}"),
            FilterValue::Number(n) => write!(f, "{n}"),
            FilterValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl FilterValue {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FilterValue::Number(_))
    }

    /// Best-effort numeric parse of a string value, used when a dimension is
    /// numeric but the filter literal arrived as a string.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FilterValue::Number(n) => Some(*n),
            FilterValue::String(s) => s.parse().ok(),
            FilterValue::Bool(_) => None,
        }
    }
}

impl<'de> Deserialize<'de> for FilterValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) => Ok(FilterValue::String(s)),
            serde_json::Value::Number(n) => Ok(FilterValue::Number(n.as_f64().unwrap_or(0.0))),
            serde_json::Value::Bool(b) => Ok(FilterValue::Bool(b)),
            other => Err(D::Error::custom(format!("unsupported filter value: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalKind {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Leaf {
        member: String,
        operator: String,
        values: Vec<FilterValue>,
    },
    Logical {
        kind: LogicalKind,
        children: Vec<Filter>,
    },
}

impl Filter {
    /// Every `cube` name referenced by this filter tree, recursively.
    pub fn referenced_cubes(&self) -> Vec<String> {
        let mut cubes = Vec::new();
        self.collect_cubes(&mut cubes);
        cubes
    }

    fn collect_cubes(&self, out: &mut Vec<String>) {
        match self {
            Filter::Leaf { member, .. } => {
                if let Some((cube, _)) = member.split_once('.') {
                    out.push(cube.to_string());
                }
            }
            Filter::Logical { children, .. } => {
                for child in children {
                    child.collect_cubes(out);
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFilter {
    member: Option<String>,
    dimension: Option<String>,
    operator: Option<String>,
    #[serde(default)]
    values: Vec<FilterValue>,
    #[serde(rename = "or")]
    or_children: Option<Vec<Filter>>,
    #[serde(rename = "and")]
    and_children: Option<Vec<Filter>>,
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawFilter::deserialize(deserializer)?;
        match (raw.or_children, raw.and_children) {
            (Some(_), Some(_)) => Err(D::Error::custom(
                "logical filter must set exactly one of 'or'/'and', got both",
            )),
            (Some(children), None) => Ok(Filter::Logical { kind: LogicalKind::Or, children }),
            (None, Some(children)) => Ok(Filter::Logical { kind: LogicalKind::And, children }),
            (None, None) => {
                let member = raw
                    .member
                    .or(raw.dimension)
                    .ok_or_else(|| D::Error::custom("leaf filter requires 'member' or 'dimension'"))?;
                let operator = raw
                    .operator
                    .ok_or_else(|| D::Error::custom("leaf filter requires 'operator'"))?;
                Ok(Filter::Leaf { member, operator, values: raw.values })
            }
        }
    }
}

impl Serialize for Filter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        match self {
            Filter::Leaf { member, operator, values } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("member", member)?;
                map.serialize_entry("operator", operator)?;
                map.serialize_entry("values", values)?;
                map.end()
            }
            Filter::Logical { kind, children } => {
                let mut map = serializer.serialize_map(Some(1))?;
                let key = match kind {
                    LogicalKind::And => "and",
                    LogicalKind::Or => "or",
                };
                map.serialize_entry(key, children)?;
                map.end()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeDimension {
    pub dimension: String,
    #[serde(default)]
    pub granularity: Option<String>,
    #[serde(default, rename = "dateRange")]
    pub date_range: Option<Vec<String>>,
    #[serde(default, rename = "compareDateRange")]
    pub compare_date_range: Option<Vec<Vec<String>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBy {
    pub dimension: String,
    #[serde(default = "default_direction")]
    pub direction: OrderDirection,
}

fn default_direction() -> OrderDirection {
    OrderDirection::Asc
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cte {
    pub alias: String,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Query {
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub measures: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default, rename = "measureFilters")]
    pub measure_filters: Vec<Filter>,
    #[serde(default, rename = "timeDimensions")]
    pub time_dimensions: Vec<TimeDimension>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub ctes: Vec<Cte>,
}

impl Query {
    /// §7 QueryError checks performed before any backend work.
    pub fn validate(&self) -> Result<(), crate::error::QueryError> {
        let has_granularity = self
            .time_dimensions
            .iter()
            .any(|td| td.granularity.is_some());
        if self.dimensions.is_empty() && self.measures.is_empty() && !has_granularity {
            return Err(crate::error::QueryError::EmptyRequest);
        }
        let compare_count = self
            .time_dimensions
            .iter()
            .filter(|td| td.compare_date_range.is_some())
            .count();
        if compare_count > 1 {
            return Err(crate::error::QueryError::MultipleCompareDateRanges);
        }
        Ok(())
    }

    /// Every cube referenced anywhere in the request: measures, dimensions,
    /// filters (recursively), time dimensions, order_by. Grounded on
    /// `sql/builder.py::_get_required_cubes`, which collects into a `Set` with
    /// no ordering guarantee; measures are pushed first so the fact-table
    /// cube (the one carrying the aggregated measure) wins primary-cube
    /// selection when a dimension pulls in a joined-in cube, matching the
    /// two-hop join scenario.
    pub fn required_cubes(&self) -> Vec<String> {
        let mut cubes = Vec::new();
        let mut push = |member: &str| {
            if let Some((cube, _)) = member.split_once('.') {
                if !cubes.contains(&cube.to_string()) {
                    cubes.push(cube.to_string());
                }
            }
        };
        for m in &self.measures {
            push(m);
        }
        for d in &self.dimensions {
            push(d);
        }
        for f in self.filters.iter().chain(self.measure_filters.iter()) {
            for cube in f.referenced_cubes() {
                if !cubes.contains(&cube) {
                    cubes.push(cube);
                }
            }
        }
        for td in &self.time_dimensions {
            push(&td.dimension);
        }
        for o in &self.order_by {
            push(&o.dimension);
        }
        cubes
    }
}
