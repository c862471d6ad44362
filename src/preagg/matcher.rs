//! Pre-aggregation containment matching (§4.9 / GLOSSARY "Pre-aggregation"),
//! grounded on `original_source/semantic_layer/pre_aggregations/manager.py`.
//!
//! A request matches a pre-aggregation iff its cube, dimensions, measures,
//! and time-granularity are fully contained by the definition and no
//! measure the pre-agg cannot express is present.

use crate::query::ast::Query;
use crate::schema::model::{Cube, PreAggregationSpec};

#[derive(Debug, Clone)]
pub struct Match<'a> {
    pub cube_name: String,
    pub definition: &'a PreAggregationSpec,
}

/// Tries each pre-aggregation declared on `cube` in declaration order and
/// returns the first that covers `query`, or `None`.
pub fn find_match<'a>(cube_name: &str, cube: &'a Cube, query: &Query) -> Option<Match<'a>> {
    cube.pre_aggregations
        .iter()
        .find(|spec| covers(cube_name, spec, query))
        .map(|spec| Match { cube_name: cube_name.to_string(), definition: spec })
}

fn covers(cube_name: &str, spec: &PreAggregationSpec, query: &Query) -> bool {
    let required_cubes = query.required_cubes();
    if required_cubes.len() != 1 || required_cubes[0] != cube_name {
        return false;
    }

    let dims_covered = query
        .dimensions
        .iter()
        .all(|d| spec.dimensions.iter().any(|sd| member_matches(cube_name, sd, d)));
    if !dims_covered {
        return false;
    }

    let measures_covered = query
        .measures
        .iter()
        .all(|m| spec.measures.iter().any(|sm| member_matches(cube_name, sm, m)));
    if !measures_covered {
        return false;
    }

    if query.measure_filters.iter().any(|f| !filter_covered(cube_name, spec, f)) {
        return false;
    }

    for td in &query.time_dimensions {
        let Some(spec_time_dim) = &spec.time_dimension else { return false };
        if !member_matches(cube_name, spec_time_dim, &td.dimension) {
            return false;
        }
        if let (Some(requested), Some(available)) = (&td.granularity, &spec.granularity) {
            if !granularity_covered(requested, available) {
                return false;
            }
        }
    }

    true
}

fn filter_covered(cube_name: &str, spec: &PreAggregationSpec, filter: &crate::query::ast::Filter) -> bool {
    match filter {
        crate::query::ast::Filter::Leaf { member, .. } => {
            spec.measures.iter().any(|sm| member_matches(cube_name, sm, member))
                || spec.dimensions.iter().any(|sd| member_matches(cube_name, sd, member))
        }
        crate::query::ast::Filter::Logical { children, .. } => {
            children.iter().all(|c| filter_covered(cube_name, spec, c))
        }
    }
}

/// A bare field name in the definition (`"status"`) matches both its bare
/// and fully-qualified (`"orders.status"`) forms in the request.
fn member_matches(cube_name: &str, definition_field: &str, requested_member: &str) -> bool {
    definition_field == requested_member || format!("{cube_name}.{definition_field}") == requested_member
}

/// Coarsest-to-finest ordering; a rollup built at a given granularity can
/// serve any request asking for that granularity or coarser (rolling up
/// daily rows into monthly totals is fine; the reverse is not).
fn granularity_covered(requested: &str, available: &str) -> bool {
    const ORDER: &[&str] = &["year", "quarter", "month", "week", "day", "hour", "minute", "second"];
    let requested_rank = ORDER.iter().position(|g| *g == requested);
    let available_rank = ORDER.iter().position(|g| *g == available);
    match (requested_rank, available_rank) {
        (Some(r), Some(a)) => a >= r,
        _ => requested == available,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{Query, TimeDimension};
    use crate::schema::model::{Dimension, DimensionType, Measure, MeasureType, RefreshKey};
    use std::collections::HashMap;

    fn cube_with_rollup() -> Cube {
        Cube {
            name: "orders".into(),
            table: Some("orders".into()),
            sql: None,
            dimensions: HashMap::from([(
                "status".to_string(),
                Dimension { name: "status".into(), kind: DimensionType::String, sql: Some("status".into()), expression: None, primary_key: false, granularities: vec![] },
            )]),
            measures: HashMap::from([(
                "count".to_string(),
                Measure { name: "count".into(), kind: MeasureType::Count, sql: Some("id".into()), expression: None, formula: None },
            )]),
            relationships: HashMap::new(),
            security: Default::default(),
            pre_aggregations: vec![PreAggregationSpec {
                name: "daily_status".into(),
                dimensions: vec!["status".into()],
                measures: vec!["count".into()],
                time_dimension: Some("created_at".into()),
                granularity: Some("day".into()),
                refresh_key: RefreshKey { every: Some("1 hour".into()) },
            }],
        }
    }

    #[test]
    fn exact_shape_matches() {
        let cube = cube_with_rollup();
        let query = Query {
            dimensions: vec!["orders.status".into()],
            measures: vec!["orders.count".into()],
            time_dimensions: vec![TimeDimension { dimension: "orders.created_at".into(), granularity: Some("day".into()), date_range: None, compare_date_range: None }],
            ..Default::default()
        };
        assert!(find_match("orders", &cube, &query).is_some());
    }

    #[test]
    fn extra_dimension_not_in_rollup_is_a_miss() {
        let cube = cube_with_rollup();
        let query = Query {
            dimensions: vec!["orders.status".into(), "orders.region".into()],
            measures: vec!["orders.count".into()],
            ..Default::default()
        };
        assert!(find_match("orders", &cube, &query).is_none());
    }

    #[test]
    fn finer_granularity_than_rollup_is_a_miss() {
        let cube = cube_with_rollup();
        let query = Query {
            measures: vec!["orders.count".into()],
            time_dimensions: vec![TimeDimension { dimension: "orders.created_at".into(), granularity: Some("hour".into()), date_range: None, compare_date_range: None }],
            ..Default::default()
        };
        assert!(find_match("orders", &cube, &query).is_none());
    }

    #[test]
    fn coarser_granularity_than_rollup_is_covered() {
        let cube = cube_with_rollup();
        let query = Query {
            measures: vec!["orders.count".into()],
            time_dimensions: vec![TimeDimension { dimension: "orders.created_at".into(), granularity: Some("month".into()), date_range: None, compare_date_range: None }],
            ..Default::default()
        };
        assert!(find_match("orders", &cube, &query).is_some());
    }
}
