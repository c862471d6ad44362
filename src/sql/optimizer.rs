//! Pre-compile query normalization (§4.6), grounded on
//! `original_source/semantic_layer/sql/optimizer.py`.

use crate::query::ast::{OrderBy, Query};
use crate::utils::collection_ext::unique_ordered;
use std::collections::HashSet;

pub struct QueryOptimizer;

impl QueryOptimizer {
    pub fn new() -> Self {
        Self
    }

    /// Dedups dimensions/measures (first occurrence kept) and order_by by
    /// `(field, direction)`. Filters currently pass through unchanged — the
    /// original is "a pass-through collation; no constant folding yet".
    pub fn optimize(&self, query: &Query) -> Query {
        let mut optimized = query.clone();
        optimized.dimensions = unique_ordered(query.dimensions.clone());
        optimized.measures = unique_ordered(query.measures.clone());
        optimized.order_by = dedup_order_by(&query.order_by);
        optimized
    }

    /// Coarse cost estimate used only as response metadata (§4.6):
    /// `10 + 2*|dims| + 5*|measures| + 3*|filters| + 20*max(0, |cubes|-1)`.
    /// The cube count is derived from dimensions+measures only, matching
    /// `optimizer.py::estimate_cost` exactly (filters are not counted
    /// towards the join-cost term there).
    pub fn estimate_cost(&self, query: &Query) -> i64 {
        let mut cubes: Vec<&str> = Vec::new();
        for member in query.dimensions.iter().chain(query.measures.iter()) {
            if let Some((cube, _)) = member.split_once('.') {
                if !cubes.contains(&cube) {
                    cubes.push(cube);
                }
            }
        }
        let join_penalty = if cubes.len() > 1 { 20 * (cubes.len() as i64 - 1) } else { 0 };
        10 + 2 * query.dimensions.len() as i64
            + 5 * query.measures.len() as i64
            + 3 * query.filters.len() as i64
            + join_penalty
    }
}

impl Default for QueryOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

fn dedup_order_by(order_by: &[OrderBy]) -> Vec<OrderBy> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for entry in order_by {
        let key = (entry.dimension.clone(), entry.direction);
        if seen.insert(key) {
            out.push(entry.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::OrderDirection;

    #[test]
    fn dedups_dimensions_and_measures_preserving_order() {
        let query = Query {
            dimensions: vec!["orders.status".into(), "orders.status".into()],
            measures: vec!["orders.count".into()],
            ..Default::default()
        };
        let optimized = QueryOptimizer::new().optimize(&query);
        assert_eq!(optimized.dimensions, vec!["orders.status".to_string()]);
    }

    #[test]
    fn idempotent() {
        let query = Query {
            dimensions: vec!["orders.status".into(), "orders.status".into()],
            measures: vec!["orders.count".into()],
            order_by: vec![
                OrderBy { dimension: "orders.status".into(), direction: OrderDirection::Asc },
                OrderBy { dimension: "orders.status".into(), direction: OrderDirection::Asc },
            ],
            ..Default::default()
        };
        let optimizer = QueryOptimizer::new();
        let once = optimizer.optimize(&query);
        let twice = optimizer.optimize(&once);
        assert_eq!(once.dimensions, twice.dimensions);
        assert_eq!(once.order_by.len(), twice.order_by.len());
    }

    #[test]
    fn cost_formula() {
        let query = Query {
            dimensions: vec!["orders.status".into()],
            measures: vec!["orders.count".into(), "customers.lifetime_value".into()],
            filters: vec![],
            ..Default::default()
        };
        let cost = QueryOptimizer::new().estimate_cost(&query);
        // 10 + 2*1 + 5*2 + 3*0 + 20*(2-1) = 42
        assert_eq!(cost, 42);
    }

    #[test]
    fn measure_filters_do_not_affect_cost() {
        use crate::query::ast::{Filter, FilterValue};

        let base = Query { measures: vec!["orders.count".into()], ..Default::default() };
        let with_having = Query {
            measures: vec!["orders.count".into()],
            measure_filters: vec![Filter::Leaf {
                member: "orders.count".into(),
                operator: "gt".into(),
                values: vec![FilterValue::Number(5.0)],
            }],
            ..Default::default()
        };
        let optimizer = QueryOptimizer::new();
        assert_eq!(optimizer.estimate_cost(&base), optimizer.estimate_cost(&with_having));
    }
}
