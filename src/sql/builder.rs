//! Final SQL assembly (§4.5), grounded on
//! `original_source/semantic_layer/sql/builder.py::build`. Fixed clause
//! order: `[WITH] SELECT FROM <joins> WHERE GROUP BY HAVING ORDER BY
//! LIMIT/OFFSET`.

use super::filter::{self, MemberResolver, ResolvedMember};
use super::join::{self, JoinPlan};
use crate::error::QueryError;
use crate::query::ast::{Filter, OrderDirection, Query};
use crate::query::date_range;
use crate::schema::model::{Cube, DimensionType, MeasureType, Schema};
use crate::security::context::SecurityContext;
use crate::security::rls;
use std::collections::HashMap;

pub struct BuildOutput {
    pub sql: String,
    /// Order-by entries that resolved to neither a dimension nor a measure
    /// and were silently dropped (§9 Open Question 1: reproduce the drop,
    /// but surface it so callers can warn).
    pub dropped_order_by: Vec<String>,
}

pub struct SqlBuilder<'a> {
    schema: &'a Schema,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// `table_override` replaces a cube's physical table (by cube name)
    /// with a pre-aggregation rollup table name, passed explicitly rather
    /// than mutating the cube in place (§9, DESIGN.md Open Question 4).
    pub fn build(
        &self,
        query: &Query,
        security_context: Option<&SecurityContext>,
        table_override: &HashMap<String, String>,
    ) -> Result<BuildOutput, QueryError> {
        let required_cubes = query.required_cubes();
        if required_cubes.is_empty() {
            return Err(QueryError::EmptyRequest);
        }
        for cube in &required_cubes {
            if self.schema.get_cube(cube).is_none() {
                return Err(QueryError::UnknownCube(cube.clone()));
            }
        }

        let plan = join::plan(self.schema, &required_cubes)?;

        let mut select_items = Vec::new();
        let mut group_by_exprs = Vec::new();

        for dim_ref in &query.dimensions {
            let (expr, alias_name) = self.dimension_select(dim_ref, &plan, None)?;
            select_items.push(format!("{expr} AS {alias_name}"));
            group_by_exprs.push(expr);
        }

        for td in &query.time_dimensions {
            let (expr, alias_name) = self.dimension_select(&td.dimension, &plan, td.granularity.as_deref())?;
            select_items.push(format!("{expr} AS {alias_name}"));
            group_by_exprs.push(expr);
        }

        for measure_ref in &query.measures {
            let (cube_name, field) = split_member(measure_ref)?;
            let cube = self.cube(&cube_name)?;
            let alias = plan.alias_of(&cube_name).expect("required cube has an alias");
            let measure = cube
                .measure(&field)
                .ok_or_else(|| QueryError::UnknownField { cube: cube_name.clone(), field: field.clone() })?;
            let expr = self.measure_expr(&cube_name, measure, alias)?;
            select_items.push(format!("{expr} AS {cube_name}_{field}"));
        }

        let from_source = self.cube(&plan.primary_cube)?.from_source(table_override.get(&plan.primary_cube).map(String::as_str));
        let mut sql_parts: Vec<String> = Vec::new();

        if !query.ctes.is_empty() {
            let ctes = query
                .ctes
                .iter()
                .map(|c| format!("{} AS ({})", c.alias, c.query))
                .collect::<Vec<_>>()
                .join(", ");
            sql_parts.push(format!("WITH {ctes}"));
        }

        sql_parts.push(format!("SELECT {}", select_items.join(", ")));
        sql_parts.push(format!("FROM {from_source} AS t0"));

        for join_clause in &plan.joins {
            let cube = self.cube(&join_clause.cube)?;
            let source = cube.from_source(table_override.get(&join_clause.cube).map(String::as_str));
            sql_parts.push(format!(
                "LEFT JOIN {source} AS {} ON {}",
                join_clause.alias, join_clause.condition
            ));
        }

        let mut where_predicates = Vec::new();
        let where_resolver = WhereResolver { schema: self.schema, plan: &plan };
        for f in &query.filters {
            where_predicates.push(filter::render(f, &where_resolver)?);
        }
        for td in &query.time_dimensions {
            if let Some(predicate) = self.time_dimension_predicate(td, &plan)? {
                where_predicates.push(predicate);
            }
        }
        for cube_name in &required_cubes {
            let cube = self.cube(cube_name)?;
            let alias = plan.alias_of(cube_name).expect("required cube has an alias");
            if let Some(predicate) = rls::apply(cube, alias, security_context) {
                where_predicates.push(predicate);
            }
        }
        if !where_predicates.is_empty() {
            sql_parts.push(format!("WHERE {}", where_predicates.join(" AND ")));
        }

        let elide_group_by = query.measures.is_empty()
            && required_cubes.len() == 1
            && self
                .cube(&plan.primary_cube)?
                .primary_key_dimension()
                .map(|pk| query.dimensions.iter().any(|d| d == &format!("{}.{pk}", plan.primary_cube)))
                .unwrap_or(false);

        if !elide_group_by && !group_by_exprs.is_empty() {
            sql_parts.push(format!("GROUP BY {}", group_by_exprs.join(", ")));
        }

        if !query.measure_filters.is_empty() {
            let having_resolver = HavingResolver { schema: self.schema, plan: &plan };
            let mut having_predicates = Vec::new();
            for f in &query.measure_filters {
                having_predicates.push(filter::render(f, &having_resolver)?);
            }
            sql_parts.push(format!("HAVING {}", having_predicates.join(" AND ")));
        }

        let mut dropped_order_by = Vec::new();
        let mut order_items = Vec::new();
        for entry in &query.order_by {
            if let Ok((cube_name, field)) = split_member(&entry.dimension) {
                let cube = self.cube(&cube_name)?;
                let resolved = if let Some(dim) = cube.dimension(&field) {
                    let alias = plan.alias_of(&cube_name).unwrap_or("t0");
                    Some(dim.sql_expression(alias))
                } else if let Some(measure) = cube.measure(&field) {
                    let alias = plan.alias_of(&cube_name).unwrap_or("t0");
                    Some(self.measure_expr(&cube_name, measure, alias)?)
                } else {
                    None
                };
                match resolved {
                    Some(expr) => {
                        let direction = match entry.direction {
                            OrderDirection::Asc => "ASC",
                            OrderDirection::Desc => "DESC",
                        };
                        order_items.push(format!("{expr} {direction}"));
                    }
                    None => dropped_order_by.push(entry.dimension.clone()),
                }
            } else {
                dropped_order_by.push(entry.dimension.clone());
            }
        }
        if !order_items.is_empty() {
            sql_parts.push(format!("ORDER BY {}", order_items.join(", ")));
        }

        if let Some(limit) = query.limit {
            sql_parts.push(format!("LIMIT {limit}"));
        }
        if let Some(offset) = query.offset {
            sql_parts.push(format!("OFFSET {offset}"));
        }

        Ok(BuildOutput { sql: sql_parts.join(" "), dropped_order_by })
    }

    fn cube(&self, name: &str) -> Result<&Cube, QueryError> {
        self.schema.get_cube(name).ok_or_else(|| QueryError::UnknownCube(name.to_string()))
    }

    fn dimension_select(
        &self,
        member: &str,
        plan: &JoinPlan,
        granularity: Option<&str>,
    ) -> Result<(String, String), QueryError> {
        let (cube_name, field) = split_member(member)?;
        let cube = self.cube(&cube_name)?;
        let alias = plan.alias_of(&cube_name).expect("required cube has an alias");
        let dim = cube
            .dimension(&field)
            .ok_or_else(|| QueryError::UnknownField { cube: cube_name.clone(), field: field.clone() })?;
        let base_expr = dim.sql_expression(alias);
        match granularity {
            Some(g) => {
                let expr = apply_time_granularity(&base_expr, g);
                Ok((expr, format!("{cube_name}_{field}_{g}")))
            }
            None => Ok((base_expr, format!("{cube_name}_{field}"))),
        }
    }

    /// Aggregated measure expression, resolving calculated/formula measures
    /// against sibling measures (DESIGN.md Open Question 5).
    fn measure_expr(&self, cube_name: &str, measure: &crate::schema::model::Measure, alias: &str) -> Result<String, QueryError> {
        if measure.kind == MeasureType::Calculated {
            if let Some(formula) = &measure.formula {
                return self.resolve_formula(cube_name, formula, alias);
            }
            if let Some(expr) = &measure.expression {
                return Ok(expr.replace("{CUBE}", alias));
            }
        }
        let inner = measure.inner_sql_expression(alias);
        Ok(match measure.kind {
            MeasureType::Count => format!("COUNT({inner})"),
            MeasureType::CountDistinct => format!("COUNT(DISTINCT {inner})"),
            MeasureType::Sum => format!("SUM({inner})"),
            MeasureType::Avg => format!("AVG({inner})"),
            MeasureType::Min => format!("MIN({inner})"),
            MeasureType::Max => format!("MAX({inner})"),
            MeasureType::Number | MeasureType::Calculated => inner,
        })
    }

    /// Replaces every `cube.measure` token in `formula` with that measure's
    /// own aggregated SQL expression. `{CUBE}` in the formula refers to the
    /// owning cube's alias, consistent with every other expression field.
    fn resolve_formula(&self, _owning_cube: &str, formula: &str, alias: &str) -> Result<String, QueryError> {
        static TOKEN: once_cell::sync::Lazy<regex::Regex> =
            once_cell::sync::Lazy::new(|| regex::Regex::new(r"[A-Za-z_][A-Za-z0-9_]*\.[A-Za-z_][A-Za-z0-9_]*").unwrap());

        let mut result = formula.replace("{CUBE}", alias);
        let tokens: Vec<String> = TOKEN.find_iter(&result).map(|m| m.as_str().to_string()).collect();
        for token in tokens {
            let (cube_name, field) = split_member(&token)?;
            let cube = self.cube(&cube_name)?;
            if let Some(sibling) = cube.measure(&field) {
                let resolved = self.measure_expr(&cube_name, sibling, alias)?;
                result = result.replace(&token, &format!("({resolved})"));
            }
        }
        Ok(result)
    }

    fn time_dimension_predicate(
        &self,
        td: &crate::query::ast::TimeDimension,
        plan: &JoinPlan,
    ) -> Result<Option<String>, QueryError> {
        let Some(date_range) = &td.date_range else { return Ok(None) };
        let (cube_name, field) = split_member(&td.dimension)?;
        let cube = self.cube(&cube_name)?;
        let alias = plan.alias_of(&cube_name).unwrap_or("t0");
        let dim = cube
            .dimension(&field)
            .ok_or_else(|| QueryError::UnknownField { cube: cube_name.clone(), field: field.clone() })?;
        let expr = dim.sql_expression(alias);

        let [start, end] = normalize_range(date_range)?;
        Ok(Some(format!("{expr} >= '{start}' AND {expr} <= '{end}'")))
    }
}

fn normalize_range(date_range: &[String]) -> Result<[String; 2], QueryError> {
    if date_range.len() == 2 && is_iso_date(&date_range[0]) && is_iso_date(&date_range[1]) {
        return Ok([date_range[0].clone(), date_range[1].clone()]);
    }
    let phrase = date_range.join(" ");
    date_range::parse(&phrase).map_err(|e| QueryError::UnsupportedOperator(e.to_string()))
}

fn is_iso_date(s: &str) -> bool {
    s.len() == 10 && s.as_bytes().get(4) == Some(&b'-') && s.as_bytes().get(7) == Some(&b'-')
}

/// `DATE_TRUNC('<granularity>', …)`, defaulting to `day` for unrecognized
/// granularity strings, matching `models/dimension.py::_apply_time_granularity`.
fn apply_time_granularity(expr: &str, granularity: &str) -> String {
    const KNOWN: &[&str] = &["second", "minute", "hour", "day", "week", "month", "quarter", "year"];
    let g = if KNOWN.contains(&granularity) { granularity } else { "day" };
    format!("DATE_TRUNC('{g}', {expr})")
}

fn split_member(member: &str) -> Result<(String, String), QueryError> {
    member
        .split_once('.')
        .map(|(c, f)| (c.to_string(), f.to_string()))
        .ok_or_else(|| QueryError::MalformedMemberReference(member.to_string()))
}

struct WhereResolver<'a> {
    schema: &'a Schema,
    plan: &'a JoinPlan,
}

impl<'a> MemberResolver for WhereResolver<'a> {
    fn resolve(&self, member: &str) -> Result<ResolvedMember, QueryError> {
        let (cube_name, field) = split_member(member)?;
        let cube = self
            .schema
            .get_cube(&cube_name)
            .ok_or_else(|| QueryError::UnknownCube(cube_name.clone()))?;
        let alias = self.plan.alias_of(&cube_name).unwrap_or("t0");
        let dim = cube
            .dimension(&field)
            .ok_or_else(|| QueryError::UnknownField { cube: cube_name.clone(), field })?;
        Ok(ResolvedMember { expr: dim.sql_expression(alias), kind: Some(dim.kind) })
    }
}

struct HavingResolver<'a> {
    schema: &'a Schema,
    plan: &'a JoinPlan,
}

impl<'a> MemberResolver for HavingResolver<'a> {
    fn resolve(&self, member: &str) -> Result<ResolvedMember, QueryError> {
        let (cube_name, field) = split_member(member)?;
        let cube = self
            .schema
            .get_cube(&cube_name)
            .ok_or_else(|| QueryError::UnknownCube(cube_name.clone()))?;
        let alias = self.plan.alias_of(&cube_name).unwrap_or("t0");
        let measure = cube
            .measure(&field)
            .ok_or_else(|| QueryError::UnknownField { cube: cube_name.clone(), field })?;
        let builder = SqlBuilder { schema: self.schema };
        let expr = builder.measure_expr(&cube_name, measure, alias)?;
        Ok(ResolvedMember { expr, kind: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{Filter, FilterValue, OrderBy, OrderDirection, Query, TimeDimension};
    use crate::schema::compiler::compile;
    use crate::schema::model::{Cube, Dimension, DimensionType, Measure, MeasureType, Relationship, RelationshipKind};
    use std::collections::HashMap as Map;

    fn orders_cube() -> Cube {
        let mut dimensions = Map::new();
        dimensions.insert(
            "status".to_string(),
            Dimension { name: "status".into(), kind: DimensionType::String, sql: Some("status".into()), expression: None, primary_key: false, granularities: vec![] },
        );
        dimensions.insert(
            "id".to_string(),
            Dimension { name: "id".into(), kind: DimensionType::Number, sql: Some("id".into()), expression: None, primary_key: true, granularities: vec![] },
        );
        let mut measures = Map::new();
        measures.insert(
            "count".to_string(),
            Measure { name: "count".into(), kind: MeasureType::Count, sql: Some("id".into()), expression: None, formula: None },
        );
        measures.insert(
            "total_revenue".to_string(),
            Measure { name: "total_revenue".into(), kind: MeasureType::Sum, sql: Some("total_amount".into()), expression: None, formula: None },
        );
        Cube {
            name: "orders".into(),
            table: Some("orders".into()),
            sql: None,
            dimensions,
            measures,
            relationships: Map::new(),
            security: Default::default(),
            pre_aggregations: vec![],
        }
    }

    #[test]
    fn scenario_1_simple_aggregation() {
        let schema = compile(vec![orders_cube()], "1").unwrap();
        let query = Query { measures: vec!["orders.count".into()], ..Default::default() };
        let out = SqlBuilder::new(&schema).build(&query, None, &Map::new()).unwrap();
        assert_eq!(out.sql, "SELECT COUNT(t0.id) AS orders_count FROM orders AS t0");
    }

    #[test]
    fn scenario_2_group_by_with_filter() {
        let schema = compile(vec![orders_cube()], "1").unwrap();
        let query = Query {
            dimensions: vec!["orders.status".into()],
            measures: vec!["orders.count".into(), "orders.total_revenue".into()],
            filters: vec![Filter::Leaf {
                member: "orders.status".into(),
                operator: "equals".into(),
                values: vec![FilterValue::String("completed".into())],
            }],
            ..Default::default()
        };
        let out = SqlBuilder::new(&schema).build(&query, None, &Map::new()).unwrap();
        assert!(out.sql.contains("WHERE t0.status = 'completed' GROUP BY t0.status"));
    }

    #[test]
    fn scenario_4_having_vs_where_partition() {
        let schema = compile(vec![orders_cube()], "1").unwrap();
        let query = Query {
            dimensions: vec!["orders.status".into()],
            measures: vec!["orders.count".into(), "orders.total_revenue".into()],
            filters: vec![Filter::Leaf { member: "orders.status".into(), operator: "equals".into(), values: vec![FilterValue::String("completed".into())] }],
            measure_filters: vec![Filter::Leaf { member: "orders.total_revenue".into(), operator: "gt".into(), values: vec![FilterValue::Number(1000.0)] }],
            ..Default::default()
        };
        let out = SqlBuilder::new(&schema).build(&query, None, &Map::new()).unwrap();
        let where_pos = out.sql.find("WHERE").unwrap();
        let group_by_pos = out.sql.find("GROUP BY").unwrap();
        let having_pos = out.sql.find("HAVING").unwrap();
        assert!(where_pos < group_by_pos);
        assert!(group_by_pos < having_pos);
        assert!(out.sql.contains("HAVING SUM(t0.total_amount) > 1000"));
    }

    #[test]
    fn group_by_elided_for_row_projection() {
        let schema = compile(vec![orders_cube()], "1").unwrap();
        let query = Query { dimensions: vec!["orders.status".into(), "orders.id".into()], ..Default::default() };
        let out = SqlBuilder::new(&schema).build(&query, None, &Map::new()).unwrap();
        assert!(!out.sql.contains("GROUP BY"));
    }

    #[test]
    fn unresolvable_order_by_is_dropped_and_reported() {
        let schema = compile(vec![orders_cube()], "1").unwrap();
        let query = Query {
            measures: vec!["orders.count".into()],
            order_by: vec![OrderBy { dimension: "orders.nonexistent".into(), direction: OrderDirection::Asc }],
            ..Default::default()
        };
        let out = SqlBuilder::new(&schema).build(&query, None, &Map::new()).unwrap();
        assert!(!out.sql.contains("ORDER BY"));
        assert_eq!(out.dropped_order_by, vec!["orders.nonexistent".to_string()]);
    }

    #[test]
    fn two_hop_join_scenario() {
        let mut orders = orders_cube();
        orders.relationships.insert(
            "customer".into(),
            Relationship { name: "customer".into(), kind: RelationshipKind::BelongsTo, cube: "customers".into(), foreign_key: "customer_id".into(), primary_key: "id".into() },
        );
        let mut customers = Cube {
            name: "customers".into(), table: Some("customers".into()), sql: None,
            dimensions: Map::new(), measures: Map::new(), relationships: Map::new(), security: Default::default(), pre_aggregations: vec![],
        };
        customers.relationships.insert(
            "country".into(),
            Relationship { name: "country".into(), kind: RelationshipKind::BelongsTo, cube: "countries".into(), foreign_key: "country_id".into(), primary_key: "id".into() },
        );
        let mut countries_dims = Map::new();
        countries_dims.insert("name".to_string(), Dimension { name: "name".into(), kind: DimensionType::String, sql: Some("name".into()), expression: None, primary_key: false, granularities: vec![] });
        let countries = Cube {
            name: "countries".into(), table: Some("countries".into()), sql: None,
            dimensions: countries_dims, measures: Map::new(), relationships: Map::new(), security: Default::default(), pre_aggregations: vec![],
        };
        let schema = compile(vec![orders, customers, countries], "1").unwrap();
        let query = Query {
            dimensions: vec!["countries.name".into()],
            measures: vec!["orders.count".into()],
            ..Default::default()
        };
        let out = SqlBuilder::new(&schema).build(&query, None, &Map::new()).unwrap();
        // Aliases for non-primary cubes are assigned sorted by cube name
        // (§4.4), so "countries" < "customers" gets t1 even though the
        // customers hop is joined first (it sits closer to the primary cube
        // on the BFS path).
        let join1 = out.sql.find("LEFT JOIN customers AS t2 ON t0.customer_id = t2.id").unwrap();
        let join2 = out.sql.find("LEFT JOIN countries AS t1 ON t2.country_id = t1.id").unwrap();
        assert!(join1 < join2);
    }

    #[test]
    fn nested_logical_filter_renders_parens_and_having() {
        let schema = compile(vec![orders_cube()], "1").unwrap();
        let query = Query {
            measures: vec!["orders.count".into(), "orders.total_revenue".into()],
            filters: vec![Filter::Logical {
                kind: crate::query::ast::LogicalKind::Or,
                children: vec![
                    Filter::Leaf { member: "orders.status".into(), operator: "equals".into(), values: vec![FilterValue::String("completed".into())] },
                    Filter::Leaf { member: "orders.status".into(), operator: "equals".into(), values: vec![FilterValue::String("pending".into())] },
                ],
            }],
            ..Default::default()
        };
        let out = SqlBuilder::new(&schema).build(&query, None, &Map::new()).unwrap();
        assert!(out.sql.contains("WHERE t0.status = 'completed' OR t0.status = 'pending'"));
    }

    #[test]
    fn time_dimension_with_granularity_selects_truncated_expr() {
        let mut orders = orders_cube();
        orders.dimensions.insert(
            "created_at".into(),
            Dimension { name: "created_at".into(), kind: DimensionType::Time, sql: Some("created_at".into()), expression: None, primary_key: false, granularities: vec!["day".into()] },
        );
        let schema = compile(vec![orders], "1").unwrap();
        let query = Query {
            measures: vec!["orders.count".into()],
            time_dimensions: vec![TimeDimension { dimension: "orders.created_at".into(), granularity: Some("day".into()), date_range: None, compare_date_range: None }],
            ..Default::default()
        };
        let out = SqlBuilder::new(&schema).build(&query, None, &Map::new()).unwrap();
        assert!(out.sql.contains("DATE_TRUNC('day', t0.created_at) AS orders_created_at_day"));
    }
}
