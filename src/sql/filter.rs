//! Filter → SQL rendering (§4.3), grounded on
//! `original_source/semantic_layer/query/query.py`'s
//! `QueryFilter.to_sql_condition` / `LogicalFilter.to_sql_condition`.

use crate::error::QueryError;
use crate::query::ast::{Filter, FilterValue, LogicalKind};
use crate::schema::model::DimensionType;

/// A resolved member: its SQL expression and, for dimensions, its declared
/// type (used to decide numeric-cast behavior). Measures resolve with
/// `kind = None` on the HAVING side, matching the original's
/// `dimension_type=None` default for measure filters.
pub struct ResolvedMember {
    pub expr: String,
    pub kind: Option<DimensionType>,
}

pub trait MemberResolver {
    fn resolve(&self, member: &str) -> Result<ResolvedMember, QueryError>;
}

pub fn render(filter: &Filter, resolver: &dyn MemberResolver) -> Result<String, QueryError> {
    match filter {
        Filter::Leaf { member, operator, values } => {
            let resolved = resolver.resolve(member)?;
            render_leaf(&resolved, operator, values)
        }
        Filter::Logical { kind, children } => {
            let keyword = match kind {
                LogicalKind::And => "AND",
                LogicalKind::Or => "OR",
            };
            let mut parts = Vec::with_capacity(children.len());
            for child in children {
                let rendered = render(child, resolver)?;
                let rendered = if matches!(child, Filter::Logical { .. }) {
                    format!("({rendered})")
                } else {
                    rendered
                };
                parts.push(rendered);
            }
            Ok(parts.join(&format!(" {keyword} ")))
        }
    }
}

fn escape_string(s: &str) -> String {
    s.replace('\'', "''")
}

/// Literal text for one value against a declared dimension type, returning
/// whether the literal itself is numeric (used by gt/gte/lt/lte casting).
fn literal(value: &FilterValue, dimension_kind: Option<DimensionType>) -> (String, bool) {
    match (value, dimension_kind) {
        (FilterValue::Number(n), _) => (n.to_string(), true),
        (FilterValue::Bool(b), _) => (b.to_string(), false),
        (FilterValue::String(s), Some(DimensionType::Number)) => {
            if let Ok(n) = s.parse::<f64>() {
                (n.to_string(), true)
            } else {
                (format!("'{}'", escape_string(s)), false)
            }
        }
        (FilterValue::String(s), _) => (format!("'{}'", escape_string(s)), false),
    }
}

fn render_leaf(
    member: &ResolvedMember,
    operator: &str,
    values: &[FilterValue],
) -> Result<String, QueryError> {
    let expr = &member.expr;
    match operator {
        "equals" | "not_equals" => {
            let negate = operator == "not_equals";
            let literals: Vec<(String, bool)> =
                values.iter().map(|v| literal(v, member.kind)).collect();
            let needs_cast = literals.iter().any(|(_, numeric)| *numeric)
                && matches!(member.kind, Some(k) if k != DimensionType::Number);
            let target = if needs_cast { format!("CAST({expr} AS NUMERIC)") } else { expr.clone() };
            if literals.len() == 1 {
                let op = if negate { "!=" } else { "=" };
                Ok(format!("{target} {op} {}", literals[0].0))
            } else {
                let list = literals.iter().map(|(l, _)| l.clone()).collect::<Vec<_>>().join(", ");
                let op = if negate { "NOT IN" } else { "IN" };
                Ok(format!("{target} {op} ({list})"))
            }
        }
        "in" | "not_in" => {
            let negate = operator == "not_in";
            let literals: Vec<(String, bool)> = values.iter().map(|v| literal(v, member.kind)).collect();
            let needs_cast = literals.iter().any(|(_, numeric)| *numeric)
                && matches!(member.kind, Some(k) if k != DimensionType::Number);
            let target = if needs_cast { format!("CAST({expr} AS NUMERIC)") } else { expr.clone() };
            let list = literals.iter().map(|(l, _)| l.clone()).collect::<Vec<_>>().join(", ");
            let op = if negate { "NOT IN" } else { "IN" };
            Ok(format!("{target} {op} ({list})"))
        }
        "contains" | "not_contains" => {
            let value = first_string(values)?;
            let op = if operator == "not_contains" { "NOT LIKE" } else { "LIKE" };
            Ok(format!("{expr} {op} '%{}%'", escape_string(&value)))
        }
        "starts_with" | "startsWith" => {
            let value = first_string(values)?;
            Ok(format!("{expr} LIKE '{}%'", escape_string(&value)))
        }
        "ends_with" | "endsWith" => {
            let value = first_string(values)?;
            Ok(format!("{expr} LIKE '%{}'", escape_string(&value)))
        }
        "set" => Ok(format!("{expr} IS NULL")),
        "not_set" => Ok(format!("{expr} IS NOT NULL")),
        "is_null" => Ok(format!("{expr} IS NULL")),
        "is_not_null" => Ok(format!("{expr} IS NOT NULL")),
        "gt" | "greater_than" | "gte" | "greater_than_or_equal" | "lt" | "less_than"
        | "lte" | "less_than_or_equal" => {
            let value = values
                .first()
                .ok_or_else(|| QueryError::UnsupportedOperator(operator.to_string()))?;
            let (lit, numeric) = literal(value, member.kind);
            // Only a non-numeric dimension needs the cast to compare safely
            // against a numeric literal; an already-numeric dimension or an
            // aggregated measure expression (HAVING side, kind = None) does not.
            let needs_cast = numeric && matches!(member.kind, Some(k) if k != DimensionType::Number);
            let target = if needs_cast { format!("CAST({expr} AS NUMERIC)") } else { expr.clone() };
            let op = match operator {
                "gt" | "greater_than" => ">",
                "gte" | "greater_than_or_equal" => ">=",
                "lt" | "less_than" => "<",
                "lte" | "less_than_or_equal" => "<=",
                _ => unreachable!(),
            };
            Ok(format!("{target} {op} {lit}"))
        }
        "before_date" | "beforeDate" => {
            let value = first_string(values)?;
            Ok(format!("{expr} < '{}'", escape_string(&value)))
        }
        "after_date" | "afterDate" => {
            let value = first_string(values)?;
            Ok(format!("{expr} > '{}'", escape_string(&value)))
        }
        "in_date_range" | "inDateRange" => {
            if values.len() != 2 {
                return Err(QueryError::InDateRangeArity(values.len()));
            }
            let start = value_as_string(&values[0]);
            let end = value_as_string(&values[1]);
            Ok(format!(
                "{expr} >= '{}' AND {expr} <= '{}'",
                escape_string(&start),
                escape_string(&end)
            ))
        }
        other => Err(QueryError::UnsupportedOperator(other.to_string())),
    }
}

fn first_string(values: &[FilterValue]) -> Result<String, QueryError> {
    values
        .first()
        .map(value_as_string)
        .ok_or_else(|| QueryError::UnsupportedOperator("missing value".to_string()))
}

fn value_as_string(value: &FilterValue) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver;
    impl MemberResolver for FixedResolver {
        fn resolve(&self, member: &str) -> Result<ResolvedMember, QueryError> {
            match member {
                "orders.status" => Ok(ResolvedMember { expr: "t0.status".into(), kind: Some(DimensionType::String) }),
                "orders.total_revenue" => Ok(ResolvedMember { expr: "SUM(t0.total_amount)".into(), kind: None }),
                other => Err(QueryError::UnknownField { cube: "orders".into(), field: other.into() }),
            }
        }
    }

    #[test]
    fn equals_single_value() {
        let filter = Filter::Leaf {
            member: "orders.status".into(),
            operator: "equals".into(),
            values: vec![FilterValue::String("completed".into())],
        };
        let sql = render(&filter, &FixedResolver).unwrap();
        assert_eq!(sql, "t0.status = 'completed'");
    }

    #[test]
    fn having_measure_equals_does_not_cast_an_aggregate_expression() {
        let filter = Filter::Leaf {
            member: "orders.total_revenue".into(),
            operator: "equals".into(),
            values: vec![FilterValue::Number(1000.0)],
        };
        let sql = render(&filter, &FixedResolver).unwrap();
        assert_eq!(sql, "SUM(t0.total_amount) = 1000");
    }

    #[test]
    fn having_measure_gt_does_not_cast_an_aggregate_expression() {
        let filter = Filter::Leaf {
            member: "orders.total_revenue".into(),
            operator: "gt".into(),
            values: vec![FilterValue::Number(1000.0)],
        };
        let sql = render(&filter, &FixedResolver).unwrap();
        assert_eq!(sql, "SUM(t0.total_amount) > 1000");
    }

    #[test]
    fn gt_casts_a_string_typed_dimension_against_a_numeric_literal() {
        struct NumericAgainstStringResolver;
        impl MemberResolver for NumericAgainstStringResolver {
            fn resolve(&self, _member: &str) -> Result<ResolvedMember, QueryError> {
                Ok(ResolvedMember { expr: "t0.code".into(), kind: Some(DimensionType::String) })
            }
        }
        let filter = Filter::Leaf { member: "orders.code".into(), operator: "gt".into(), values: vec![FilterValue::Number(5.0)] };
        let sql = render(&filter, &NumericAgainstStringResolver).unwrap();
        assert_eq!(sql, "CAST(t0.code AS NUMERIC) > 5");
    }

    #[test]
    fn in_casts_a_string_typed_dimension_against_numeric_literals() {
        struct NumericAgainstStringResolver;
        impl MemberResolver for NumericAgainstStringResolver {
            fn resolve(&self, _member: &str) -> Result<ResolvedMember, QueryError> {
                Ok(ResolvedMember { expr: "t0.code".into(), kind: Some(DimensionType::String) })
            }
        }
        let filter = Filter::Leaf {
            member: "orders.code".into(),
            operator: "in".into(),
            values: vec![FilterValue::Number(1.0), FilterValue::Number(2.0), FilterValue::Number(3.0)],
        };
        let sql = render(&filter, &NumericAgainstStringResolver).unwrap();
        assert_eq!(sql, "CAST(t0.code AS NUMERIC) IN (1, 2, 3)");
    }

    #[test]
    fn logical_or_parenthesizes_nested_and() {
        let filter = Filter::Logical {
            kind: LogicalKind::Or,
            children: vec![
                Filter::Leaf {
                    member: "orders.status".into(),
                    operator: "equals".into(),
                    values: vec![FilterValue::String("completed".into())],
                },
                Filter::Logical {
                    kind: LogicalKind::And,
                    children: vec![
                        Filter::Leaf {
                            member: "orders.status".into(),
                            operator: "equals".into(),
                            values: vec![FilterValue::String("pending".into())],
                        },
                        Filter::Leaf {
                            member: "orders.total_revenue".into(),
                            operator: "gt".into(),
                            values: vec![FilterValue::Number(50.0)],
                        },
                    ],
                },
            ],
        };
        let sql = render(&filter, &FixedResolver).unwrap();
        assert!(sql.contains(" OR ("));
        assert!(sql.contains(" AND "));
    }
}
