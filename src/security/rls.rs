//! Row-level security injection (§4.7), grounded on
//! `original_source/semantic_layer/security/rls.py`. Deviates from the
//! original in one deliberate way: substituted values are single-quote
//! escaped before interpolation (DESIGN.md Open Question 3) — the
//! original's literal `.replace(...)` calls do not escape, which is an
//! injection hole this port closes.

use super::context::SecurityContext;
use crate::schema::model::Cube;

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

/// Returns the conjoined RLS predicate for `cube` at `alias`, or `None` if
/// there is nothing to inject (no context, or no template and no default).
pub fn apply(cube: &Cube, alias: &str, context: Option<&SecurityContext>) -> Option<String> {
    let context = context?;

    if let Some(template) = &cube.security.row_filter {
        let mut rendered = template.replace("{CUBE}", alias);
        if let Some(user_id) = &context.user_id {
            if !user_id.is_empty() {
                rendered = rendered.replace("{USER_CONTEXT.user_id}", &format!("'{}'", escape(user_id)));
            }
        }
        if let Some(tenant_id) = &context.tenant_id {
            if !tenant_id.is_empty() {
                rendered =
                    rendered.replace("{USER_CONTEXT.tenant_id}", &format!("'{}'", escape(tenant_id)));
            }
        }
        if !context.roles.is_empty() {
            let roles_list = context
                .roles
                .iter()
                .map(|r| escape(r))
                .collect::<Vec<_>>()
                .join("', '");
            rendered = rendered.replace("{USER_CONTEXT.roles}", &format!("('{roles_list}')"));
        }
        return Some(rendered);
    }

    if cube.dimension("user_id").is_some() {
        if let Some(user_id) = &context.user_id {
            if !user_id.is_empty() {
                return Some(format!("{alias}.user_id = '{}'", escape(user_id)));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::Security;
    use std::collections::HashMap;

    fn cube_with_filter(filter: &str) -> Cube {
        Cube {
            name: "orders".into(),
            table: Some("orders".into()),
            sql: None,
            dimensions: HashMap::new(),
            measures: HashMap::new(),
            relationships: HashMap::new(),
            security: Security { row_filter: Some(filter.to_string()) },
            pre_aggregations: vec![],
        }
    }

    #[test]
    fn no_context_disables_rls() {
        let cube = cube_with_filter("{CUBE}.tenant_id = {USER_CONTEXT.tenant_id}");
        assert!(apply(&cube, "t0", None).is_none());
    }

    #[test]
    fn expands_template_tokens() {
        let cube = cube_with_filter("{CUBE}.tenant_id = {USER_CONTEXT.tenant_id}");
        let context = SecurityContext { tenant_id: Some("acme".into()), ..Default::default() };
        let rendered = apply(&cube, "t0", Some(&context)).unwrap();
        assert_eq!(rendered, "t0.tenant_id = 'acme'");
    }

    #[test]
    fn escapes_single_quotes_in_substituted_values() {
        let cube = cube_with_filter("{CUBE}.tenant_id = {USER_CONTEXT.tenant_id}");
        let context = SecurityContext { tenant_id: Some("o'brien".into()), ..Default::default() };
        let rendered = apply(&cube, "t0", Some(&context)).unwrap();
        assert_eq!(rendered, "t0.tenant_id = 'o''brien'");
    }
}
