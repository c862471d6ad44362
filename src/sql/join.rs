//! Join planning (§4.4): BFS shortest paths over the relationship graph,
//! deterministic alias assignment, ordered join-clause emission. Grounded
//! on `original_source/semantic_layer/sql/builder.py`'s
//! `_build_join_plan` / `_build_join_clauses`.

use crate::error::QueryError;
use crate::schema::model::Schema;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct JoinClause {
    pub cube: String,
    pub alias: String,
    pub condition: String,
}

#[derive(Debug, Clone)]
pub struct JoinPlan {
    pub primary_cube: String,
    /// cube name -> alias (t0 for primary, t1/t2/... for the rest)
    pub aliases: HashMap<String, String>,
    /// LEFT JOIN clauses in emission order (shortest path first).
    pub joins: Vec<JoinClause>,
}

impl JoinPlan {
    pub fn alias_of(&self, cube: &str) -> Option<&str> {
        self.aliases.get(cube).map(String::as_str)
    }
}

/// `required_cubes` must be non-empty; the first entry is treated as
/// primary (alias `t0`) per §4.4 ("Designate the first-inserted cube as
/// primary").
pub fn plan(schema: &Schema, required_cubes: &[String]) -> Result<JoinPlan, QueryError> {
    let primary = required_cubes[0].clone();
    let mut aliases: HashMap<String, String> = HashMap::new();
    aliases.insert(primary.clone(), "t0".to_string());

    let mut seen = HashSet::new();
    seen.insert(primary.clone());

    let mut paths: Vec<(String, Vec<crate::schema::graph::Hop>)> = Vec::new();
    for cube in required_cubes {
        if !seen.insert(cube.clone()) {
            continue;
        }
        let path = schema
            .graph()
            .shortest_path(&primary, cube)
            .ok_or_else(|| QueryError::NoJoinPath { from: primary.clone(), to: cube.clone() })?;
        paths.push((cube.clone(), path));
    }

    let mut all_cubes: Vec<String> = Vec::new();
    for (_, path) in &paths {
        for hop in path {
            if hop.to != primary && !all_cubes.contains(&hop.to) {
                all_cubes.push(hop.to.clone());
            }
        }
    }
    all_cubes.sort();
    for (i, cube) in all_cubes.iter().enumerate() {
        aliases.insert(cube.clone(), format!("t{}", i + 1));
    }

    let mut sorted_paths = paths;
    sorted_paths.sort_by_key(|(_, path)| path.len());

    let mut joins = Vec::new();
    let mut joined: HashSet<String> = HashSet::new();
    for (_, path) in sorted_paths {
        for hop in path {
            if joined.contains(&hop.to) {
                continue;
            }
            let left_alias = aliases.get(&hop.from).cloned().unwrap_or_else(|| "t0".to_string());
            let right_alias = aliases
                .get(&hop.to)
                .cloned()
                .expect("every hop target was assigned an alias above");
            let condition = hop.join_condition(&left_alias, &right_alias);
            joins.push(JoinClause { cube: hop.to.clone(), alias: right_alias, condition });
            joined.insert(hop.to.clone());
        }
    }

    Ok(JoinPlan { primary_cube: primary, aliases, joins })
}
