//! Relationship graph: adjacency + reverse index, BFS shortest path.
//!
//! Grounded on `original_source/semantic_layer/sql/builder.py`'s
//! `_build_relationship_graph` / `_find_path_bfs`. §9: "Represent as an
//! adjacency map plus a reverse-adjacency map. BFS queue stores (cube,
//! path_so_far); visited is a set."

use super::model::{Relationship, RelationshipKind};
use std::collections::{HashMap, VecDeque};

/// One edge traversal: which relationship, and whether it was followed
/// forward (as declared) or backward (via the reverse index).
#[derive(Debug, Clone)]
pub struct Hop {
    pub from: String,
    pub to: String,
    pub relationship: Relationship,
    pub reversed: bool,
}

impl Hop {
    /// Join condition per §4.4, given the direction actually traversed.
    pub fn join_condition(&self, left_alias: &str, right_alias: &str) -> String {
        match (self.relationship.kind, self.reversed) {
            (RelationshipKind::BelongsTo, false) => format!(
                "{left_alias}.{} = {right_alias}.{}",
                self.relationship.foreign_key, self.relationship.primary_key
            ),
            (RelationshipKind::HasOne | RelationshipKind::HasMany, false) => format!(
                "{left_alias}.{} = {right_alias}.{}",
                self.relationship.primary_key, self.relationship.foreign_key
            ),
            (RelationshipKind::BelongsTo, true) => format!(
                "{left_alias}.{} = {right_alias}.{}",
                self.relationship.primary_key, self.relationship.foreign_key
            ),
            (RelationshipKind::HasOne | RelationshipKind::HasMany, true) => format!(
                "{left_alias}.{} = {right_alias}.{}",
                self.relationship.foreign_key, self.relationship.primary_key
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    /// cube -> outgoing relationships (as declared)
    forward: HashMap<String, Vec<(String, Relationship)>>,
    /// cube -> cubes that declare a relationship pointing at it
    reverse: HashMap<String, Vec<(String, Relationship)>>,
}

impl RelationshipGraph {
    pub fn build<'a>(cubes: impl Iterator<Item = (&'a String, &'a super::model::Cube)>) -> Self {
        let mut forward: HashMap<String, Vec<(String, Relationship)>> = HashMap::new();
        let mut reverse: HashMap<String, Vec<(String, Relationship)>> = HashMap::new();
        for (name, cube) in cubes {
            for rel in cube.relationships.values() {
                forward
                    .entry(name.clone())
                    .or_default()
                    .push((rel.cube.clone(), rel.clone()));
                reverse
                    .entry(rel.cube.clone())
                    .or_default()
                    .push((name.clone(), rel.clone()));
            }
        }
        Self { forward, reverse }
    }

    /// BFS shortest path from `from` to `to` over the undirected projection
    /// of forward+reverse edges. Returns the hop sequence, or `None` if
    /// unreachable. Deterministic: neighbors are visited in a stable,
    /// name-sorted order so equal-length paths resolve lexicographically
    /// (DESIGN.md Open Question 2).
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<Hop>> {
        if from == to {
            return Some(Vec::new());
        }
        let mut visited = std::collections::HashSet::new();
        visited.insert(from.to_string());
        let mut queue: VecDeque<(String, Vec<Hop>)> = VecDeque::new();
        queue.push_back((from.to_string(), Vec::new()));

        while let Some((current, path)) = queue.pop_front() {
            for (next, hop) in self.neighbors_sorted(&current) {
                if next == to {
                    let mut full = path.clone();
                    full.push(hop);
                    return Some(full);
                }
                if visited.insert(next.clone()) {
                    let mut full = path.clone();
                    full.push(hop);
                    queue.push_back((next, full));
                }
            }
        }
        None
    }

    fn neighbors_sorted(&self, cube: &str) -> Vec<(String, Hop)> {
        let mut out = Vec::new();
        if let Some(edges) = self.forward.get(cube) {
            for (target, rel) in edges {
                out.push((
                    target.clone(),
                    Hop {
                        from: cube.to_string(),
                        to: target.clone(),
                        relationship: rel.clone(),
                        reversed: false,
                    },
                ));
            }
        }
        if let Some(edges) = self.reverse.get(cube) {
            for (source, rel) in edges {
                out.push((
                    source.clone(),
                    Hop {
                        from: cube.to_string(),
                        to: source.clone(),
                        relationship: rel.clone(),
                        reversed: true,
                    },
                ));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::Cube;
    use std::collections::HashMap as Map;

    fn cube_with_rel(name: &str, rel_name: &str, target: &str) -> Cube {
        let mut relationships = Map::new();
        relationships.insert(
            rel_name.to_string(),
            Relationship {
                name: rel_name.to_string(),
                kind: RelationshipKind::BelongsTo,
                cube: target.to_string(),
                foreign_key: format!("{target}_id"),
                primary_key: "id".to_string(),
            },
        );
        Cube {
            name: name.to_string(),
            table: Some(name.to_string()),
            sql: None,
            dimensions: Map::new(),
            measures: Map::new(),
            relationships,
            security: Default::default(),
            pre_aggregations: vec![],
        }
    }

    #[test]
    fn finds_two_hop_path() {
        let orders = cube_with_rel("orders", "customer", "customers");
        let customers = cube_with_rel("customers", "country", "countries");
        let countries = Cube {
            name: "countries".into(),
            table: Some("countries".into()),
            sql: None,
            dimensions: Map::new(),
            measures: Map::new(),
            relationships: Map::new(),
            security: Default::default(),
            pre_aggregations: vec![],
        };
        let mut cubes = Map::new();
        cubes.insert("orders".to_string(), orders);
        cubes.insert("customers".to_string(), customers);
        cubes.insert("countries".to_string(), countries);

        let graph = RelationshipGraph::build(cubes.iter());
        let path = graph.shortest_path("orders", "countries").unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].to, "customers");
        assert_eq!(path[1].to, "countries");
        assert!(!path[0].reversed);
    }

    #[test]
    fn no_path_returns_none() {
        let orders = Cube {
            name: "orders".into(),
            table: Some("orders".into()),
            sql: None,
            dimensions: Map::new(),
            measures: Map::new(),
            relationships: Map::new(),
            security: Default::default(),
            pre_aggregations: vec![],
        };
        let mut cubes = Map::new();
        cubes.insert("orders".to_string(), orders);
        let graph = RelationshipGraph::build(cubes.iter());
        assert!(graph.shortest_path("orders", "nowhere").is_none());
    }
}
