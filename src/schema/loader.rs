//! YAML cube file loading per §6's schema file format and §4.1's shorthand
//! normalization ("a string value for a dimension means that is its SQL
//! expression"). Grounded on the YAML usage pattern confirmed elsewhere in
//! the retrieval pack (`serde_yaml`) and on
//! `original_source/semantic_layer/schema/compiler.py`'s per-cube-file load.

use super::model::{Cube, Dimension, Measure, PreAggregationSpec, Relationship, Security};
use crate::error::ConfigurationError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CubeFile {
    name: String,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    dimensions: HashMap<String, DimensionShorthand>,
    #[serde(default)]
    measures: HashMap<String, Measure>,
    #[serde(default)]
    relationships: HashMap<String, Relationship>,
    #[serde(default)]
    security: Security,
    #[serde(default)]
    pre_aggregations: Vec<PreAggregationSpec>,
}

/// A dimension entry is either a bare SQL string or a full dimension map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DimensionShorthand {
    Sql(String),
    Full(Dimension),
}

impl From<CubeFile> for Cube {
    fn from(file: CubeFile) -> Self {
        let dimensions = file
            .dimensions
            .into_iter()
            .map(|(name, raw)| {
                let mut dim = match raw {
                    DimensionShorthand::Sql(sql) => Dimension {
                        name: name.clone(),
                        kind: super::model::DimensionType::String,
                        sql: Some(sql),
                        expression: None,
                        primary_key: false,
                        granularities: Vec::new(),
                    },
                    DimensionShorthand::Full(d) => d,
                };
                dim.name = name.clone();
                (name, dim)
            })
            .collect();

        let measures = file
            .measures
            .into_iter()
            .map(|(name, mut m)| {
                m.name = name.clone();
                (name, m)
            })
            .collect();

        let relationships = file
            .relationships
            .into_iter()
            .map(|(name, mut r)| {
                r.name = name.clone();
                (name, r)
            })
            .collect();

        Cube {
            name: file.name,
            table: file.table,
            sql: file.sql,
            dimensions,
            measures,
            relationships,
            security: file.security,
            pre_aggregations: file.pre_aggregations,
        }
    }
}

/// Loads every `*.yml`/`*.yaml` file in `dir` as one cube each. A single
/// file containing a YAML stream of multiple documents is also accepted
/// (multiple cubes per file, per §4.1).
pub fn load_dir(dir: &Path) -> Result<Vec<Cube>, ConfigurationError> {
    let mut cubes = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigurationError::Io {
        path: dir.display().to_string(),
        source,
    })?;
    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yml") | Some("yaml")
            )
        })
        .collect();
    paths.sort();

    for path in paths {
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigurationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        for document in serde_yaml::Deserializer::from_str(&content) {
            let file = CubeFile::deserialize(document).map_err(|e| ConfigurationError::Invalid {
                key: path.display().to_string(),
                message: e.to_string(),
            })?;
            cubes.push(Cube::from(file));
        }
    }
    Ok(cubes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_dimension_shorthand_and_full_form() {
        let dir = tempdir();
        let mut f = std::fs::File::create(dir.join("orders.yml")).unwrap();
        writeln!(
            f,
            r#"
name: orders
table: public.orders
dimensions:
  status: status
  created_at: { type: time, sql: created_at, granularities: [day, month] }
measures:
  count: { type: count, sql: id }
"#
        )
        .unwrap();

        let cubes = load_dir(&dir).unwrap();
        assert_eq!(cubes.len(), 1);
        let cube = &cubes[0];
        assert_eq!(cube.name, "orders");
        assert_eq!(cube.dimensions["status"].sql.as_deref(), Some("status"));
        assert_eq!(cube.dimensions["created_at"].granularities, vec!["day", "month"]);
        assert_eq!(cube.measures["count"].name, "count");
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "semantic-core-test-{:?}",
            std::thread::current().id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
