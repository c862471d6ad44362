//! Accumulated schema validation, grounded on
//! `original_source/semantic_layer/schema/validator.py`.

use super::model::Cube;
use crate::error::ModelError;
use std::collections::HashMap;

pub fn validate_cube(cube: &Cube) -> Vec<ModelError> {
    let mut errors = Vec::new();

    if cube.name.is_empty() {
        errors.push(ModelError::EmptyCube("<unnamed>".to_string()));
    }
    if cube.table.is_none() && cube.sql.is_none() {
        errors.push(ModelError::MissingTableSource(cube.name.clone()));
    }
    if cube.dimensions.is_empty() && cube.measures.is_empty() {
        errors.push(ModelError::EmptyCube(cube.name.clone()));
    }
    for (dim_name, dim) in &cube.dimensions {
        if !dim.has_expression() {
            errors.push(ModelError::DimensionMissingExpression {
                cube: cube.name.clone(),
                dimension: dim_name.clone(),
            });
        }
    }
    for (measure_name, measure) in &cube.measures {
        if !measure.has_expression() {
            errors.push(ModelError::MeasureMissingExpression {
                cube: cube.name.clone(),
                measure: measure_name.clone(),
            });
        }
    }
    errors
}

/// Validates the whole schema: per-cube invariants plus relationship target
/// existence, which requires every cube to already be present.
pub fn validate_schema(cubes: &HashMap<String, Cube>) -> Vec<ModelError> {
    let mut errors = Vec::new();
    for cube in cubes.values() {
        errors.extend(validate_cube(cube));
    }
    for cube in cubes.values() {
        for rel in cube.relationships.values() {
            if !cubes.contains_key(&rel.cube) {
                errors.push(ModelError::UnknownRelationshipTarget {
                    cube: cube.name.clone(),
                    relationship: rel.name.clone(),
                    target: rel.cube.clone(),
                });
            }
        }
    }
    errors
}
