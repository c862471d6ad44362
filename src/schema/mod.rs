pub mod compiler;
pub mod graph;
pub mod loader;
pub mod model;
pub mod validator;

pub use compiler::{compile, compile_dir, SchemaRegistry};
pub use graph::{Hop, RelationshipGraph};
pub use model::{
    Cube, Dimension, DimensionType, Measure, MeasureType, PreAggregationSpec, Relationship,
    RelationshipKind, Schema, Security,
};
