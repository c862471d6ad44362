pub mod builder;
pub mod filter;
pub mod join;
pub mod optimizer;

pub use builder::{BuildOutput, SqlBuilder};
pub use optimizer::QueryOptimizer;
