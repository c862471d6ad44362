pub mod ast;
pub mod date_range;

pub use ast::{Cte, Filter, FilterValue, LogicalKind, OrderBy, OrderDirection, Query, TimeDimension};
