//! Tracks which pre-aggregation rollup tables have actually been
//! populated, grounded on spec §4.9's "check the rollup table exists"
//! step: a freshly-declared pre-aggregation matches a query shape before
//! [`super::manager::PreAggregationManager`] has ever run its refresh, and
//! rewriting to it that early would point at an empty or missing table.
//! [`PreAggregationManager`](super::manager::PreAggregationManager) marks a
//! table here only after a `RefreshTask` completes successfully; the
//! orchestrator consults it before honoring a pre-aggregation match.

use dashmap::DashSet;
use std::sync::Arc;

#[derive(Default)]
pub struct PreAggregationRegistry {
    populated: DashSet<String>,
}

impl PreAggregationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_populated(&self, table: &str) {
        self.populated.insert(table.to_string());
    }

    pub fn is_populated(&self, table: &str) -> bool {
        self.populated.contains(table)
    }
}
