//! semantic-core
//!
//! A headless semantic-layer (analytics/BI) engine: cube/dimension/measure
//! schema compilation, multi-hop join planning, SQL generation, row-level
//! security, pre-aggregation matching, and query orchestration around a
//! pluggable cache/driver backend.

use std::sync::Arc;
use std::time::Duration;

pub mod cache;
pub mod callbacks;
pub mod config;
pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod preagg;
pub mod query;
pub mod schema;
pub mod security;
pub mod sql;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result};

/// Application shared state: every long-lived collaborator wrapped in
/// `Arc` for cheap cloning and thread-safe sharing across request tasks.
///
/// Design Philosophy: the schema generation is the one piece of state that
/// changes underneath a running server (hot reload); everything else is
/// fixed for the process lifetime.
#[derive(Clone)]
pub struct AppState {
    pub schema_registry: Arc<schema::compiler::SchemaRegistry>,
    pub cache: Arc<dyn cache::Cache>,
    pub driver: Arc<dyn driver::Driver>,
    pub callbacks: Arc<callbacks::CallbackManager>,
    pub cache_ttl: Duration,
    pub preagg_storage_schema: String,
    /// Shared with the `PreAggregationManager` driving background refreshes,
    /// so the orchestrator only rewrites to a rollup table once it has
    /// actually been populated.
    pub preagg_registry: Arc<preagg::PreAggregationRegistry>,
}

impl AppState {
    /// Builds an `Orchestrator` bound to the currently-active schema
    /// generation. Cheap: everything it holds is an `Arc`.
    pub fn orchestrator(&self) -> orchestrator::Orchestrator {
        orchestrator::Orchestrator::new(
            self.schema_registry.current(),
            self.cache.clone(),
            self.driver.clone(),
            self.callbacks.clone(),
            self.cache_ttl,
            self.preagg_storage_schema.clone(),
            self.preagg_registry.clone(),
        )
    }
}
