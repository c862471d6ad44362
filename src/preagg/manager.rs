//! Pre-aggregation refresh wiring (§4.9): builds one [`scheduler::RefreshTask`]
//! per declared definition, starts a [`ScheduledExecutor`] for each on the
//! configured interval, and exposes the public "refresh now by name"
//! operation for an off-cycle rebuild. Grounded on
//! `original_source/semantic_layer/scheduling/scheduler.py`'s manager loop
//! and the teacher's `ScheduledExecutor` driver.

use super::{definition, scheduler};
use super::registry::PreAggregationRegistry;
use crate::driver::Driver;
use crate::error::{Error, QueryError};
use crate::query::ast::{Query, TimeDimension};
use crate::schema::model::{PreAggregationSpec, Schema};
use crate::sql::SqlBuilder;
use crate::utils::scheduled_executor::ScheduledExecutor;
use std::collections::HashMap;
use std::sync::Arc;

/// Truncate-then-repopulate refresh, issued as two sequential driver calls
/// (§4.9) so drivers that only accept one statement per `execute` still work.
pub struct RefreshTask {
    pub cube_name: String,
    pub definition: PreAggregationSpec,
    pub table: String,
    pub driver: Arc<dyn Driver>,
    pub select_sql: String,
    pub registry: Arc<PreAggregationRegistry>,
}

impl crate::utils::scheduled_executor::ScheduledTask for RefreshTask {
    fn run(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                cube = %self.cube_name,
                preagg = %self.definition.name,
                table = %self.table,
                "refreshing pre-aggregation"
            );
            self.driver
                .execute(&format!("TRUNCATE TABLE {}", self.table))
                .await
                .map_err(|e| anyhow::anyhow!("pre-aggregation truncate failed: {e}"))?;
            self.driver
                .execute(&format!("INSERT INTO {} {}", self.table, self.select_sql))
                .await
                .map_err(|e| anyhow::anyhow!("pre-aggregation repopulate failed: {e}"))?;
            self.registry.mark_populated(&self.table);
            Ok(())
        })
    }
}

/// Owns the background refresh loops for every pre-aggregation definition
/// in a schema generation. One `Arc<Schema>` per manager, matching the
/// orchestrator's generation-scoped lifetime. Shares its
/// [`PreAggregationRegistry`] with the orchestrator so a match is only
/// honored once this manager has actually populated the rollup table.
pub struct PreAggregationManager {
    schema: Arc<Schema>,
    driver: Arc<dyn Driver>,
    storage_schema: String,
    registry: Arc<PreAggregationRegistry>,
}

impl PreAggregationManager {
    pub fn new(
        schema: Arc<Schema>,
        driver: Arc<dyn Driver>,
        storage_schema: impl Into<String>,
        registry: Arc<PreAggregationRegistry>,
    ) -> Self {
        Self { schema, driver, storage_schema: storage_schema.into(), registry }
    }

    /// The registry this manager reports refreshes into; clone into the
    /// orchestrator so both sides agree on which tables are fresh.
    pub fn registry(&self) -> Arc<PreAggregationRegistry> {
        self.registry.clone()
    }

    /// Spawns one long-lived task per definition that declares a
    /// `refresh_key.every` interval. Definitions without an interval are
    /// never scheduled (they can still be rebuilt via [`Self::refresh_now`]).
    pub fn spawn_refresh_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        for (cube_name, cube) in &self.schema.cubes {
            for spec in &cube.pre_aggregations {
                let Some(every) = &spec.refresh_key.every else { continue };
                let task = match self.build_task(cube_name, spec) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::error!(cube = %cube_name, preagg = %spec.name, error = %e, "skipping pre-aggregation: cannot build refresh query");
                        continue;
                    }
                };
                let interval = scheduler::parse_interval(every);
                let executor = ScheduledExecutor::new(format!("preagg-refresh-{cube_name}-{}", spec.name), interval);
                handles.push(tokio::spawn(executor.start(task)));
            }
        }
        handles
    }

    /// Public "refresh now by name" (§4.9): triggers the same rebuild used
    /// by the scheduled loop, off-cycle, regardless of whether the
    /// definition declares an interval at all.
    pub async fn refresh_now(&self, cube_name: &str, preagg_name: &str) -> Result<(), Error> {
        let cube = self
            .schema
            .get_cube(cube_name)
            .ok_or_else(|| QueryError::UnknownCube(cube_name.to_string()))?;
        let spec = cube
            .pre_aggregations
            .iter()
            .find(|s| s.name == preagg_name)
            .ok_or_else(|| QueryError::UnknownField { cube: cube_name.to_string(), field: preagg_name.to_string() })?;
        let task = self.build_task(cube_name, spec)?;
        crate::utils::scheduled_executor::ScheduledTask::run(&task)
            .await
            .map_err(|e| Error::Execution(crate::error::ExecutionError::Driver(e.to_string())))
    }

    fn build_task(&self, cube_name: &str, spec: &PreAggregationSpec) -> Result<RefreshTask, QueryError> {
        let table = definition::table_name(&self.storage_schema, cube_name, spec);
        let select_sql = self.build_select(cube_name, spec)?;
        Ok(RefreshTask {
            cube_name: cube_name.to_string(),
            definition: spec.clone(),
            table,
            driver: self.driver.clone(),
            select_sql,
            registry: self.registry.clone(),
        })
    }

    /// The query a rollup table is populated from: every declared
    /// dimension/measure, plus the time dimension at its declared
    /// granularity if any, against the cube's live (non-overridden) table.
    fn build_select(&self, cube_name: &str, spec: &PreAggregationSpec) -> Result<String, QueryError> {
        let query = Query {
            dimensions: spec.dimensions.iter().map(|d| format!("{cube_name}.{d}")).collect(),
            measures: spec.measures.iter().map(|m| format!("{cube_name}.{m}")).collect(),
            time_dimensions: spec
                .time_dimension
                .as_ref()
                .map(|td| {
                    vec![TimeDimension {
                        dimension: format!("{cube_name}.{td}"),
                        granularity: spec.granularity.clone(),
                        date_range: None,
                        compare_date_range: None,
                    }]
                })
                .unwrap_or_default(),
            ..Default::default()
        };
        let output = SqlBuilder::new(&self.schema).build(&query, None, &HashMap::new())?;
        Ok(output.sql)
    }
}
