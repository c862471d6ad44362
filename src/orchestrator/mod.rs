//! Query orchestrator (§4.10), grounded on
//! `original_source/semantic_layer/orchestrator/orchestrator.py`: the
//! pipeline wired around the compiler — compareDateRange fan-out, cache
//! lookup, pre-aggregation match, compile+execute, formatting, callbacks.

pub mod format;

use crate::cache::Cache;
use crate::callbacks::{CallbackManager, Event};
use crate::driver::Driver;
use crate::error::{Error, ExecutionError};
use crate::preagg;
use crate::preagg::registry::PreAggregationRegistry;
use crate::query::ast::Query;
use crate::schema::model::Schema;
use crate::security::context::SecurityContext;
use crate::sql::{BuildOutput, QueryOptimizer, SqlBuilder};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct QueryMeta {
    pub query: Value,
    pub execution_time_ms: f64,
    pub row_count: usize,
    pub cache_hit: bool,
    pub pre_aggregation_used: bool,
    pub query_cost: i64,
    pub sql: String,
    pub compare_date_range: Option<bool>,
}

pub struct QueryResult {
    pub data: Vec<Map<String, Value>>,
    pub meta: QueryMeta,
}

impl QueryResult {
    pub fn to_json(&self) -> Value {
        json!({
            "data": self.data,
            "meta": {
                "query": self.meta.query,
                "execution_time_ms": self.meta.execution_time_ms,
                "row_count": self.meta.row_count,
                "cache_hit": self.meta.cache_hit,
                "pre_aggregation_used": self.meta.pre_aggregation_used,
                "query_cost": self.meta.query_cost,
                "sql": self.meta.sql,
                "compare_date_range": self.meta.compare_date_range,
            }
        })
    }
}

pub struct BlendingResult {
    pub data: Vec<QueryResult>,
}

impl BlendingResult {
    pub fn to_json(&self) -> Value {
        json!({
            "data": self.data.iter().map(QueryResult::to_json).collect::<Vec<_>>(),
            "blending_query": true,
        })
    }
}

pub struct Orchestrator {
    schema: Arc<Schema>,
    cache: Arc<dyn Cache>,
    driver: Arc<dyn Driver>,
    callbacks: Arc<CallbackManager>,
    optimizer: QueryOptimizer,
    cache_ttl: Duration,
    preagg_storage_schema: String,
    preagg_registry: Arc<PreAggregationRegistry>,
}

impl Orchestrator {
    pub fn new(
        schema: Arc<Schema>,
        cache: Arc<dyn Cache>,
        driver: Arc<dyn Driver>,
        callbacks: Arc<CallbackManager>,
        cache_ttl: Duration,
        preagg_storage_schema: impl Into<String>,
        preagg_registry: Arc<PreAggregationRegistry>,
    ) -> Self {
        Self {
            schema,
            cache,
            driver,
            callbacks,
            optimizer: QueryOptimizer::new(),
            cache_ttl,
            preagg_storage_schema: preagg_storage_schema.into(),
            preagg_registry,
        }
    }

    /// Single entry point: a single query, or a blending array of queries.
    pub async fn execute_one_or_many(
        &self,
        queries: Vec<Query>,
        security_context: Option<&SecurityContext>,
    ) -> Result<Value, Error> {
        if queries.len() == 1 {
            let result = self.execute(queries.into_iter().next().unwrap(), security_context).await?;
            Ok(result.to_json())
        } else {
            let mut data = Vec::with_capacity(queries.len());
            for query in queries {
                data.push(self.execute(query, security_context).await?);
            }
            Ok(BlendingResult { data }.to_json())
        }
    }

    /// `execute(query, security_context) -> result` (§4.10).
    pub async fn execute(&self, query: Query, security_context: Option<&SecurityContext>) -> Result<QueryResult, Error> {
        query.validate()?;

        let request_id = uuid::Uuid::new_v4().to_string();
        self.callbacks.emit(Event::QueryStart { request_id: request_id.clone() });

        let compare_dim_index = query
            .time_dimensions
            .iter()
            .position(|td| td.compare_date_range.is_some());

        let result = match compare_dim_index {
            Some(idx) => self.execute_compare_fan_out(query, idx, security_context, &request_id).await,
            None => self.execute_single(query, security_context, &request_id).await,
        };

        match &result {
            Ok(r) => self.callbacks.emit(Event::QueryEnd {
                request_id,
                row_count: r.data.len(),
                execution_time_ms: r.meta.execution_time_ms,
            }),
            Err(e) => self.callbacks.emit(Event::QueryError { request_id, message: e.to_string() }),
        }

        result
    }

    async fn execute_compare_fan_out(
        &self,
        query: Query,
        time_dimension_index: usize,
        security_context: Option<&SecurityContext>,
        request_id: &str,
    ) -> Result<QueryResult, Error> {
        let ranges = query.time_dimensions[time_dimension_index]
            .compare_date_range
            .clone()
            .expect("caller verified compare_date_range is Some");

        let mut data = Vec::new();
        let mut last_sql = String::new();
        let mut any_pre_agg_used = false;
        let mut last_cost = 0;
        let started = Instant::now();

        for range in &ranges {
            let mut clone = query.clone();
            clone.time_dimensions[time_dimension_index].date_range = Some(range.clone());
            clone.time_dimensions[time_dimension_index].compare_date_range = None;

            let sub_result = self.execute_single(clone, security_context, request_id).await?;
            let tag = range.join(" to ");
            for mut row in sub_result.data {
                row.insert("_compareDateRange".to_string(), Value::String(tag.clone()));
                data.push(row);
            }
            last_sql = sub_result.meta.sql;
            any_pre_agg_used |= sub_result.meta.pre_aggregation_used;
            last_cost = sub_result.meta.query_cost;
        }

        Ok(QueryResult {
            meta: QueryMeta {
                query: serde_json::to_value(&query).unwrap_or(Value::Null),
                execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                row_count: data.len(),
                cache_hit: false,
                pre_aggregation_used: any_pre_agg_used,
                query_cost: last_cost,
                sql: last_sql,
                compare_date_range: Some(true),
            },
            data,
        })
    }

    async fn execute_single(
        &self,
        query: Query,
        security_context: Option<&SecurityContext>,
        request_id: &str,
    ) -> Result<QueryResult, Error> {
        let started = Instant::now();
        let optimized = self.optimizer.optimize(&query);
        let query_cost = self.optimizer.estimate_cost(&optimized);

        let required_cubes = optimized.required_cubes();
        let mut table_override: HashMap<String, String> = HashMap::new();
        let mut pre_aggregation_used = false;

        for cube_name in &required_cubes {
            if let Some(cube) = self.schema.get_cube(cube_name) {
                match preagg::find_match(cube_name, cube, &optimized) {
                    Some(m) => {
                        let table = preagg::definition::table_name(&self.preagg_storage_schema, cube_name, m.definition);
                        if self.preagg_registry.is_populated(&table) {
                            self.callbacks.emit(Event::PreAggUsed { cube: cube_name.clone(), table: table.clone() });
                            table_override.insert(cube_name.clone(), table);
                            pre_aggregation_used = true;
                        } else {
                            self.callbacks.emit(Event::PreAggSkipped {
                                cube: cube_name.clone(),
                                reason: "matching pre-aggregation has not been refreshed yet".to_string(),
                            });
                        }
                    }
                    None => {
                        self.callbacks.emit(Event::PreAggSkipped {
                            cube: cube_name.clone(),
                            reason: "no matching pre-aggregation".to_string(),
                        });
                    }
                }
            }
        }

        let cache_key = format!(
            "query:{}",
            crate::cache::key::generate(&optimized, &self.schema, security_context)
        );

        if let Some(cached) = self.cache.get(&cache_key).await {
            self.callbacks.emit(Event::CacheHit { key: cache_key.clone() });
            return Ok(cached_to_result(cached, started.elapsed()));
        }
        self.callbacks.emit(Event::CacheMiss { key: cache_key.clone() });

        let BuildOutput { sql, dropped_order_by } = SqlBuilder::new(&self.schema)
            .build(&optimized, security_context, &table_override)
            .map_err(Error::from)?;
        for dropped in &dropped_order_by {
            tracing::warn!(request_id, member = %dropped, "order_by entry resolved to neither a dimension nor a measure; dropped");
        }

        self.callbacks.emit(Event::SqlGenerated { sql: sql.clone(), elapsed: started.elapsed() });

        let rows = self
            .driver
            .execute(&sql)
            .await
            .map_err(|e| Error::from(ExecutionError::Driver(e.to_string())))?;
        let formatted = format::format_rows(rows);

        let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        let meta = QueryMeta {
            query: serde_json::to_value(&optimized).unwrap_or(Value::Null),
            execution_time_ms,
            row_count: formatted.len(),
            cache_hit: false,
            pre_aggregation_used,
            query_cost,
            sql: sql.clone(),
            compare_date_range: None,
        };

        let cache_value = json!({
            "data": formatted,
            "sql": sql,
            "pre_aggregation_used": pre_aggregation_used,
            "query_cost": query_cost,
        });
        self.cache.set(cache_key, cache_value, self.cache_ttl).await;

        Ok(QueryResult { data: formatted, meta })
    }
}

fn cached_to_result(cached: Value, elapsed: Duration) -> QueryResult {
    let data: Vec<Map<String, Value>> = cached
        .get("data")
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .filter_map(|r| r.as_object().cloned())
                .collect()
        })
        .unwrap_or_default();
    let sql = cached.get("sql").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let pre_aggregation_used = cached.get("pre_aggregation_used").and_then(|v| v.as_bool()).unwrap_or(false);
    let query_cost = cached.get("query_cost").and_then(|v| v.as_i64()).unwrap_or(0);

    QueryResult {
        meta: QueryMeta {
            query: Value::Null,
            execution_time_ms: elapsed.as_secs_f64() * 1000.0,
            row_count: data.len(),
            cache_hit: true,
            pre_aggregation_used,
            query_cost,
            sql,
            compare_date_range: None,
        },
        data,
    }
}
