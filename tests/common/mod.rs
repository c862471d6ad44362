//! Shared fixture schema for the end-to-end scenario tests: an
//! `orders -> customers -> countries` belongs_to chain matching the cubes
//! named across the six scenarios, plus small helpers to wire up an
//! `Orchestrator` against an in-memory `FixtureDriver` + `MemoryCache`.

use std::collections::HashMap as Map;
use std::sync::Arc;
use std::time::Duration;

use semantic_core::cache::MemoryCache;
use semantic_core::callbacks::CallbackManager;
use semantic_core::driver::{Driver, FixtureDriver};
use semantic_core::orchestrator::Orchestrator;
use semantic_core::preagg::PreAggregationRegistry;
use semantic_core::schema::compiler::compile;
use semantic_core::schema::model::{
    Cube, Dimension, DimensionType, Measure, MeasureType, Relationship, RelationshipKind, Schema,
};

pub fn schema() -> Arc<Schema> {
    let mut orders_dimensions = Map::new();
    orders_dimensions.insert(
        "status".to_string(),
        Dimension { name: "status".into(), kind: DimensionType::String, sql: Some("status".into()), expression: None, primary_key: false, granularities: vec![] },
    );
    orders_dimensions.insert(
        "id".to_string(),
        Dimension { name: "id".into(), kind: DimensionType::Number, sql: Some("id".into()), expression: None, primary_key: true, granularities: vec![] },
    );
    orders_dimensions.insert(
        "created_at".to_string(),
        Dimension { name: "created_at".into(), kind: DimensionType::Time, sql: Some("created_at".into()), expression: None, primary_key: false, granularities: vec!["day".into()] },
    );

    let mut orders_measures = Map::new();
    orders_measures.insert(
        "count".to_string(),
        Measure { name: "count".into(), kind: MeasureType::Count, sql: Some("id".into()), expression: None, formula: None },
    );
    orders_measures.insert(
        "total_revenue".to_string(),
        Measure { name: "total_revenue".into(), kind: MeasureType::Sum, sql: Some("total_amount".into()), expression: None, formula: None },
    );

    let mut orders_relationships = Map::new();
    orders_relationships.insert(
        "customer".to_string(),
        Relationship { name: "customer".into(), kind: RelationshipKind::BelongsTo, cube: "customers".into(), foreign_key: "customer_id".into(), primary_key: "id".into() },
    );

    let orders = Cube {
        name: "orders".into(),
        table: Some("orders".into()),
        sql: None,
        dimensions: orders_dimensions,
        measures: orders_measures,
        relationships: orders_relationships,
        security: Default::default(),
        pre_aggregations: vec![],
    };

    let mut customers_relationships = Map::new();
    customers_relationships.insert(
        "country".to_string(),
        Relationship { name: "country".into(), kind: RelationshipKind::BelongsTo, cube: "countries".into(), foreign_key: "country_id".into(), primary_key: "id".into() },
    );
    let customers = Cube {
        name: "customers".into(),
        table: Some("customers".into()),
        sql: None,
        dimensions: Map::new(),
        measures: Map::new(),
        relationships: customers_relationships,
        security: Default::default(),
        pre_aggregations: vec![],
    };

    let mut countries_dimensions = Map::new();
    countries_dimensions.insert(
        "name".to_string(),
        Dimension { name: "name".into(), kind: DimensionType::String, sql: Some("name".into()), expression: None, primary_key: false, granularities: vec![] },
    );
    let countries = Cube {
        name: "countries".into(),
        table: Some("countries".into()),
        sql: None,
        dimensions: countries_dimensions,
        measures: Map::new(),
        relationships: Map::new(),
        security: Default::default(),
        pre_aggregations: vec![],
    };

    Arc::new(compile(vec![orders, customers, countries], "test").expect("fixture schema must compile"))
}

pub fn orchestrator(driver: Arc<dyn Driver>) -> Orchestrator {
    Orchestrator::new(
        schema(),
        Arc::new(MemoryCache::new()),
        driver,
        Arc::new(CallbackManager::new()),
        Duration::from_secs(60),
        "rollups",
        PreAggregationRegistry::new(),
    )
}

pub fn row(pairs: &[(&str, serde_json::Value)]) -> Map<String, serde_json::Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub fn driver_with_rows(rows: Vec<Map<String, serde_json::Value>>) -> Arc<dyn Driver> {
    Arc::new(FixtureDriver::new(rows))
}

pub fn empty_driver() -> Arc<dyn Driver> {
    Arc::new(FixtureDriver::empty())
}
