use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use semantic_core::cache::MemoryCache;
use semantic_core::callbacks::{CallbackManager, LogObserver, MetricsObserver};
use semantic_core::config::{Command, CommandLineArgs, Config};
use semantic_core::driver::FixtureDriver;
use semantic_core::orchestrator::Orchestrator;
use semantic_core::preagg::PreAggregationRegistry;
use semantic_core::query::ast::{Filter, FilterValue, Query, TimeDimension};
use semantic_core::schema::compiler::{compile, SchemaRegistry};
use semantic_core::schema::model::{
    Cube, Dimension, DimensionType, Measure, MeasureType, Relationship, RelationshipKind,
};
use semantic_core::security::SecurityContext;
use semantic_core::AppState;
use std::collections::HashMap as Map;

fn init_logging(config: &Config) {
    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path.file_name().and_then(|n| n.to_str()).unwrap_or("semantic-core.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
        std::mem::forget(_guard);
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CommandLineArgs::parse();
    let config = match Config::load(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);

    let result = match &args.command {
        Command::Validate { .. } => run_validate(&config),
        Command::Dev { .. } => run_dev(config).await,
        Command::Test { .. } => run_test(&config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run_validate(config: &Config) -> Result<(), semantic_core::Error> {
    let schema = semantic_core::schema::compiler::compile_dir(std::path::Path::new(&config.schema.dir), "1")?;
    tracing::info!(cubes = schema.cubes.len(), "schema compiled successfully");
    for name in schema.cubes.keys() {
        tracing::info!(cube = %name, "validated cube");
    }
    Ok(())
}

async fn run_dev(config: Config) -> Result<(), semantic_core::Error> {
    let schema_registry = Arc::new(SchemaRegistry::load(config.schema.dir.clone())?);
    let driver: Arc<dyn semantic_core::driver::Driver> = Arc::new(FixtureDriver::empty());
    let preagg_registry = semantic_core::preagg::PreAggregationRegistry::new();
    let state = Arc::new(AppState {
        schema_registry: schema_registry.clone(),
        cache: Arc::new(MemoryCache::new()),
        driver: driver.clone(),
        callbacks: build_callbacks(),
        cache_ttl: Duration::from_secs(config.cache.ttl_secs),
        preagg_storage_schema: config.pre_aggregation.storage_schema.clone(),
        preagg_registry: preagg_registry.clone(),
    });

    let preagg_manager = semantic_core::preagg::PreAggregationManager::new(
        schema_registry.current(),
        driver,
        config.pre_aggregation.storage_schema.clone(),
        preagg_registry,
    );
    let _refresh_handles = preagg_manager.spawn_refresh_tasks();

    let app = Router::new()
        .route("/health", get(health))
        .route("/query", post(handle_query))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| semantic_core::error::Error::Configuration(semantic_core::error::ConfigurationError::Invalid {
            key: "server".into(),
            message: e.to_string(),
        }))?;

    tracing::info!("semantic-core dev server listening on http://{addr}");
    axum::serve(listener, app)
        .await
        .map_err(|e| semantic_core::error::Error::Configuration(semantic_core::error::ConfigurationError::Invalid {
            key: "server".into(),
            message: e.to_string(),
        }))
}

/// `test <path>`: validates the user's schema, then runs the six §8 canned
/// scenario queries against an internal fixture schema and `FixtureDriver`,
/// reporting pass/fail per scenario. Exits non-zero (via the `Err` return)
/// if any scenario's assertions fail.
async fn run_test(config: &Config) -> Result<(), semantic_core::Error> {
    let user_schema = semantic_core::schema::compiler::compile_dir(std::path::Path::new(&config.schema.dir), "1")?;
    tracing::info!(cubes = user_schema.cubes.len(), "schema validated");

    let outcomes = run_canned_scenarios().await;
    let failed: Vec<&ScenarioOutcome> = outcomes.iter().filter(|o| !o.passed).collect();
    for outcome in &outcomes {
        if outcome.passed {
            tracing::info!(scenario = outcome.name, "PASS");
        } else {
            tracing::error!(scenario = outcome.name, detail = %outcome.detail, "FAIL");
        }
    }

    if !failed.is_empty() {
        return Err(semantic_core::error::Error::Execution(
            semantic_core::error::ExecutionError::Driver(format!(
                "{} of {} canned scenarios failed",
                failed.len(),
                outcomes.len()
            )),
        ));
    }

    tracing::info!("all canned scenarios passed");
    Ok(())
}

struct ScenarioOutcome {
    name: &'static str,
    passed: bool,
    detail: String,
}

fn check(name: &'static str, condition: bool, detail: impl Into<String>) -> ScenarioOutcome {
    ScenarioOutcome { name, passed: condition, detail: detail.into() }
}

/// Self-contained `orders -> customers -> countries` schema matching the
/// cubes/dimensions/measures named across the six canned scenarios.
fn canned_schema() -> Arc<semantic_core::schema::model::Schema> {
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

    Arc::new(compile(vec![orders, customers, countries], "canned").expect("canned schema must compile"))
}

fn canned_orchestrator(driver: Arc<dyn semantic_core::driver::Driver>) -> Orchestrator {
    Orchestrator::new(
        canned_schema(),
        Arc::new(MemoryCache::new()),
        driver,
        build_callbacks(),
        Duration::from_secs(60),
        "rollups",
        PreAggregationRegistry::new(),
    )
}

async fn run_canned_scenarios() -> Vec<ScenarioOutcome> {
    vec![
        scenario_1_simple_aggregation().await,
        scenario_2_group_by_with_filter().await,
        scenario_3_two_hop_join().await,
        scenario_4_having_vs_where_partition().await,
        scenario_5_nested_logical_filter().await,
        scenario_6_compare_date_range().await,
    ]
}

async fn scenario_1_simple_aggregation() -> ScenarioOutcome {
    let mut row = Map::new();
    row.insert("orders_count".to_string(), serde_json::json!(10));
    let orchestrator = canned_orchestrator(Arc::new(FixtureDriver::new(vec![row])));

    let query = Query { measures: vec!["orders.count".into()], ..Default::default() };
    let result = match orchestrator.execute(query, None).await {
        Ok(r) => r,
        Err(e) => return check("simple_aggregation", false, e.to_string()),
    };

    let sql_ok = result.meta.sql == "SELECT COUNT(t0.id) AS orders_count FROM orders AS t0";
    let data_ok = result.data.len() == 1
        && result.data[0].get("orders_count") == Some(&serde_json::json!(10));
    check(
        "simple_aggregation",
        sql_ok && data_ok,
        format!("sql={}, data={:?}", result.meta.sql, result.data),
    )
}

async fn scenario_2_group_by_with_filter() -> ScenarioOutcome {
    let orchestrator = canned_orchestrator(Arc::new(FixtureDriver::empty()));
    let query = Query {
        dimensions: vec!["orders.status".into()],
        measures: vec!["orders.count".into(), "orders.total_revenue".into()],
        filters: vec![Filter::Leaf {
            member: "orders.status".into(),
            operator: "equals".into(),
            values: vec![FilterValue::String("completed".into())],
        }],
        ..Default::default()
    };
    let result = match orchestrator.execute(query, None).await {
        Ok(r) => r,
        Err(e) => return check("group_by_with_filter", false, e.to_string()),
    };
    let ok = result.meta.sql.contains("WHERE t0.status = 'completed' GROUP BY t0.status");
    check("group_by_with_filter", ok, result.meta.sql)
}

async fn scenario_3_two_hop_join() -> ScenarioOutcome {
    let orchestrator = canned_orchestrator(Arc::new(FixtureDriver::empty()));
    let query = Query {
        dimensions: vec!["countries.name".into()],
        measures: vec!["orders.count".into()],
        ..Default::default()
    };
    let result = match orchestrator.execute(query, None).await {
        Ok(r) => r,
        Err(e) => return check("two_hop_join", false, e.to_string()),
    };
    // Alias numbers are assigned sorted by cube name ("countries" < "customers"
    // gets t1), even though the customers hop is joined first.
    let join1 = result.meta.sql.find("LEFT JOIN customers AS t2 ON t0.customer_id = t2.id");
    let join2 = result.meta.sql.find("LEFT JOIN countries AS t1 ON t2.country_id = t1.id");
    let ok = matches!((join1, join2), (Some(a), Some(b)) if a < b);
    check("two_hop_join", ok, result.meta.sql)
}

async fn scenario_4_having_vs_where_partition() -> ScenarioOutcome {
    let orchestrator = canned_orchestrator(Arc::new(FixtureDriver::empty()));
    let query = Query {
        dimensions: vec!["orders.status".into()],
        measures: vec!["orders.total_revenue".into()],
        filters: vec![Filter::Leaf {
            member: "orders.status".into(),
            operator: "equals".into(),
            values: vec![FilterValue::String("completed".into())],
        }],
        measure_filters: vec![Filter::Leaf {
            member: "orders.total_revenue".into(),
            operator: "gt".into(),
            values: vec![FilterValue::Number(1000.0)],
        }],
        ..Default::default()
    };
    let result = match orchestrator.execute(query, None).await {
        Ok(r) => r,
        Err(e) => return check("having_vs_where_partition", false, e.to_string()),
    };
    let sql = &result.meta.sql;
    let where_pos = sql.find("WHERE");
    let group_pos = sql.find("GROUP BY");
    let having_pos = sql.find("HAVING");
    let ordered = matches!((where_pos, group_pos, having_pos), (Some(w), Some(g), Some(h)) if w < g && g < h);
    let having_ok = sql.contains("SUM(t0.total_amount) > 1000");
    check("having_vs_where_partition", ordered && having_ok, sql.clone())
}

async fn scenario_5_nested_logical_filter() -> ScenarioOutcome {
    let orchestrator = canned_orchestrator(Arc::new(FixtureDriver::empty()));
    let query = Query {
        dimensions: vec!["orders.status".into()],
        measures: vec!["orders.total_revenue".into()],
        filters: vec![Filter::Logical {
            kind: semantic_core::query::ast::LogicalKind::Or,
            children: vec![
                Filter::Leaf {
                    member: "orders.status".into(),
                    operator: "equals".into(),
                    values: vec![FilterValue::String("completed".into())],
                },
                Filter::Logical {
                    kind: semantic_core::query::ast::LogicalKind::And,
                    children: vec![Filter::Leaf {
                        member: "orders.status".into(),
                        operator: "equals".into(),
                        values: vec![FilterValue::String("pending".into())],
                    }],
                },
            ],
        }],
        measure_filters: vec![Filter::Leaf {
            member: "orders.total_revenue".into(),
            operator: "gt".into(),
            values: vec![FilterValue::Number(50.0)],
        }],
        ..Default::default()
    };
    let result = match orchestrator.execute(query, None).await {
        Ok(r) => r,
        Err(e) => return check("nested_logical_filter", false, e.to_string()),
    };
    let sql = &result.meta.sql;
    let ok = sql.contains("OR") && sql.contains('(') && sql.contains("SUM(t0.total_amount) > 50");
    check("nested_logical_filter", ok, sql.clone())
}

async fn scenario_6_compare_date_range() -> ScenarioOutcome {
    let mut row = Map::new();
    row.insert("orders_count".to_string(), serde_json::json!(5));
    let orchestrator = canned_orchestrator(Arc::new(FixtureDriver::new(vec![row])));

    let query = Query {
        measures: vec!["orders.count".into()],
        time_dimensions: vec![TimeDimension {
            dimension: "orders.created_at".into(),
            granularity: None,
            date_range: None,
            compare_date_range: Some(vec![
                vec!["2024-01-15".into(), "2024-01-15".into()],
                vec!["2024-01-16".into(), "2024-01-16".into()],
            ]),
        }],
        ..Default::default()
    };
    let result = match orchestrator.execute(query, None).await {
        Ok(r) => r,
        Err(e) => return check("compare_date_range", false, e.to_string()),
    };

    let tags: Vec<&str> = result
        .data
        .iter()
        .filter_map(|row| row.get("_compareDateRange").and_then(|v| v.as_str()))
        .collect();
    let ok = result.meta.compare_date_range == Some(true)
        && tags.contains(&"2024-01-15 to 2024-01-15")
        && tags.contains(&"2024-01-16 to 2024-01-16");
    check("compare_date_range", ok, format!("compare_date_range={:?}, tags={:?}", result.meta.compare_date_range, tags))
}

fn build_callbacks() -> Arc<CallbackManager> {
    let callbacks = Arc::new(CallbackManager::new());
    callbacks.register(Box::new(LogObserver));
    callbacks.register(Box::new(MetricsObserver::new()));
    callbacks
}

async fn health() -> &'static str {
    "OK"
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum QueryRequest {
    Single(Query),
    Blending(Vec<Query>),
}

/// Minimal smoke-test surface (§6): the security context travels as an
/// `X-User-Id` / `X-Tenant-Id` header pair rather than a second request
/// body, since a request body can only be consumed once.
async fn handle_query(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Response {
    let orchestrator = state.orchestrator();
    let context = security_context_from_headers(&headers);
    let queries = match request {
        QueryRequest::Single(q) => vec![q],
        QueryRequest::Blending(qs) => qs,
    };

    match orchestrator.execute_one_or_many(queries, context.as_ref()).await {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(e.to_envelope())).into_response(),
    }
}

fn security_context_from_headers(headers: &axum::http::HeaderMap) -> Option<SecurityContext> {
    let user_id = headers.get("x-user-id").and_then(|v| v.to_str().ok()).map(str::to_string);
    let tenant_id = headers.get("x-tenant-id").and_then(|v| v.to_str().ok()).map(str::to_string);
    if user_id.is_none() && tenant_id.is_none() {
        return None;
    }
    Some(SecurityContext { user_id, tenant_id, ..Default::default() })
}
