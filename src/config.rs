use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::ConfigurationError;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub schema: SchemaConfig,
    pub cache: CacheConfig,
    pub database: DatabaseConfig,
    pub pre_aggregation: PreAggregationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Directory containing one YAML cube definition per file (or many per file).
    pub dir: String,
    /// How often the dev server polls for schema changes. 0 disables polling.
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub reload_poll_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Opaque DSN handed to the configured `Driver` implementation; the core
    /// never interprets this itself.
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreAggregationConfig {
    /// Schema/namespace under which rollup tables are persisted, e.g.
    /// `pre_aggregations` in `pre_aggregations.<cube>_<name>`.
    pub storage_schema: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Command line arguments for the `semantic-core` CLI, layered as config
/// overrides ahead of the `validate`/`dev`/`test` subcommand itself.
#[derive(Parser, Debug, Clone)]
#[command(name = "semantic-core")]
#[command(version, about = "Semantic analytics layer core")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Logging level (overrides config file, e.g. "info,semantic_core=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Load and compile a cube schema directory, reporting errors.
    Validate {
        /// Directory of cube YAML files (overrides config.schema.dir)
        path: Option<String>,
    },
    /// Start the smoke-test HTTP surface (`POST /query`, `GET /health`).
    Dev {
        #[arg(long, value_name = "HOST")]
        host: Option<String>,
        #[arg(long, value_name = "PORT")]
        port: Option<u16>,
    },
    /// Validate a schema and run the canned scenario queries against it.
    Test {
        path: Option<String>,
    },
}

impl Config {
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with `SEMANTIC_CORE_`)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load(args: &CommandLineArgs) -> Result<Self, ConfigurationError> {
        let config_path = args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(args);
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("SEMANTIC_CORE_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("SEMANTIC_CORE_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
        }
        if let Ok(dir) = std::env::var("SEMANTIC_CORE_SCHEMA_DIR") {
            self.schema.dir = dir;
        }
        if let Ok(ttl) = std::env::var("SEMANTIC_CORE_CACHE_TTL_SECS") {
            match parse_duration_to_secs(&ttl) {
                Ok(val) => self.cache.ttl_secs = val,
                Err(e) => tracing::warn!("invalid SEMANTIC_CORE_CACHE_TTL_SECS '{ttl}': {e}"),
            }
        }
        if let Ok(url) = std::env::var("SEMANTIC_CORE_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(level) = std::env::var("SEMANTIC_CORE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        match &args.command {
            Command::Validate { path } | Command::Test { path } => {
                if let Some(path) = path {
                    self.schema.dir = path.clone();
                }
            }
            Command::Dev { host, port } => {
                if let Some(host) = host {
                    self.server.host = host.clone();
                }
                if let Some(port) = port {
                    self.server.port = *port;
                }
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.server.port == 0 {
            return Err(ConfigurationError::Invalid {
                key: "server.port".into(),
                message: "cannot be 0".into(),
            });
        }
        if self.schema.dir.is_empty() {
            return Err(ConfigurationError::Missing("schema.dir".into()));
        }
        if self.cache.ttl_secs == 0 {
            tracing::warn!("cache.ttl_secs is 0, cached results will expire immediately");
        }
        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths = ["semantic-core.toml", "./semantic-core.toml", "conf/semantic-core.toml"];
        possible_paths.iter().find(|p| Path::new(p).exists()).map(|p| p.to_string())
    }

    fn from_toml(path: &str) -> Result<Self, ConfigurationError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigurationError::Parse {
            path: path.to_string(),
            source,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 4000 }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self { dir: "schema".to_string(), reload_poll_secs: 0 }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: String::new() }
    }
}

impl Default for PreAggregationConfig {
    fn default() -> Self {
        Self { storage_schema: "pre_aggregations".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,semantic_core=debug".to_string(), file: None }
    }
}

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }
    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        "d" | "day" | "days" => Ok(n * 60 * 60 * 24),
        _ => Err(format!("unsupported unit: {unit}")),
    }
}

fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '30s', '5m', '1h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}
