//! Application configuration
//!
//! Immutable configuration bundles for the warehouse source, the Postgres
//! sink, the AI endpoint and the ETL/backfill tuning knobs. Everything is
//! resolved once at startup from CLI flags with environment fallbacks and
//! validated fail-fast; a `ConfigError` maps to exit code 2.

use std::fmt;

use clap::ValueEnum;
use thiserror::Error;

use super::cli::ConnectionArgs;
use super::constants::{
    DEFAULT_AI_API_VERSION, DEFAULT_AI_CACHE_MAX_ENTRIES, DEFAULT_AI_COST_ALERT_USD,
    DEFAULT_AI_RATE_LIMIT_RPS, DEFAULT_AI_TIMEOUT_MS, DEFAULT_BACKFILL_MAX_BATCH_SIZE,
    DEFAULT_BACKFILL_MAX_MEMORY_MB, DEFAULT_BACKFILL_MAX_WORKERS, DEFAULT_BATCH_SIZE,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_SECS, DEFAULT_TABLES,
    DEFAULT_WAREHOUSE_QUERY_TIMEOUT_SECS, DEFAULT_WATERMARK_TABLE,
    SINK_DEFAULT_ACQUIRE_TIMEOUT_SECS, SINK_DEFAULT_MAX_CONNECTIONS,
    SINK_DEFAULT_MIN_CONNECTIONS, SINK_DEFAULT_PORT, SINK_DEFAULT_STATEMENT_TIMEOUT_SECS,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// Authenticator
// =============================================================================

/// Warehouse authentication variant; exactly one is selected at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Authenticator {
    #[default]
    Password,
    Externalbrowser,
    Oauth,
}

impl fmt::Display for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authenticator::Password => write!(f, "password"),
            Authenticator::Externalbrowser => write!(f, "externalbrowser"),
            Authenticator::Oauth => write!(f, "oauth"),
        }
    }
}

// =============================================================================
// Budget policy
// =============================================================================

/// What happens to AI calls after the cost threshold is crossed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum BudgetPolicy {
    /// Skip enrichment and fall back to the rule-based extractor
    SoftDegrade,
    /// Fail enrichment calls with a budget error
    #[default]
    HardGate,
}

impl fmt::Display for BudgetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetPolicy::SoftDegrade => write!(f, "soft-degrade"),
            BudgetPolicy::HardGate => write!(f, "hard-gate"),
        }
    }
}

// =============================================================================
// Runtime config structs
// =============================================================================

/// Warehouse (source) connection configuration
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Account endpoint base URL
    pub url: String,
    pub user: String,
    pub password: Option<String>,
    /// Bearer token (authenticator = oauth)
    pub token: Option<String>,
    pub authenticator: Authenticator,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
    pub role: Option<String>,
    pub query_timeout_secs: u64,
}

/// Sink (PostgreSQL) connection configuration
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Maximum connections in the pool
    pub pool_size: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Statement timeout in seconds (0 = disabled)
    pub statement_timeout_secs: u64,
}

/// ETL tuning knobs
#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub batch_size: u32,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub watermark_table: String,
    pub tables: Vec<String>,
    /// Alert when a table run exceeds this duration (seconds)
    pub run_slo_secs: Option<u64>,
}

/// Backfill parallelism envelope
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub enable_parallel: bool,
    pub max_workers: usize,
    pub connection_pool_size: u32,
    pub max_memory_mb: u64,
    pub max_batch_size: u32,
}

/// AI enrichment configuration
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: String,
    pub api_version: String,
    pub chat_deployment: String,
    pub embedding_deployment: String,
    pub model_version: String,
    pub rate_limit_rps: f64,
    pub timeout_ms: u64,
    /// Concurrent enrichment requests per batch
    pub max_in_flight: usize,
    pub cost_alert_usd: f64,
    pub budget_policy: BudgetPolicy,
    /// USD per 1K prompt tokens
    pub prompt_price_per_1k: f64,
    /// USD per 1K completion tokens
    pub completion_price_per_1k: f64,
    /// USD per 1K embedding tokens
    pub embedding_price_per_1k: f64,
    pub cache_max_entries: u64,
    pub alert_webhook_url: Option<String>,
    pub prometheus_textfile: Option<String>,
}

/// Final merged application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub warehouse: WarehouseConfig,
    pub sink: SinkConfig,
    pub etl: EtlConfig,
    pub backfill: BackfillConfig,
    pub ai: Option<AiConfig>,
}

impl AppConfig {
    /// Assemble and validate the configuration from parsed CLI/env options.
    pub fn load(args: &ConnectionArgs) -> Result<Self, ConfigError> {
        let warehouse = Self::load_warehouse(args)?;
        let sink = Self::load_sink(args)?;
        let etl = Self::load_etl(args)?;
        let backfill = Self::load_backfill(args, &etl);
        let ai = Self::load_ai(args, &backfill)?;

        tracing::debug!(
            warehouse_url = %warehouse.url,
            warehouse_authenticator = %warehouse.authenticator,
            sink_host = %sink.host,
            sink_port = sink.port,
            batch_size = etl.batch_size,
            max_retries = etl.max_retries,
            tables = ?etl.tables,
            backfill_workers = backfill.max_workers,
            ai_enabled = ai.is_some(),
            "Configuration loaded"
        );

        Ok(Self {
            warehouse,
            sink,
            etl,
            backfill,
            ai,
        })
    }

    fn load_warehouse(args: &ConnectionArgs) -> Result<WarehouseConfig, ConfigError> {
        let url = args
            .warehouse_url
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("WAREHOUSE_URL"))?;
        let user = args
            .warehouse_user
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("WAREHOUSE_USER"))?;
        let warehouse = args
            .warehouse_warehouse
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("WAREHOUSE_WAREHOUSE"))?;
        let database = args
            .warehouse_database
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("WAREHOUSE_DATABASE"))?;
        let schema = args
            .warehouse_schema
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("WAREHOUSE_SCHEMA"))?;

        let authenticator = args.warehouse_authenticator.unwrap_or_default();
        let password = args.warehouse_password.clone().filter(|s| !s.is_empty());
        let token = args.warehouse_token.clone().filter(|s| !s.is_empty());

        // The authenticator/credential combination must be consistent.
        match authenticator {
            Authenticator::Password if password.is_none() => {
                return Err(ConfigError::Invalid(
                    "authenticator 'password' requires WAREHOUSE_PASSWORD".into(),
                ));
            }
            Authenticator::Oauth if token.is_none() => {
                return Err(ConfigError::Invalid(
                    "authenticator 'oauth' requires WAREHOUSE_TOKEN".into(),
                ));
            }
            _ => {}
        }

        Ok(WarehouseConfig {
            url: url.trim_end_matches('/').to_string(),
            user,
            password,
            token,
            authenticator,
            warehouse,
            database,
            schema,
            role: args.warehouse_role.clone().filter(|s| !s.is_empty()),
            query_timeout_secs: args
                .warehouse_query_timeout_secs
                .unwrap_or(DEFAULT_WAREHOUSE_QUERY_TIMEOUT_SECS),
        })
    }

    fn load_sink(args: &ConnectionArgs) -> Result<SinkConfig, ConfigError> {
        let host = args
            .sink_host
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("SINK_HOST"))?;
        let user = args
            .sink_user
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("SINK_USER"))?;
        let password = args
            .sink_password
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("SINK_PASSWORD"))?;
        let database = args
            .sink_database
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("SINK_DATABASE"))?;

        let port = args.sink_port.unwrap_or(SINK_DEFAULT_PORT);
        if port == 0 {
            return Err(ConfigError::Invalid("SINK_PORT must be non-zero".into()));
        }

        let pool_size = args.sink_pool_size.unwrap_or(SINK_DEFAULT_MAX_CONNECTIONS);
        if pool_size == 0 {
            return Err(ConfigError::Invalid(
                "SINK_POOL_SIZE must be at least 1".into(),
            ));
        }

        Ok(SinkConfig {
            host,
            port,
            user,
            password,
            database,
            pool_size,
            min_connections: args
                .sink_min_connections
                .unwrap_or(SINK_DEFAULT_MIN_CONNECTIONS),
            acquire_timeout_secs: args
                .sink_acquire_timeout_secs
                .unwrap_or(SINK_DEFAULT_ACQUIRE_TIMEOUT_SECS),
            statement_timeout_secs: args
                .sink_statement_timeout_secs
                .unwrap_or(SINK_DEFAULT_STATEMENT_TIMEOUT_SECS),
        })
    }

    fn load_etl(args: &ConnectionArgs) -> Result<EtlConfig, ConfigError> {
        let batch_size = args.etl_batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(ConfigError::Invalid(
                "ETL_BATCH_SIZE must be at least 1".into(),
            ));
        }

        let tables = args
            .etl_tables
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_TABLES.to_string()]);
        if tables.is_empty() || tables.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "ETL_TABLES must name at least one table".into(),
            ));
        }

        Ok(EtlConfig {
            batch_size,
            max_retries: args.etl_max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay_secs: args.etl_retry_delay_secs.unwrap_or(DEFAULT_RETRY_DELAY_SECS),
            watermark_table: args
                .etl_watermark_table
                .clone()
                .unwrap_or_else(|| DEFAULT_WATERMARK_TABLE.to_string()),
            tables,
            run_slo_secs: args.etl_run_slo_secs.filter(|&s| s > 0),
        })
    }

    fn load_backfill(args: &ConnectionArgs, etl: &EtlConfig) -> BackfillConfig {
        let max_workers = args
            .backfill_max_workers
            .unwrap_or(DEFAULT_BACKFILL_MAX_WORKERS)
            .max(1);
        BackfillConfig {
            enable_parallel: args.backfill_enable_parallel.unwrap_or(true),
            max_workers,
            connection_pool_size: args
                .backfill_connection_pool_size
                .unwrap_or((max_workers as u32).saturating_mul(2)),
            max_memory_mb: args
                .backfill_max_memory_mb
                .unwrap_or(DEFAULT_BACKFILL_MAX_MEMORY_MB),
            max_batch_size: args
                .backfill_max_batch_size
                .unwrap_or(DEFAULT_BACKFILL_MAX_BATCH_SIZE)
                .max(etl.batch_size),
        }
    }

    fn load_ai(
        args: &ConnectionArgs,
        backfill: &BackfillConfig,
    ) -> Result<Option<AiConfig>, ConfigError> {
        if !args.ai_enabled.unwrap_or(false) {
            return Ok(None);
        }

        let endpoint = args
            .ai_endpoint
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("AI_ENDPOINT"))?;
        let api_key = args
            .ai_api_key
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("AI_API_KEY"))?;
        let chat_deployment = args
            .ai_chat_deployment
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("AI_CHAT_DEPLOYMENT"))?;
        let embedding_deployment = args
            .ai_embedding_deployment
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("AI_EMBEDDING_DEPLOYMENT"))?;
        let model_version = args
            .ai_model_version
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("AI_MODEL_VERSION"))?;

        let rate_limit_rps = args.ai_rate_limit_rps.unwrap_or(DEFAULT_AI_RATE_LIMIT_RPS);
        if rate_limit_rps <= 0.0 {
            return Err(ConfigError::Invalid(
                "AI_RATE_LIMIT_RPS must be positive".into(),
            ));
        }

        Ok(Some(AiConfig {
            enabled: true,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            api_version: args
                .ai_api_version
                .clone()
                .unwrap_or_else(|| DEFAULT_AI_API_VERSION.to_string()),
            chat_deployment,
            embedding_deployment,
            model_version,
            rate_limit_rps,
            timeout_ms: args.ai_timeout_ms.unwrap_or(DEFAULT_AI_TIMEOUT_MS),
            max_in_flight: args
                .ai_max_in_flight
                .unwrap_or(backfill.max_workers * 2)
                .max(1),
            cost_alert_usd: args.ai_cost_alert_usd.unwrap_or(DEFAULT_AI_COST_ALERT_USD),
            budget_policy: args.ai_budget_policy.unwrap_or_default(),
            prompt_price_per_1k: args.ai_prompt_price_per_1k.unwrap_or(0.0),
            completion_price_per_1k: args.ai_completion_price_per_1k.unwrap_or(0.0),
            embedding_price_per_1k: args.ai_embedding_price_per_1k.unwrap_or(0.0),
            cache_max_entries: args
                .ai_cache_max_entries
                .unwrap_or(DEFAULT_AI_CACHE_MAX_ENTRIES),
            alert_webhook_url: args.ai_alert_webhook_url.clone().filter(|s| !s.is_empty()),
            prometheus_textfile: args
                .ai_prometheus_textfile
                .clone()
                .filter(|s| !s.is_empty()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_args() -> ConnectionArgs {
        ConnectionArgs {
            warehouse_url: Some("https://acme.warehouse.example.com/".into()),
            warehouse_user: Some("etl_user".into()),
            warehouse_password: Some("secret".into()),
            warehouse_warehouse: Some("COMPUTE_WH".into()),
            warehouse_database: Some("MED".into()),
            warehouse_schema: Some("PUBLIC".into()),
            sink_host: Some("localhost".into()),
            sink_user: Some("postgres".into()),
            sink_password: Some("postgres".into()),
            sink_database: Some("datalab".into()),
            ..Default::default()
        }
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let config = AppConfig::load(&minimal_args()).unwrap();
        assert_eq!(config.warehouse.url, "https://acme.warehouse.example.com");
        assert_eq!(config.warehouse.authenticator, Authenticator::Password);
        assert_eq!(config.sink.port, SINK_DEFAULT_PORT);
        assert_eq!(config.etl.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.etl.tables, vec!["notification_text".to_string()]);
        assert_eq!(config.etl.watermark_table, "etl_metadata");
        assert!(config.ai.is_none());
    }

    #[test]
    fn rejects_missing_warehouse_account() {
        let mut args = minimal_args();
        args.warehouse_url = None;
        let err = AppConfig::load(&args).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("WAREHOUSE_URL")));
    }

    #[test]
    fn rejects_password_auth_without_password() {
        let mut args = minimal_args();
        args.warehouse_password = None;
        let err = AppConfig::load(&args).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_oauth_without_token() {
        let mut args = minimal_args();
        args.warehouse_authenticator = Some(Authenticator::Oauth);
        args.warehouse_password = None;
        let err = AppConfig::load(&args).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn external_browser_needs_no_credentials() {
        let mut args = minimal_args();
        args.warehouse_authenticator = Some(Authenticator::Externalbrowser);
        args.warehouse_password = None;
        assert!(AppConfig::load(&args).is_ok());
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut args = minimal_args();
        args.etl_batch_size = Some(0);
        assert!(AppConfig::load(&args).is_err());
    }

    #[test]
    fn ai_requires_endpoint_and_key() {
        let mut args = minimal_args();
        args.ai_enabled = Some(true);
        args.ai_endpoint = Some("https://ai.example.com".into());
        let err = AppConfig::load(&args).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("AI_API_KEY")));
    }

    #[test]
    fn ai_config_derives_in_flight_from_workers() {
        let mut args = minimal_args();
        args.ai_enabled = Some(true);
        args.ai_endpoint = Some("https://ai.example.com/".into());
        args.ai_api_key = Some("k".into());
        args.ai_chat_deployment = Some("gpt-4o".into());
        args.ai_embedding_deployment = Some("text-embedding-3-small".into());
        args.ai_model_version = Some("2024-08".into());
        args.backfill_max_workers = Some(3);
        let config = AppConfig::load(&args).unwrap();
        let ai = config.ai.unwrap();
        assert_eq!(ai.max_in_flight, 6);
        assert_eq!(ai.budget_policy, BudgetPolicy::HardGate);
        assert_eq!(ai.endpoint, "https://ai.example.com");
    }

}
