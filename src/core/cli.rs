use clap::{Args, Parser, Subcommand};

use super::config::{Authenticator, BudgetPolicy};
use super::constants::{
    ENV_AI_ALERT_WEBHOOK_URL, ENV_AI_API_KEY, ENV_AI_API_VERSION, ENV_AI_BUDGET_POLICY,
    ENV_AI_CACHE_MAX_ENTRIES, ENV_AI_CHAT_DEPLOYMENT, ENV_AI_COMPLETION_PRICE_PER_1K,
    ENV_AI_COST_ALERT_USD, ENV_AI_EMBEDDING_DEPLOYMENT, ENV_AI_EMBEDDING_PRICE_PER_1K,
    ENV_AI_ENABLED, ENV_AI_ENDPOINT, ENV_AI_MAX_IN_FLIGHT, ENV_AI_MODEL_VERSION,
    ENV_AI_PROMETHEUS_TEXTFILE, ENV_AI_PROMPT_PRICE_PER_1K, ENV_AI_RATE_LIMIT_RPS,
    ENV_AI_TIMEOUT_MS, ENV_BACKFILL_CONNECTION_POOL_SIZE, ENV_BACKFILL_ENABLE_PARALLEL,
    ENV_BACKFILL_MAX_BATCH_SIZE, ENV_BACKFILL_MAX_MEMORY_MB, ENV_BACKFILL_MAX_WORKERS,
    ENV_ETL_BATCH_SIZE, ENV_ETL_MAX_RETRIES, ENV_ETL_RETRY_DELAY_SECS, ENV_ETL_RUN_SLO_SECS,
    ENV_ETL_TABLES, ENV_ETL_WATERMARK_TABLE, ENV_SINK_ACQUIRE_TIMEOUT_SECS, ENV_SINK_DATABASE,
    ENV_SINK_HOST,
    ENV_SINK_MIN_CONNECTIONS, ENV_SINK_PASSWORD, ENV_SINK_POOL_SIZE, ENV_SINK_PORT,
    ENV_SINK_STATEMENT_TIMEOUT_SECS, ENV_SINK_USER, ENV_WAREHOUSE_AUTHENTICATOR,
    ENV_WAREHOUSE_DATABASE, ENV_WAREHOUSE_PASSWORD, ENV_WAREHOUSE_QUERY_TIMEOUT_SECS,
    ENV_WAREHOUSE_ROLE, ENV_WAREHOUSE_SCHEMA, ENV_WAREHOUSE_TOKEN, ENV_WAREHOUSE_URL,
    ENV_WAREHOUSE_USER, ENV_WAREHOUSE_WAREHOUSE,
};

#[derive(Parser)]
#[command(name = "notisync")]
#[command(version, about = "Warehouse-to-Postgres sync with AI enrichment", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one incremental sync pass over the managed tables
    RunEtl(RunEtlArgs),

    /// Backfill a historical date range with parallel workers
    Backfill(BackfillArgs),
}

#[derive(Args, Debug)]
pub struct RunEtlArgs {
    /// Comma-separated list of tables to sync (default: configured tables)
    #[arg(long, value_delimiter = ',')]
    pub tables: Option<Vec<String>>,

    /// Override the configured batch size for this run
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Read and report without writing to the sink
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct BackfillArgs {
    /// Range start (inclusive), YYYY-MM-DD
    #[arg(long)]
    pub start_date: String,

    /// Range end (inclusive), YYYY-MM-DD
    #[arg(long)]
    pub end_date: String,

    /// Resume from the last committed checkpoint boundary
    #[arg(long)]
    pub resume: bool,

    /// Override the configured worker count
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Stop after this many records (0 = unlimited)
    #[arg(long)]
    pub max_records: Option<u64>,

    /// Read and report without writing to the sink
    #[arg(long)]
    pub dry_run: bool,

    /// Log per-batch progress
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Connection and tuning options shared by every subcommand.
///
/// Flags override environment variables; the environment is the usual way to
/// configure a deployment (a local `.env` is loaded before parsing).
#[derive(Args, Debug, Default)]
pub struct ConnectionArgs {
    // Warehouse (source)
    /// Warehouse account endpoint, e.g. https://acme.warehouse.example.com
    #[arg(long, global = true, env = ENV_WAREHOUSE_URL)]
    pub warehouse_url: Option<String>,

    #[arg(long, global = true, env = ENV_WAREHOUSE_USER)]
    pub warehouse_user: Option<String>,

    #[arg(long, global = true, env = ENV_WAREHOUSE_PASSWORD, hide_env_values = true)]
    pub warehouse_password: Option<String>,

    /// OAuth bearer token (authenticator = oauth)
    #[arg(long, global = true, env = ENV_WAREHOUSE_TOKEN, hide_env_values = true)]
    pub warehouse_token: Option<String>,

    /// Authentication variant: password, externalbrowser or oauth
    #[arg(long, global = true, env = ENV_WAREHOUSE_AUTHENTICATOR, value_enum)]
    pub warehouse_authenticator: Option<Authenticator>,

    /// Virtual warehouse to run extraction queries on
    #[arg(long, global = true, env = ENV_WAREHOUSE_WAREHOUSE)]
    pub warehouse_warehouse: Option<String>,

    #[arg(long, global = true, env = ENV_WAREHOUSE_DATABASE)]
    pub warehouse_database: Option<String>,

    #[arg(long, global = true, env = ENV_WAREHOUSE_SCHEMA)]
    pub warehouse_schema: Option<String>,

    #[arg(long, global = true, env = ENV_WAREHOUSE_ROLE)]
    pub warehouse_role: Option<String>,

    #[arg(long, global = true, env = ENV_WAREHOUSE_QUERY_TIMEOUT_SECS)]
    pub warehouse_query_timeout_secs: Option<u64>,

    // Sink (PostgreSQL)
    #[arg(long, global = true, env = ENV_SINK_HOST)]
    pub sink_host: Option<String>,

    #[arg(long, global = true, env = ENV_SINK_PORT)]
    pub sink_port: Option<u16>,

    #[arg(long, global = true, env = ENV_SINK_USER)]
    pub sink_user: Option<String>,

    #[arg(long, global = true, env = ENV_SINK_PASSWORD, hide_env_values = true)]
    pub sink_password: Option<String>,

    #[arg(long, global = true, env = ENV_SINK_DATABASE)]
    pub sink_database: Option<String>,

    /// Maximum connections in the sink pool
    #[arg(long, global = true, env = ENV_SINK_POOL_SIZE)]
    pub sink_pool_size: Option<u32>,

    #[arg(long, global = true, env = ENV_SINK_MIN_CONNECTIONS)]
    pub sink_min_connections: Option<u32>,

    #[arg(long, global = true, env = ENV_SINK_ACQUIRE_TIMEOUT_SECS)]
    pub sink_acquire_timeout_secs: Option<u64>,

    /// Statement timeout in seconds, 0 to disable
    #[arg(long, global = true, env = ENV_SINK_STATEMENT_TIMEOUT_SECS)]
    pub sink_statement_timeout_secs: Option<u64>,

    // ETL tuning
    #[arg(long, global = true, env = ENV_ETL_BATCH_SIZE)]
    pub etl_batch_size: Option<u32>,

    #[arg(long, global = true, env = ENV_ETL_MAX_RETRIES)]
    pub etl_max_retries: Option<u32>,

    #[arg(long, global = true, env = ENV_ETL_RETRY_DELAY_SECS)]
    pub etl_retry_delay_secs: Option<u64>,

    #[arg(long, global = true, env = ENV_ETL_WATERMARK_TABLE)]
    pub etl_watermark_table: Option<String>,

    /// Comma-separated managed tables
    #[arg(long, global = true, env = ENV_ETL_TABLES, value_delimiter = ',')]
    pub etl_tables: Option<Vec<String>>,

    /// Alert when a table run exceeds this duration (seconds)
    #[arg(long, global = true, env = ENV_ETL_RUN_SLO_SECS)]
    pub etl_run_slo_secs: Option<u64>,

    // Backfill tuning
    #[arg(long, global = true, env = ENV_BACKFILL_ENABLE_PARALLEL)]
    pub backfill_enable_parallel: Option<bool>,

    #[arg(long, global = true, env = ENV_BACKFILL_MAX_WORKERS)]
    pub backfill_max_workers: Option<usize>,

    #[arg(long, global = true, env = ENV_BACKFILL_CONNECTION_POOL_SIZE)]
    pub backfill_connection_pool_size: Option<u32>,

    /// Resident-set budget for the adaptive batch sizer
    #[arg(long, global = true, env = ENV_BACKFILL_MAX_MEMORY_MB)]
    pub backfill_max_memory_mb: Option<u64>,

    #[arg(long, global = true, env = ENV_BACKFILL_MAX_BATCH_SIZE)]
    pub backfill_max_batch_size: Option<u32>,

    // AI enrichment
    #[arg(long, global = true, env = ENV_AI_ENABLED)]
    pub ai_enabled: Option<bool>,

    #[arg(long, global = true, env = ENV_AI_ENDPOINT)]
    pub ai_endpoint: Option<String>,

    #[arg(long, global = true, env = ENV_AI_API_KEY, hide_env_values = true)]
    pub ai_api_key: Option<String>,

    #[arg(long, global = true, env = ENV_AI_API_VERSION)]
    pub ai_api_version: Option<String>,

    #[arg(long, global = true, env = ENV_AI_CHAT_DEPLOYMENT)]
    pub ai_chat_deployment: Option<String>,

    #[arg(long, global = true, env = ENV_AI_EMBEDDING_DEPLOYMENT)]
    pub ai_embedding_deployment: Option<String>,

    /// Model version recorded with every extraction and embedding
    #[arg(long, global = true, env = ENV_AI_MODEL_VERSION)]
    pub ai_model_version: Option<String>,

    #[arg(long, global = true, env = ENV_AI_RATE_LIMIT_RPS)]
    pub ai_rate_limit_rps: Option<f64>,

    #[arg(long, global = true, env = ENV_AI_TIMEOUT_MS)]
    pub ai_timeout_ms: Option<u64>,

    /// Concurrent AI requests per batch
    #[arg(long, global = true, env = ENV_AI_MAX_IN_FLIGHT)]
    pub ai_max_in_flight: Option<usize>,

    #[arg(long, global = true, env = ENV_AI_COST_ALERT_USD)]
    pub ai_cost_alert_usd: Option<f64>,

    /// Behavior once the cost threshold is crossed: soft-degrade or hard-gate
    #[arg(long, global = true, env = ENV_AI_BUDGET_POLICY, value_enum)]
    pub ai_budget_policy: Option<BudgetPolicy>,

    #[arg(long, global = true, env = ENV_AI_PROMPT_PRICE_PER_1K)]
    pub ai_prompt_price_per_1k: Option<f64>,

    #[arg(long, global = true, env = ENV_AI_COMPLETION_PRICE_PER_1K)]
    pub ai_completion_price_per_1k: Option<f64>,

    #[arg(long, global = true, env = ENV_AI_EMBEDDING_PRICE_PER_1K)]
    pub ai_embedding_price_per_1k: Option<f64>,

    #[arg(long, global = true, env = ENV_AI_CACHE_MAX_ENTRIES)]
    pub ai_cache_max_entries: Option<u64>,

    /// Webhook URL for alert delivery (in addition to log lines)
    #[arg(long, global = true, env = ENV_AI_ALERT_WEBHOOK_URL)]
    pub ai_alert_webhook_url: Option<String>,

    /// Path for Prometheus text-exposition dumps (textfile collector)
    #[arg(long, global = true, env = ENV_AI_PROMETHEUS_TEXTFILE)]
    pub ai_prometheus_textfile: Option<String>,
}

/// Parse command line arguments
pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_etl_with_tables() {
        let cli = Cli::try_parse_from([
            "notisync",
            "run-etl",
            "--tables",
            "notification_text,work_orders",
            "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Commands::RunEtl(args) => {
                assert_eq!(
                    args.tables.as_deref(),
                    Some(&["notification_text".to_string(), "work_orders".to_string()][..])
                );
                assert!(args.dry_run);
                assert!(args.batch_size.is_none());
            }
            _ => panic!("expected run-etl"),
        }
    }

    #[test]
    fn parses_backfill_range() {
        let cli = Cli::try_parse_from([
            "notisync",
            "backfill",
            "--start-date",
            "2024-01-01",
            "--end-date",
            "2024-01-31",
            "--resume",
            "--max-workers",
            "8",
        ])
        .unwrap();
        match cli.command {
            Commands::Backfill(args) => {
                assert_eq!(args.start_date, "2024-01-01");
                assert_eq!(args.end_date, "2024-01-31");
                assert!(args.resume);
                assert_eq!(args.max_workers, Some(8));
                assert!(!args.verbose);
            }
            _ => panic!("expected backfill"),
        }
    }

    #[test]
    fn backfill_requires_range() {
        assert!(Cli::try_parse_from(["notisync", "backfill"]).is_err());
    }
}
