// =============================================================================
// Application Identity
// =============================================================================

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "notisync";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "NOTISYNC_LOG";

// =============================================================================
// Environment Variables - Warehouse (source)
// =============================================================================

pub const ENV_WAREHOUSE_URL: &str = "WAREHOUSE_URL";
pub const ENV_WAREHOUSE_USER: &str = "WAREHOUSE_USER";
pub const ENV_WAREHOUSE_PASSWORD: &str = "WAREHOUSE_PASSWORD";
pub const ENV_WAREHOUSE_TOKEN: &str = "WAREHOUSE_TOKEN";
pub const ENV_WAREHOUSE_AUTHENTICATOR: &str = "WAREHOUSE_AUTHENTICATOR";
pub const ENV_WAREHOUSE_WAREHOUSE: &str = "WAREHOUSE_WAREHOUSE";
pub const ENV_WAREHOUSE_DATABASE: &str = "WAREHOUSE_DATABASE";
pub const ENV_WAREHOUSE_SCHEMA: &str = "WAREHOUSE_SCHEMA";
pub const ENV_WAREHOUSE_ROLE: &str = "WAREHOUSE_ROLE";
pub const ENV_WAREHOUSE_QUERY_TIMEOUT_SECS: &str = "WAREHOUSE_QUERY_TIMEOUT_SECS";

// =============================================================================
// Environment Variables - Sink (PostgreSQL)
// =============================================================================

pub const ENV_SINK_HOST: &str = "SINK_HOST";
pub const ENV_SINK_PORT: &str = "SINK_PORT";
pub const ENV_SINK_USER: &str = "SINK_USER";
pub const ENV_SINK_PASSWORD: &str = "SINK_PASSWORD";
pub const ENV_SINK_DATABASE: &str = "SINK_DATABASE";
pub const ENV_SINK_POOL_SIZE: &str = "SINK_POOL_SIZE";
pub const ENV_SINK_MIN_CONNECTIONS: &str = "SINK_MIN_CONNECTIONS";
pub const ENV_SINK_ACQUIRE_TIMEOUT_SECS: &str = "SINK_ACQUIRE_TIMEOUT_SECS";
pub const ENV_SINK_STATEMENT_TIMEOUT_SECS: &str = "SINK_STATEMENT_TIMEOUT_SECS";

// =============================================================================
// Environment Variables - ETL tuning
// =============================================================================

pub const ENV_ETL_BATCH_SIZE: &str = "ETL_BATCH_SIZE";
pub const ENV_ETL_MAX_RETRIES: &str = "ETL_MAX_RETRIES";
pub const ENV_ETL_RETRY_DELAY_SECS: &str = "ETL_RETRY_DELAY_SECS";
pub const ENV_ETL_WATERMARK_TABLE: &str = "ETL_WATERMARK_TABLE";
pub const ENV_ETL_TABLES: &str = "ETL_TABLES";
pub const ENV_ETL_RUN_SLO_SECS: &str = "ETL_RUN_SLO_SECS";

// =============================================================================
// Environment Variables - Backfill
// =============================================================================

pub const ENV_BACKFILL_ENABLE_PARALLEL: &str = "BACKFILL_ENABLE_PARALLEL";
pub const ENV_BACKFILL_MAX_WORKERS: &str = "BACKFILL_MAX_WORKERS";
pub const ENV_BACKFILL_CONNECTION_POOL_SIZE: &str = "BACKFILL_CONNECTION_POOL_SIZE";
pub const ENV_BACKFILL_MAX_MEMORY_MB: &str = "BACKFILL_MAX_MEMORY_MB";
pub const ENV_BACKFILL_MAX_BATCH_SIZE: &str = "BACKFILL_MAX_BATCH_SIZE";

// =============================================================================
// Environment Variables - AI enrichment
// =============================================================================

pub const ENV_AI_ENABLED: &str = "AI_ENABLED";
pub const ENV_AI_ENDPOINT: &str = "AI_ENDPOINT";
pub const ENV_AI_API_KEY: &str = "AI_API_KEY";
pub const ENV_AI_API_VERSION: &str = "AI_API_VERSION";
pub const ENV_AI_CHAT_DEPLOYMENT: &str = "AI_CHAT_DEPLOYMENT";
pub const ENV_AI_EMBEDDING_DEPLOYMENT: &str = "AI_EMBEDDING_DEPLOYMENT";
pub const ENV_AI_MODEL_VERSION: &str = "AI_MODEL_VERSION";
pub const ENV_AI_RATE_LIMIT_RPS: &str = "AI_RATE_LIMIT_RPS";
pub const ENV_AI_TIMEOUT_MS: &str = "AI_TIMEOUT_MS";
pub const ENV_AI_MAX_IN_FLIGHT: &str = "AI_MAX_IN_FLIGHT";
pub const ENV_AI_COST_ALERT_USD: &str = "AI_COST_ALERT_USD";
pub const ENV_AI_BUDGET_POLICY: &str = "AI_BUDGET_POLICY";
pub const ENV_AI_PROMPT_PRICE_PER_1K: &str = "AI_PROMPT_PRICE_PER_1K";
pub const ENV_AI_COMPLETION_PRICE_PER_1K: &str = "AI_COMPLETION_PRICE_PER_1K";
pub const ENV_AI_EMBEDDING_PRICE_PER_1K: &str = "AI_EMBEDDING_PRICE_PER_1K";
pub const ENV_AI_CACHE_MAX_ENTRIES: &str = "AI_CACHE_MAX_ENTRIES";
pub const ENV_AI_ALERT_WEBHOOK_URL: &str = "AI_ALERT_WEBHOOK_URL";
pub const ENV_AI_PROMETHEUS_TEXTFILE: &str = "AI_PROMETHEUS_TEXTFILE";

// =============================================================================
// ETL Defaults
// =============================================================================

/// Default rows per batch
pub const DEFAULT_BATCH_SIZE: u32 = 1000;

/// Default maximum retry attempts for transient failures
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base retry delay in seconds
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// Upper cap for any single backoff delay
pub const MAX_RETRY_DELAY_SECS: u64 = 60;

/// Default watermark/metadata table name
pub const DEFAULT_WATERMARK_TABLE: &str = "etl_metadata";

/// Default set of managed tables
pub const DEFAULT_TABLES: &str = "notification_text";

/// Default warehouse query timeout in seconds
pub const DEFAULT_WAREHOUSE_QUERY_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// Sink Defaults
// =============================================================================

pub const SINK_DEFAULT_PORT: u16 = 5432;
pub const SINK_DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const SINK_DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const SINK_DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const SINK_DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// Backfill Defaults
// =============================================================================

pub const DEFAULT_BACKFILL_MAX_WORKERS: usize = 4;
pub const DEFAULT_BACKFILL_MAX_MEMORY_MB: u64 = 512;
pub const DEFAULT_BACKFILL_MAX_BATCH_SIZE: u32 = 5000;
pub const MIN_BACKFILL_BATCH_SIZE: u32 = 100;

// =============================================================================
// AI Defaults
// =============================================================================

/// Embedding vector dimension (fixed by the embedding model family)
pub const EMBEDDING_DIMENSION: usize = 1536;

pub const DEFAULT_AI_RATE_LIMIT_RPS: f64 = 5.0;
pub const DEFAULT_AI_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_AI_COST_ALERT_USD: f64 = 10.0;
pub const DEFAULT_AI_CACHE_MAX_ENTRIES: u64 = 10_000;
pub const DEFAULT_AI_API_VERSION: &str = "2024-10-21";

/// Maximum estimated tokens packed into one embedding request
pub const AI_MAX_TOKENS_PER_EMBED_REQUEST: usize = 8_000;

/// Bounded wait for a rate-limiter token before failing with `RateLimited`
pub const AI_RATE_LIMIT_MAX_WAIT_SECS: u64 = 30;

/// JSON-validation retries with a stiffened prompt before quarantining
pub const AI_EXTRACTION_VALIDATION_RETRIES: u32 = 2;

// =============================================================================
// Circuit Breaker Defaults
// =============================================================================

/// Rolling window size (call outcomes) per external dependency
pub const CIRCUIT_WINDOW_SIZE: usize = 20;

/// Rolling window horizon in seconds
pub const CIRCUIT_WINDOW_SECS: u64 = 60;

/// Error-rate threshold that trips the breaker
pub const CIRCUIT_FAILURE_THRESHOLD: f64 = 0.5;

/// Minimum observed calls before the threshold applies
pub const CIRCUIT_MIN_CALLS: usize = 5;

/// Cooldown before a half-open probe is allowed
pub const CIRCUIT_COOLDOWN_SECS: u64 = 30;

// =============================================================================
// Progress / Alerting
// =============================================================================

/// Sliding window for the error-rate alert
pub const PROGRESS_ERROR_WINDOW_SECS: u64 = 300;

/// Error-rate threshold that raises an alert
pub const PROGRESS_ERROR_RATE_THRESHOLD: f64 = 0.10;

// =============================================================================
// Shutdown
// =============================================================================

/// Grace period for background tasks during shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
