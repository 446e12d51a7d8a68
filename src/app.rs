//! Application wiring
//!
//! Parses the CLI, loads and validates configuration, connects the services
//! and dispatches the subcommand. Exit codes: 0 success, 1 partial (some
//! tables or ranges failed), 2 configuration error, 3 persistent
//! infrastructure error.

use std::sync::Arc;
use std::time::Duration;

use crate::ai::EnrichmentService;
use crate::core::cli::{self, BackfillArgs, Commands, RunEtlArgs};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG, MAX_RETRY_DELAY_SECS};
use crate::core::shutdown::ShutdownService;
use crate::data::postgres::repositories::{MetadataStore, embedding_store};
use crate::data::postgres::writer::SinkWriter;
use crate::data::{PostgresService, WarehouseService};
use crate::domain::progress::{ProgressReporter, format_table_summary};
use crate::domain::sync::backfill::{BackfillOrchestrator, BackfillParams};
use crate::domain::sync::incremental::IncrementalSync;
use crate::data::types::SyncStatus;
use crate::utils::retry::RetryPolicy;
use crate::utils::time::{parse_date_end, parse_date_start};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_INFRA: i32 = 3;

pub struct EtlApp;

impl EtlApp {
    /// Run the application; returns the process exit code.
    pub async fn run() -> i32 {
        dotenvy::dotenv().ok();
        Self::init_logging();

        let cli = cli::parse();
        let config = match AppConfig::load(&cli.connection) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Configuration error: {}", e);
                return EXIT_CONFIG;
            }
        };

        match cli.command {
            Commands::RunEtl(args) => Self::run_etl(config, args).await,
            Commands::Backfill(args) => Self::run_backfill(config, args).await,
        }
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);
        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    fn retry_policy(config: &AppConfig) -> RetryPolicy {
        RetryPolicy::new(
            config.etl.max_retries,
            Duration::from_secs(config.etl.retry_delay_secs),
            Duration::from_secs(MAX_RETRY_DELAY_SECS),
        )
    }

    // ========================================================================
    // run-etl
    // ========================================================================

    async fn run_etl(config: AppConfig, args: RunEtlArgs) -> i32 {
        let shutdown = ShutdownService::new();
        shutdown.install_signal_handlers();
        let policy = Self::retry_policy(&config);

        let warehouse = match WarehouseService::connect(config.warehouse.clone()).await {
            Ok(service) => Arc::new(service),
            Err(e) => {
                tracing::error!(error = %e, "Warehouse connection failed");
                return EXIT_INFRA;
            }
        };
        let sink = match PostgresService::init(&config.sink).await {
            Ok(service) => Arc::new(service),
            Err(e) => {
                tracing::error!(error = %e, "Sink initialization failed");
                return EXIT_INFRA;
            }
        };
        let metadata = match MetadataStore::new(sink.pool().clone(), &config.etl.watermark_table) {
            Ok(store) => store,
            Err(e) => {
                eprintln!("Configuration error: {}", e);
                return EXIT_CONFIG;
            }
        };

        let (progress, enrichment) = match Self::enrichment_stack(&config, policy) {
            Ok(pair) => pair,
            Err(code) => return code,
        };

        let writer = SinkWriter::new(sink.pool().clone(), policy);
        let embeddings = embedding_store(sink.pool().clone(), sink.vector_mode());

        let sync = IncrementalSync::new(
            Arc::clone(&warehouse),
            writer,
            metadata,
            embeddings,
            enrichment.clone(),
            Arc::clone(&progress),
            policy,
            shutdown.subscribe(),
            args.dry_run,
        );

        let tables = args.tables.unwrap_or_else(|| config.etl.tables.clone());
        let batch_size = args.batch_size.unwrap_or(config.etl.batch_size);
        let summaries = sync.run(&tables, batch_size).await;

        Self::finish(&config, &progress, enrichment.as_deref());
        sink.close().await;

        if summaries.is_empty() {
            return EXIT_PARTIAL;
        }
        let mut failed = 0usize;
        for summary in &summaries {
            println!(
                "{}",
                format_table_summary(
                    &summary.table,
                    summary.status.as_str(),
                    summary.rows,
                    summary.duration,
                    summary.error.as_deref(),
                )
            );
            if summary.status != SyncStatus::Completed {
                failed += 1;
            }
            Self::check_slo(&config, &progress, summary.duration).await;
        }
        if failed == 0 {
            EXIT_SUCCESS
        } else if failed < summaries.len() {
            EXIT_PARTIAL
        } else {
            EXIT_INFRA
        }
    }

    // ========================================================================
    // backfill
    // ========================================================================

    async fn run_backfill(config: AppConfig, args: BackfillArgs) -> i32 {
        let (start, end) = match (parse_date_start(&args.start_date), parse_date_end(&args.end_date))
        {
            (Ok(start), Ok(end)) => (start, end),
            (Err(e), _) | (_, Err(e)) => {
                eprintln!("Configuration error: {}", e);
                return EXIT_CONFIG;
            }
        };

        let shutdown = ShutdownService::new();
        shutdown.install_signal_handlers();
        let policy = Self::retry_policy(&config);

        let warehouse = match WarehouseService::connect(config.warehouse.clone()).await {
            Ok(service) => Arc::new(service),
            Err(e) => {
                tracing::error!(error = %e, "Warehouse connection failed");
                return EXIT_INFRA;
            }
        };
        // The worker pool needs more sink connections than the incremental path.
        let pool_size = config
            .backfill
            .connection_pool_size
            .max(config.sink.pool_size);
        let sink = match PostgresService::init_with_pool_size(&config.sink, pool_size).await {
            Ok(service) => Arc::new(service),
            Err(e) => {
                tracing::error!(error = %e, "Sink initialization failed");
                return EXIT_INFRA;
            }
        };
        let metadata = match MetadataStore::new(sink.pool().clone(), &config.etl.watermark_table) {
            Ok(store) => store,
            Err(e) => {
                eprintln!("Configuration error: {}", e);
                return EXIT_CONFIG;
            }
        };

        let (progress, enrichment) = match Self::enrichment_stack(&config, policy) {
            Ok(pair) => pair,
            Err(code) => return code,
        };

        let writer = Arc::new(SinkWriter::new(sink.pool().clone(), policy));
        let embeddings = embedding_store(sink.pool().clone(), sink.vector_mode());
        let table = config.etl.tables[0].clone();

        let orchestrator = BackfillOrchestrator::new(
            Arc::clone(&warehouse),
            writer,
            metadata,
            embeddings,
            enrichment.clone(),
            Arc::clone(&progress),
            config.etl.clone(),
            config.backfill.clone(),
            policy,
            shutdown.subscribe(),
        );

        let params = BackfillParams {
            start,
            end,
            resume: args.resume,
            max_workers: args.max_workers,
            max_records: args.max_records.filter(|&n| n > 0),
            dry_run: args.dry_run,
            verbose: args.verbose,
        };
        let result = orchestrator.run(&table, params).await;

        Self::finish(&config, &progress, enrichment.as_deref());
        sink.close().await;

        match result {
            Ok(summary) => {
                println!(
                    "{}",
                    format_table_summary(
                        &summary.table,
                        summary.status.as_str(),
                        summary.processed,
                        summary.duration,
                        summary.error.as_deref(),
                    )
                );
                if summary.failed_ranges > 0 {
                    println!(
                        "failed_ranges={} (re-run with a narrowed range to retry)",
                        summary.failed_ranges
                    );
                }
                Self::check_slo(&config, &progress, summary.duration).await;
                if summary.status == SyncStatus::Completed {
                    EXIT_SUCCESS
                } else {
                    EXIT_PARTIAL
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Backfill failed");
                EXIT_INFRA
            }
        }
    }

    // ========================================================================
    // Shared wiring
    // ========================================================================

    #[allow(clippy::type_complexity)]
    fn enrichment_stack(
        config: &AppConfig,
        policy: RetryPolicy,
    ) -> Result<(Arc<ProgressReporter>, Option<Arc<EnrichmentService>>), i32> {
        let webhook = config
            .ai
            .as_ref()
            .and_then(|ai| ai.alert_webhook_url.clone());
        let progress = Arc::new(ProgressReporter::new(webhook));

        let enrichment = match &config.ai {
            Some(ai) => match EnrichmentService::new(ai.clone(), policy) {
                Ok(service) => Some(Arc::new(service)),
                Err(e) => {
                    tracing::error!(error = %e, "AI client initialization failed");
                    return Err(EXIT_INFRA);
                }
            },
            None => None,
        };
        Ok((progress, enrichment))
    }

    async fn check_slo(
        config: &AppConfig,
        progress: &Arc<ProgressReporter>,
        elapsed: Duration,
    ) {
        if let Some(slo_secs) = config.etl.run_slo_secs
            && elapsed > Duration::from_secs(slo_secs)
        {
            progress
                .alert(crate::domain::progress::Alert::SloExceeded {
                    elapsed,
                    slo: Duration::from_secs(slo_secs),
                })
                .await;
        }
    }

    /// Final cost log and optional metrics textfile dump.
    fn finish(
        config: &AppConfig,
        progress: &Arc<ProgressReporter>,
        enrichment: Option<&EnrichmentService>,
    ) {
        let cost = enrichment.map(|service| {
            let snapshot = service.cost().snapshot();
            tracing::info!(
                ai_calls = service.total_calls(),
                prompt_tokens = snapshot.prompt_tokens,
                completion_tokens = snapshot.completion_tokens,
                embedding_tokens = snapshot.embedding_tokens,
                cost_usd = format!("{:.4}", snapshot.cost_usd),
                "AI usage"
            );
            snapshot
        });

        if let Some(path) = config.ai.as_ref().and_then(|ai| ai.prometheus_textfile.as_ref()) {
            progress.write_textfile(path, cost.as_ref());
        }
    }
}
