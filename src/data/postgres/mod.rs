//! PostgreSQL sink service
//!
//! Centralized pool management for the operational store:
//! - Connection pooling with min/max bounds and acquire timeout
//! - Statement timeout protection at the connection level
//! - Vector-extension capability probe
//! - Versioned schema migrations
//!
//! All schema definitions and migrations are managed here.

pub mod error;
mod migrations;
pub mod repositories;
pub mod schema;
pub mod writer;

pub use error::SinkError;
pub use migrations::VectorMode;
pub use sqlx::PgPool;

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::core::config::SinkConfig;

/// PostgreSQL sink service
///
/// Created once at startup and shared across the pipeline.
pub struct PostgresService {
    pool: PgPool,
    vector_mode: VectorMode,
}

impl PostgresService {
    /// Initialize the sink from configuration.
    pub async fn init(config: &SinkConfig) -> Result<Self, SinkError> {
        Self::init_with_pool_size(config, config.pool_size).await
    }

    /// Initialize with an explicit pool size (backfill widens the pool to
    /// match its worker envelope).
    pub async fn init_with_pool_size(
        config: &SinkConfig,
        pool_size: u32,
    ) -> Result<Self, SinkError> {
        if config.host.is_empty() {
            return Err(SinkError::Config("sink host is required".into()));
        }

        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);

        if config.statement_timeout_secs > 0 {
            options = options.options([(
                "statement_timeout",
                format!("{}s", config.statement_timeout_secs),
            )]);
        }

        let pool = PgPoolOptions::new()
            .max_connections(pool_size.max(1))
            .min_connections(config.min_connections.min(pool_size))
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await?;

        let vector_mode = migrations::probe_vector_support(&pool).await?;
        migrations::run_migrations(&pool, vector_mode).await?;

        tracing::debug!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            max_connections = pool_size,
            min_connections = config.min_connections,
            statement_timeout_secs = config.statement_timeout_secs,
            %vector_mode,
            "PostgresService initialized"
        );

        Ok(Self { pool, vector_mode })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Embedding storage mode decided by the startup probe
    pub fn vector_mode(&self) -> VectorMode {
        self.vector_mode
    }

    /// Close the connection pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("Sink pool closed");
    }
}

#[cfg(test)]
mod tests {
    // Sink tests require a running PostgreSQL instance and are run as
    // integration tests against a disposable database.
}
