//! Sink migration management
//!
//! Applies the initial schema and versioned migrations, branching the
//! embedding table on the vector-extension probe result.

use sqlx::PgPool;

use super::error::SinkError;
use super::schema::{
    EMBEDDING_INDEX_HNSW, EMBEDDING_INDEX_IVFFLAT, EMBEDDING_SCHEMA_BYTEA,
    EMBEDDING_SCHEMA_VECTOR, SCHEMA, SCHEMA_VERSION,
};

/// Storage mode for embedding vectors, decided by the capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorMode {
    /// Native `VECTOR(1536)` with an ANN index
    Native,
    /// Fixed-length little-endian f32 bytes
    Bytes,
}

impl std::fmt::Display for VectorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorMode::Native => write!(f, "vector"),
            VectorMode::Bytes => write!(f, "bytea"),
        }
    }
}

/// Probe whether the `vector` extension is installed.
pub async fn probe_vector_support(pool: &PgPool) -> Result<VectorMode, SinkError> {
    let installed: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'vector')",
    )
    .fetch_one(pool)
    .await?;

    Ok(if installed {
        VectorMode::Native
    } else {
        VectorMode::Bytes
    })
}

/// Run all pending migrations.
pub async fn run_migrations(pool: &PgPool, mode: VectorMode) -> Result<(), SinkError> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_schema = 'public'
            AND table_name = 'schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        tracing::debug!(version = SCHEMA_VERSION, %mode, "Applying initial sink schema");
        apply_initial_schema(pool, mode).await?;
        return Ok(());
    }

    let current_version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version WHERE id = 1")
            .fetch_optional(pool)
            .await?;

    match current_version {
        None => {
            tracing::debug!(version = SCHEMA_VERSION, %mode, "Applying initial sink schema");
            apply_initial_schema(pool, mode).await?;
        }
        Some(v) if v < SCHEMA_VERSION => {
            return Err(SinkError::MigrationFailed {
                version: v,
                name: "upgrade".into(),
                error: format!("no migration path from v{} to v{}", v, SCHEMA_VERSION),
            });
        }
        Some(v) if v > SCHEMA_VERSION => {
            tracing::warn!(
                found = v,
                expected = SCHEMA_VERSION,
                "Sink schema is newer than this binary; proceeding read-compatible"
            );
        }
        _ => {
            tracing::debug!(version = SCHEMA_VERSION, "Sink schema is up to date");
        }
    }

    Ok(())
}

async fn apply_initial_schema(pool: &PgPool, mode: VectorMode) -> Result<(), SinkError> {
    let now = chrono::Utc::now().timestamp();

    sqlx::query(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| SinkError::MigrationFailed {
            version: SCHEMA_VERSION,
            name: "core_schema".into(),
            error: e.to_string(),
        })?;

    match mode {
        VectorMode::Native => {
            sqlx::query(EMBEDDING_SCHEMA_VECTOR).execute(pool).await.map_err(|e| {
                SinkError::MigrationFailed {
                    version: SCHEMA_VERSION,
                    name: "embedding_vector".into(),
                    error: e.to_string(),
                }
            })?;
            // HNSW first; older extension builds only know IVFFlat.
            if let Err(e) = sqlx::query(EMBEDDING_INDEX_HNSW).execute(pool).await {
                tracing::debug!(error = %e, "HNSW unavailable, falling back to IVFFlat");
                sqlx::query(EMBEDDING_INDEX_IVFFLAT).execute(pool).await.map_err(|e| {
                    SinkError::MigrationFailed {
                        version: SCHEMA_VERSION,
                        name: "embedding_ann_index".into(),
                        error: e.to_string(),
                    }
                })?;
            }
        }
        VectorMode::Bytes => {
            sqlx::query(EMBEDDING_SCHEMA_BYTEA).execute(pool).await.map_err(|e| {
                SinkError::MigrationFailed {
                    version: SCHEMA_VERSION,
                    name: "embedding_bytea".into(),
                    error: e.to_string(),
                }
            })?;
        }
    }

    sqlx::query(
        "INSERT INTO schema_version (id, version, applied_at, description)
         VALUES (1, $1, $2, 'initial schema')
         ON CONFLICT (id) DO UPDATE SET version = $1, applied_at = $2",
    )
    .bind(SCHEMA_VERSION)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}
