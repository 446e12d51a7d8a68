//! Sink schema definitions
//!
//! The embedding table has two shapes, selected at startup by a capability
//! probe: a native `VECTOR(1536)` column with an ANN index when the `vector`
//! extension is installed, or a fixed-length BYTEA fallback otherwise.
//! Callers go through the `EmbeddingStore` trait and never observe the
//! difference.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Core schema shared by both storage modes
pub const SCHEMA: &str = r#"
-- =============================================================================
-- Infrastructure: schema version tracking
-- =============================================================================
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    applied_at BIGINT NOT NULL,
    description TEXT
);

-- =============================================================================
-- 1. Work orders
-- =============================================================================
CREATE TABLE IF NOT EXISTS notification_text (
    notification_id TEXT PRIMARY KEY,
    notified_at TIMESTAMPTZ NOT NULL,
    assigned_at TIMESTAMPTZ,
    closed_at TIMESTAMPTZ,
    category TEXT,
    country TEXT,
    eq_id TEXT,
    fl_id TEXT,
    mat_id TEXT,
    serial_id TEXT,
    trend_l1 TEXT,
    trend_l2 TEXT,
    trend_l3 TEXT,
    issue_type TEXT,
    medium_text TEXT,
    long_text TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_notification_notified_at ON notification_text(notified_at);
CREATE INDEX IF NOT EXISTS idx_notification_eq_id ON notification_text(eq_id);
CREATE INDEX IF NOT EXISTS idx_notification_issue_type ON notification_text(issue_type);
CREATE INDEX IF NOT EXISTS idx_notification_long_text_fts
    ON notification_text USING GIN (to_tsvector('simple', coalesce(long_text, '')));
CREATE INDEX IF NOT EXISTS idx_notification_medium_text_fts
    ON notification_text USING GIN (to_tsvector('simple', coalesce(medium_text, '')));

-- =============================================================================
-- 2. AI extractions (one current row per work order per model version)
-- =============================================================================
CREATE TABLE IF NOT EXISTS ai_extracted (
    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    notification_id TEXT NOT NULL REFERENCES notification_text(notification_id) ON DELETE CASCADE,
    keywords JSONB NOT NULL DEFAULT '[]',
    primary_symptom TEXT,
    root_cause TEXT,
    summary TEXT,
    solution TEXT,
    solution_type TEXT,
    components JSONB NOT NULL DEFAULT '[]',
    processes JSONB NOT NULL DEFAULT '[]',
    main_component TEXT,
    main_process TEXT,
    confidence DECIMAL(5,4) NOT NULL CHECK (confidence >= 0 AND confidence <= 1),
    model_version TEXT NOT NULL,
    extracted_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (notification_id, model_version)
);

CREATE INDEX IF NOT EXISTS idx_ai_extracted_notification ON ai_extracted(notification_id);

-- =============================================================================
-- 3. ETL metadata (one row per managed table)
-- =============================================================================
CREATE TABLE IF NOT EXISTS etl_metadata (
    table_name TEXT PRIMARY KEY,
    last_watermark TIMESTAMPTZ,
    rows_processed BIGINT NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'in_progress', 'completed', 'failed')),
    error_message TEXT,
    checkpoint_blob JSONB,
    checkpoint_at TIMESTAMPTZ,
    batch_size INTEGER,
    total_records BIGINT,
    processed_records BIGINT,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

-- =============================================================================
-- 4. Dead letter (quarantined rows with the originating sink error)
-- =============================================================================
CREATE TABLE IF NOT EXISTS dead_letter (
    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    table_name TEXT NOT NULL,
    source_id TEXT NOT NULL,
    error_code TEXT,
    error_message TEXT NOT NULL,
    payload JSONB NOT NULL,
    quarantined_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_dead_letter_table ON dead_letter(table_name, quarantined_at);
"#;

/// Embedding table when the `vector` extension is available.
///
/// The ANN index prefers HNSW; migrations fall back to IVFFlat when the
/// installed extension predates HNSW support.
pub const EMBEDDING_SCHEMA_VECTOR: &str = r#"
CREATE TABLE IF NOT EXISTS embedding (
    notification_id TEXT PRIMARY KEY REFERENCES notification_text(notification_id) ON DELETE CASCADE,
    source_text TEXT NOT NULL,
    vector VECTOR(1536) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

/// HNSW index (preferred)
pub const EMBEDDING_INDEX_HNSW: &str =
    "CREATE INDEX IF NOT EXISTS idx_embedding_vector ON embedding USING hnsw (vector vector_cosine_ops)";

/// IVFFlat index (fallback for older extension versions)
pub const EMBEDDING_INDEX_IVFFLAT: &str =
    "CREATE INDEX IF NOT EXISTS idx_embedding_vector ON embedding USING ivfflat (vector vector_cosine_ops)";

/// Embedding table in byte-storage mode (no vector extension).
pub const EMBEDDING_SCHEMA_BYTEA: &str = r#"
CREATE TABLE IF NOT EXISTS embedding (
    notification_id TEXT PRIMARY KEY REFERENCES notification_text(notification_id) ON DELETE CASCADE,
    source_text TEXT NOT NULL,
    vector BYTEA NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;
