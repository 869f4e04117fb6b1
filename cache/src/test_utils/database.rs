use std::path::Path;

use cache_config::shared::{CacheConfig, RetryConfig, SourceCredentials};
use duckdb::Connection;

use crate::error::EngineResult;

/// Schema holding the seeded tables.
pub const SOURCE_SCHEMA: &str = "main";

/// Seeded tables in discovery order, with their row counts.
pub const SOURCE_TABLES: [(&str, u64); 3] = [
    ("observation", 6),
    ("person", 5),
    ("visit_occurrence", 4),
];

const SEED_SQL: &str = "
CREATE TABLE person (
    person_id BIGINT NOT NULL,
    gender_concept_id INTEGER,
    year_of_birth INTEGER,
    birth_datetime TIMESTAMP,
    person_source_value VARCHAR
);
INSERT INTO person VALUES
    (1, 8507, 1970, TIMESTAMP '1970-03-01 08:30:00', 'P-001'),
    (2, 8532, 1985, TIMESTAMP '1985-11-12 23:05:10', 'P-002'),
    (3, 8532, 1992, NULL, 'P-003'),
    (4, 8507, 2001, TIMESTAMP '2001-07-04 00:00:00', NULL),
    (5, 8551, 1964, NULL, 'P-005');

CREATE TABLE observation (
    observation_id BIGINT NOT NULL,
    person_id BIGINT,
    observation_date DATE,
    value_as_number DECIMAL(10,2),
    value_as_string VARCHAR,
    is_verified BOOLEAN
);
INSERT INTO observation VALUES
    (10, 1, DATE '2020-01-15', 12.50, 'baseline', true),
    (11, 1, DATE '2022-06-01', 13.75, NULL, false),
    (12, 2, DATE '2021-03-30', NULL, 'it''s fine', true),
    (13, 3, DATE '2023-02-14', 99.99, 'follow-up', NULL),
    (14, 4, DATE '2019-12-31', 0.01, 'late', true),
    (15, 5, DATE '2023-08-08', 42.00, 'final', false);

CREATE TABLE visit_occurrence (
    visit_occurrence_id BIGINT NOT NULL,
    person_id BIGINT,
    visit_concept_id INTEGER,
    visit_start_date DATE,
    visit_note BLOB
);
INSERT INTO visit_occurrence VALUES
    (100, 1, 9201, DATE '2020-01-15', '\\x01\\x02'::BLOB),
    (101, 2, 9202, DATE '2021-03-30', NULL),
    (102, 3, 9203, DATE '2023-02-14', 'abc'::BLOB),
    (103, 5, 9201, DATE '2023-08-08', NULL);
";

/// Creates an embedded source database at `path` holding the seeded tables.
pub fn seed_source_database(path: &Path) -> EngineResult<()> {
    let conn = Connection::open(path)?;
    conn.execute_batch(SEED_SQL)?;

    Ok(())
}

/// Runs `sql` against the embedded source database at `path`.
pub fn execute_on_source(path: &Path, sql: &str) -> EngineResult<()> {
    let conn = Connection::open(path)?;
    conn.execute_batch(sql)?;

    Ok(())
}

/// Configuration copying the embedded source at `source` into a cache under `cache_dir`.
///
/// Full-text indexing is disabled and retries back off for a few milliseconds only.
pub fn test_config(database_code: &str, source: &Path, cache_dir: &Path) -> CacheConfig {
    let mut config = CacheConfig::new(
        database_code,
        SOURCE_SCHEMA,
        SourceCredentials::embedded(source.display().to_string()),
    );
    config.cache_path = cache_dir.to_path_buf();
    config.fts_tables = Vec::new();
    config.batch_size = 100;
    config.progress_interval = 2;
    config.retry = RetryConfig {
        max_retries: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_factor: 2.0,
    };

    config
}
