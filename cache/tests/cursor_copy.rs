use cache::jobs::JobState;
use cache::progress::ProgressEvent;
use cache::store::AnalyticalStore;
use cache::test_utils::database::{SOURCE_TABLES, test_config};
use cache::test_utils::sink::RecordingSink;
use cache_config::shared::TableFilter;

use crate::common::{cached_columns, cached_tables, count_rows, setup, spawn_engine};

mod common;

#[tokio::test(flavor = "multi_thread")]
async fn every_source_table_is_copied_with_its_rows() {
    let dirs = setup();
    let engine = spawn_engine().await;
    let config = test_config("acme", &dirs.source, &dirs.cache_dir);
    let sink = RecordingSink::new();

    let result = engine.create_cache(&config, Some(&sink)).await.unwrap();

    assert!(result.success, "{result:?}");
    assert!(!result.canceled);
    assert!(result.tables_failed.is_empty());
    assert_eq!(result.database_code, "acme");
    assert_eq!(result.schema_name, "main");

    let copied: Vec<(&str, u64)> = result
        .tables_copied
        .iter()
        .map(|table| (table.table.as_str(), table.rows_copied))
        .collect();
    assert_eq!(copied, SOURCE_TABLES.to_vec());
    assert_eq!(result.total_rows(), 15);
    assert!(dirs.cache_dir.join("acme.db").exists());

    for (table, rows) in SOURCE_TABLES {
        assert_eq!(count_rows(engine.store(), "acme", table).await, rows as i64);
    }

    let status = engine.get_job_status("acme").await.unwrap().unwrap();
    assert_eq!(status.status, JobState::Complete);
    assert_eq!(status.total_tables, 3);
    assert_eq!(status.tables_completed, 3);
    assert_eq!(status.rows_copied, 15);
    assert!(status.current_table.is_none());
    assert!(status.end_time.is_some());

    let kinds = sink.kinds();
    assert_eq!(kinds.first(), Some(&"job-start"));
    assert_eq!(kinds.last(), Some(&"job-complete"));
    assert_eq!(kinds.iter().filter(|kind| **kind == "table-complete").count(), 3);
    assert_eq!(
        sink.started_tables(),
        vec!["observation", "person", "visit_occurrence"]
    );
    assert!(sink.events().contains(&ProgressEvent::TableStart {
        table: "person".to_string(),
        index: 2,
        total: 3,
    }));
}

#[tokio::test(flavor = "multi_thread")]
async fn copied_values_keep_their_types_and_nulls() {
    let dirs = setup();
    let engine = spawn_engine().await;
    let config = test_config("acme", &dirs.source, &dirs.cache_dir);

    let result = engine.create_cache(&config, None).await.unwrap();
    assert!(result.success, "{result:?}");

    let columns = cached_columns(engine.store(), "acme", "observation").await;
    let types: Vec<(&str, &str)> = columns
        .iter()
        .map(|(name, data_type)| (name.as_str(), data_type.as_str()))
        .collect();
    assert_eq!(
        types,
        vec![
            ("observation_id", "BIGINT"),
            ("person_id", "BIGINT"),
            ("observation_date", "DATE"),
            ("value_as_number", "DECIMAL(10,2)"),
            ("value_as_string", "VARCHAR"),
            ("is_verified", "BOOLEAN"),
        ]
    );

    let rows = engine
        .store()
        .query(
            "SELECT CAST(value_as_number AS VARCHAR), value_as_string, \
             CAST(observation_date AS VARCHAR) FROM acme.main.observation \
             WHERE observation_id = 12",
        )
        .await
        .unwrap();
    assert_eq!(rows[0].get_string(0).unwrap(), None);
    assert_eq!(rows[0].get_string(1).unwrap().as_deref(), Some("it's fine"));
    assert_eq!(rows[0].get_string(2).unwrap().as_deref(), Some("2021-03-30"));

    let rows = engine
        .store()
        .query(
            "SELECT CAST(birth_datetime AS VARCHAR) FROM acme.main.person \
             WHERE person_id IN (2, 3) ORDER BY person_id",
        )
        .await
        .unwrap();
    assert_eq!(
        rows[0].get_string(0).unwrap().as_deref(),
        Some("1985-11-12 23:05:10")
    );
    assert_eq!(rows[1].get_string(0).unwrap(), None);

    let rows = engine
        .store()
        .query(
            "SELECT octet_length(visit_note) FROM acme.main.visit_occurrence \
             WHERE visit_occurrence_id = 100",
        )
        .await
        .unwrap();
    assert_eq!(rows[0].get_i64(0).unwrap(), Some(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn table_filter_selects_tables_and_columns_in_order() {
    let dirs = setup();
    let engine = spawn_engine().await;
    let mut config = test_config("acme", &dirs.source, &dirs.cache_dir);
    config.table_filter = Some(
        TableFilter::new()
            .with_table("person", ["year_of_birth", "person_id"])
            .with_table("condition_occurrence", Vec::<String>::new())
            .with_table("observation", Vec::<String>::new()),
    );
    let sink = RecordingSink::new();

    let result = engine.create_cache(&config, Some(&sink)).await.unwrap();

    assert!(result.success, "{result:?}");
    assert_eq!(sink.started_tables(), vec!["person", "observation"]);
    assert_eq!(
        cached_tables(engine.store(), "acme").await,
        vec!["observation", "person"]
    );

    let columns: Vec<String> = cached_columns(engine.store(), "acme", "person")
        .await
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(columns, vec!["year_of_birth", "person_id"]);
    assert_eq!(
        cached_columns(engine.store(), "acme", "observation").await.len(),
        6
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_filtered_column_fails_only_its_table() {
    let dirs = setup();
    let engine = spawn_engine().await;
    let mut config = test_config("acme", &dirs.source, &dirs.cache_dir);
    config.table_filter = Some(
        TableFilter::new()
            .with_table("person", ["person_id", "shoe_size"])
            .with_table("visit_occurrence", Vec::<String>::new()),
    );

    let result = engine.create_cache(&config, None).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.tables_failed.len(), 1);
    assert_eq!(result.tables_failed[0].table, "person");
    assert!(result.tables_failed[0].error.contains("shoe_size"));
    assert_eq!(result.tables_copied[0].table, "visit_occurrence");

    let status = engine.get_job_status("acme").await.unwrap().unwrap();
    assert_eq!(status.status, JobState::Failed);
    assert_eq!(status.tables_failed_count, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn patient_and_timestamp_filters_restrict_rows() {
    let dirs = setup();
    let engine = spawn_engine().await;
    let mut config = test_config("acme", &dirs.source, &dirs.cache_dir);
    config.patient_filter = Some(vec![1, 2]);
    config.timestamp_filter = Some("2021-01-01".to_string());

    let result = engine.create_cache(&config, None).await.unwrap();
    assert!(result.success, "{result:?}");

    // Only observation has an observation_date column.
    assert_eq!(count_rows(engine.store(), "acme", "observation").await, 2);
    assert_eq!(count_rows(engine.store(), "acme", "person").await, 2);
    assert_eq!(count_rows(engine.store(), "acme", "visit_occurrence").await, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn resume_skips_tables_already_cached() {
    let dirs = setup();
    let engine = spawn_engine().await;

    let mut config = test_config("acme", &dirs.source, &dirs.cache_dir);
    config.table_filter = Some(TableFilter::new().with_table("person", Vec::<String>::new()));
    let result = engine.create_cache(&config, None).await.unwrap();
    assert!(result.success, "{result:?}");

    config.table_filter = None;
    let sink = RecordingSink::new();
    let result = engine.create_cache(&config, Some(&sink)).await.unwrap();
    assert!(result.success, "{result:?}");
    assert_eq!(sink.started_tables(), vec!["observation", "visit_occurrence"]);
    assert_eq!(
        cached_tables(engine.store(), "acme").await,
        vec!["observation", "person", "visit_occurrence"]
    );

    // Nothing left to copy.
    let sink = RecordingSink::new();
    let result = engine.create_cache(&config, Some(&sink)).await.unwrap();
    assert!(result.success);
    assert!(result.tables_copied.is_empty());
    assert_eq!(sink.kinds(), vec!["job-start", "job-complete"]);

    config.resume = false;
    let result = engine.create_cache(&config, None).await.unwrap();
    assert_eq!(result.tables_copied.len(), 3);
    assert_eq!(count_rows(engine.store(), "acme", "person").await, 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn copies_work_without_transactions_or_pooling() {
    let dirs = setup();
    let engine = spawn_engine().await;
    let mut config = test_config("acme", &dirs.source, &dirs.cache_dir);
    config.use_transactions = false;
    config.use_pooling = false;
    config.target_schema_name = Some("cdm".to_string());

    let result = engine.create_cache(&config, None).await.unwrap();

    assert!(result.success, "{result:?}");
    assert_eq!(result.schema_name, "cdm");
    let rows = engine
        .store()
        .query("SELECT count(*) FROM acme.cdm.person")
        .await
        .unwrap();
    assert_eq!(rows[0].get_i64(0).unwrap(), Some(5));
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_source_fails_the_job_without_creating_the_cache() {
    let dirs = setup();
    let engine = spawn_engine().await;
    let config = test_config("acme", &dirs.cache_dir.join("missing.duckdb"), &dirs.cache_dir);
    let sink = RecordingSink::new();

    let result = engine.create_cache(&config, Some(&sink)).await.unwrap();

    assert!(!result.success);
    assert!(result.tables_copied.is_empty());
    let error = result.error.unwrap();
    assert!(error.starts_with("Failed to connect to source"), "{error}");
    assert_eq!(sink.kinds(), vec!["job-failed"]);

    let status = engine.get_job_status("acme").await.unwrap().unwrap();
    assert_eq!(status.status, JobState::Error);
    assert_eq!(status.error.as_deref(), Some(error.as_str()));
    assert!(!engine.is_attached("acme").await.unwrap());
    assert!(!dirs.cache_dir.join("acme.db").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn a_finished_cache_can_be_detached() {
    let dirs = setup();
    let engine = spawn_engine().await;
    let config = test_config("acme-2024", &dirs.source, &dirs.cache_dir);

    let result = engine.create_cache(&config, None).await.unwrap();
    assert!(result.success, "{result:?}");
    assert!(engine.is_attached("acme-2024").await.unwrap());

    engine.detach("acme-2024").await.unwrap();
    assert!(!engine.is_attached("acme-2024").await.unwrap());
    assert!(dirs.cache_dir.join("acme-2024.db").exists());
}
