use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::shared::{PoolConfig, RetryConfig, SourceCredentials, ValidationError};

/// Smallest accepted number of rows per appender flush.
pub const MIN_BATCH_SIZE: usize = 100;

/// Largest accepted number of rows per appender flush.
pub const MAX_BATCH_SIZE: usize = 100_000;

/// Configuration of a single cache creation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    /// Unique identifier of the cache. Names the cache file and its catalog alias.
    pub database_code: String,
    /// Schema read from the source.
    pub schema_name: String,
    /// Schema written in the cache, defaults to [`CacheConfig::schema_name`].
    #[serde(default)]
    pub target_schema_name: Option<String>,
    /// Dialect, locator and secrets of the source database.
    pub credentials: SourceCredentials,
    /// Tables to copy with their column lists. An empty column list selects every column.
    #[serde(default)]
    pub table_filter: Option<TableFilter>,
    /// Person ids kept by tables that have a `person_id` column.
    #[serde(default)]
    pub patient_filter: Option<Vec<i64>>,
    /// ISO-8601 cutoff applied to tables that have an `observation_date` column.
    #[serde(default)]
    pub timestamp_filter: Option<String>,
    /// Tables receiving a full-text index once copied.
    #[serde(default = "default_fts_tables")]
    pub fts_tables: Vec<String>,
    /// Directory holding the cache files.
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    /// Rows buffered before the appender is flushed.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Rows fetched from the source cursor per round trip.
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
    /// Rows between two row progress events.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
    /// Copies tables concurrently on the native scanner path.
    #[serde(default)]
    pub parallel_copy: bool,
    /// Upper bound of concurrent table copies when [`CacheConfig::parallel_copy`] is set.
    #[serde(default = "default_max_parallel_tables")]
    pub max_parallel_tables: usize,
    /// Wraps every cursor based table copy into a destination transaction.
    #[serde(default = "default_true")]
    pub use_transactions: bool,
    /// Keeps a pool of source connections instead of a single one.
    #[serde(default = "default_true")]
    pub use_pooling: bool,
    /// Skips tables already present in the cache. When disabled they are copied again.
    #[serde(default = "default_true")]
    pub resume: bool,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_fts_tables() -> Vec<String> {
    vec!["concept".to_string()]
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_batch_size() -> usize {
    10_000
}

fn default_fetch_size() -> usize {
    2_000
}

fn default_progress_interval() -> u64 {
    10_000
}

fn default_max_parallel_tables() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl CacheConfig {
    /// Creates a configuration with every optional setting at its default.
    pub fn new(
        database_code: impl Into<String>,
        schema_name: impl Into<String>,
        credentials: SourceCredentials,
    ) -> Self {
        Self {
            database_code: database_code.into(),
            schema_name: schema_name.into(),
            target_schema_name: None,
            credentials,
            table_filter: None,
            patient_filter: None,
            timestamp_filter: None,
            fts_tables: default_fts_tables(),
            cache_path: default_cache_path(),
            batch_size: default_batch_size(),
            fetch_size: default_fetch_size(),
            progress_interval: default_progress_interval(),
            parallel_copy: false,
            max_parallel_tables: default_max_parallel_tables(),
            use_transactions: true,
            use_pooling: true,
            resume: true,
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Schema written in the cache.
    pub fn target_schema(&self) -> &str {
        self.target_schema_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.schema_name)
    }

    /// Path of the cache file, `<cache_path>/<database_code>.db`.
    pub fn cache_file(&self) -> PathBuf {
        self.cache_path.join(format!("{}.db", self.database_code))
    }

    /// Copy of this configuration without secrets, safe to persist.
    pub fn redacted(&self) -> Self {
        Self {
            credentials: self.credentials.redacted(),
            ..self.clone()
        }
    }

    /// Validates the structure of the configuration.
    ///
    /// Identifier syntax is checked by the engine, this only covers presence, bounds and
    /// credential completeness.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.database_code.trim().is_empty() {
            return Err(ValidationError::MissingField("database_code"));
        }

        if self.schema_name.trim().is_empty() {
            return Err(ValidationError::MissingField("schema_name"));
        }

        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(ValidationError::OutOfRange {
                field: "batch_size",
                value: self.batch_size as u64,
                min: MIN_BATCH_SIZE as u64,
                max: MAX_BATCH_SIZE as u64,
            });
        }

        if self.fetch_size == 0 {
            return Err(ValidationError::InvalidConfig(
                "`fetch_size` must be greater than zero".to_string(),
            ));
        }

        if self.progress_interval == 0 {
            return Err(ValidationError::InvalidConfig(
                "`progress_interval` must be greater than zero".to_string(),
            ));
        }

        if self.max_parallel_tables == 0 {
            return Err(ValidationError::InvalidConfig(
                "`max_parallel_tables` must be greater than zero".to_string(),
            ));
        }

        if let Some(patient_filter) = &self.patient_filter
            && patient_filter.is_empty()
        {
            return Err(ValidationError::InvalidConfig(
                "`patient_filter` must list at least one id when present".to_string(),
            ));
        }

        if let Some(timestamp) = &self.timestamp_filter
            && !is_iso_timestamp(timestamp)
        {
            return Err(ValidationError::InvalidTimestamp(timestamp.clone()));
        }

        if let Some(table_filter) = &self.table_filter
            && table_filter.tables().any(|table| table.trim().is_empty())
        {
            return Err(ValidationError::InvalidConfig(
                "`table_filter` contains an empty table name".to_string(),
            ));
        }

        self.credentials.validate()?;
        self.pool.validate()?;
        self.retry.validate()?;

        Ok(())
    }
}

fn is_iso_timestamp(value: &str) -> bool {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || DateTime::parse_from_rfc3339(value).is_ok()
}

/// Tables to copy, each with the columns to keep, in document order.
///
/// Order matters: tables are copied in the order they are listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableFilter {
    entries: Vec<(String, Vec<String>)>,
}

impl TableFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table, replacing its column list when it is already present.
    pub fn with_table<I, C>(mut self, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        let table = table.into();
        let columns = columns.into_iter().map(Into::into).collect();

        match self.entries.iter_mut().find(|(name, _)| *name == table) {
            Some((_, existing)) => *existing = columns,
            None => self.entries.push((table, columns)),
        }

        self
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(table, _)| table.as_str())
    }

    pub fn contains(&self, table: &str) -> bool {
        self.entries.iter().any(|(name, _)| name == table)
    }

    /// Columns selected for `table`, [`None`] when the table is not part of the filter.
    ///
    /// An empty slice selects every column.
    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, columns)| columns.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for TableFilter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (table, columns) in &self.entries {
            map.serialize_entry(table, columns)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TableFilter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TableFilterVisitor;

        impl<'de> Visitor<'de> for TableFilterVisitor {
            type Value = TableFilter;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of table names to column lists")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries: Vec<(String, Vec<String>)> =
                    Vec::with_capacity(map.size_hint().unwrap_or(0));

                while let Some((table, columns)) = map.next_entry::<String, Option<Vec<String>>>()? {
                    if entries.iter().any(|(name, _)| *name == table) {
                        return Err(de::Error::custom(format!(
                            "table `{table}` appears twice in the table filter"
                        )));
                    }
                    entries.push((table, columns.unwrap_or_default()));
                }

                Ok(TableFilter { entries })
            }
        }

        deserializer.deserialize_map(TableFilterVisitor)
    }
}

impl<T, C> FromIterator<(T, C)> for TableFilter
where
    T: Into<String>,
    C: IntoIterator,
    C::Item: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (T, C)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(TableFilter::new(), |filter, (table, columns)| {
                filter.with_table(table, columns)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Dialect;

    fn config() -> CacheConfig {
        CacheConfig::new(
            "acme",
            "public",
            SourceCredentials::native(Dialect::Postgres, "db", None, "cdm", "reader", None),
        )
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = config();
        assert_eq!(config.batch_size, 10_000);
        assert_eq!(config.fetch_size, 2_000);
        assert_eq!(config.progress_interval, 10_000);
        assert_eq!(config.fts_tables, vec!["concept".to_string()]);
        assert!(config.use_transactions);
        assert!(config.use_pooling);
        assert!(config.resume);
        assert!(!config.parallel_copy);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.pool.size, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn target_schema_defaults_to_source_schema() {
        let mut config = config();
        assert_eq!(config.target_schema(), "public");

        config.target_schema_name = Some("cache".to_string());
        assert_eq!(config.target_schema(), "cache");
    }

    #[test]
    fn cache_file_is_named_after_database_code() {
        let mut config = config();
        config.cache_path = PathBuf::from("/data/caches");
        assert_eq!(config.cache_file(), PathBuf::from("/data/caches/acme.db"));
    }

    #[test]
    fn batch_size_is_bounded() {
        let mut config = config();
        config.batch_size = 99;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::OutOfRange {
                field: "batch_size",
                ..
            })
        ));

        config.batch_size = 100_001;
        assert!(config.validate().is_err());

        config.batch_size = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_schema_name_is_rejected() {
        let mut config = config();
        config.schema_name = " ".to_string();
        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingField("schema_name"))
        );
    }

    #[test]
    fn timestamp_filter_must_be_iso() {
        let mut config = config();
        for valid in [
            "2020-01-01",
            "2020-01-01T10:30:00",
            "2020-01-01 10:30:00.123",
            "2020-01-01T10:30:00Z",
            "2020-01-01T10:30:00+02:00",
        ] {
            config.timestamp_filter = Some(valid.to_string());
            assert!(config.validate().is_ok(), "{valid} should be accepted");
        }

        config.timestamp_filter = Some("01/02/2020".to_string());
        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidTimestamp("01/02/2020".to_string()))
        );
    }

    #[test]
    fn empty_patient_filter_is_rejected() {
        let mut config = config();
        config.patient_filter = Some(vec![]);
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn redacted_config_has_no_password() {
        let mut config = config();
        config.credentials = SourceCredentials::native(
            Dialect::Postgres,
            "db",
            Some(5433),
            "cdm",
            "reader",
            Some("s3cret".into()),
        );
        let redacted = config.redacted();
        assert!(redacted.credentials.password().is_none());
        assert_eq!(redacted.credentials.port(), 5433);
    }

    #[test]
    fn table_filter_preserves_document_order() {
        let filter: TableFilter = serde_json::from_str(
            r#"{"visit_occurrence": [], "person": ["person_id", "year_of_birth"], "concept": null}"#,
        )
        .unwrap();

        assert_eq!(
            filter.tables().collect::<Vec<_>>(),
            vec!["visit_occurrence", "person", "concept"]
        );
        assert_eq!(
            filter.columns("person"),
            Some(&["person_id".to_string(), "year_of_birth".to_string()][..])
        );
        assert_eq!(filter.columns("concept"), Some(&[][..]));
        assert_eq!(filter.columns("drug_exposure"), None);
    }

    #[test]
    fn table_filter_rejects_duplicate_tables() {
        let result = serde_json::from_str::<TableFilter>(r#"{"person": [], "person": ["a"]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn table_filter_serializes_as_map() {
        let filter = TableFilter::new()
            .with_table("person", ["person_id"])
            .with_table("concept", Vec::<String>::new());
        let json = serde_json::to_string(&filter).unwrap();
        assert_eq!(json, r#"{"person":["person_id"],"concept":[]}"#);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: CacheConfig = serde_json::from_str(
            r#"{
                "database_code": "acme-1",
                "schema_name": "cdm",
                "credentials": {"dialect": "duckdb", "connection_string": "/tmp/source.duckdb"},
                "table_filter": {"person": ["person_id"]}
            }"#,
        )
        .unwrap();

        assert_eq!(config.target_schema(), "cdm");
        assert_eq!(config.batch_size, 10_000);
        assert!(config.resume);
        assert!(config.validate().is_ok());
    }
}
