use crate::bail;
use crate::conversions::Cell;
use crate::error::{EngineResult, ErrorKind};
use crate::identifier::{IdentifierKind, QuotedIdentifier, escape, quote, quote_database_code};
use crate::types::SourceColumn;

/// Column restricted by the patient filter.
pub const PERSON_ID_COLUMN: &str = "person_id";

/// Column restricted by the timestamp filter.
pub const OBSERVATION_DATE_COLUMN: &str = "observation_date";

/// A filtered projection of one source table.
///
/// Filters only apply to tables that have the filtered column, and their values are always bound
/// as `?` parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceQuery {
    catalog: Option<String>,
    schema: String,
    table: String,
    columns: Vec<SourceColumn>,
    has_person_id: bool,
    has_observation_date: bool,
    person_ids: Option<Vec<i64>>,
    observed_since: Option<String>,
}

impl SourceQuery {
    /// Projects the `selected` columns of a table whose full column list is `table_columns`.
    ///
    /// An empty or absent selection projects every column. Selecting a column the table does not
    /// have is a validation error.
    pub fn new(
        schema: &str,
        table: &str,
        table_columns: &[SourceColumn],
        selected: Option<&[String]>,
    ) -> EngineResult<Self> {
        escape(schema, IdentifierKind::Schema)?;
        escape(table, IdentifierKind::Table)?;

        let columns = match selected {
            Some(selected) if !selected.is_empty() => {
                let mut columns = Vec::with_capacity(selected.len());
                for name in selected {
                    quote(name)?;
                    match table_columns.iter().find(|column| column.name == *name) {
                        Some(column) => columns.push(column.clone()),
                        None => bail!(
                            ErrorKind::ValidationError,
                            "Selected column does not exist in the source table",
                            format!("{schema}.{table}.{name}")
                        ),
                    }
                }
                columns
            }
            _ => table_columns.to_vec(),
        };

        if columns.is_empty() {
            bail!(
                ErrorKind::InvalidData,
                "Source table has no columns",
                format!("{schema}.{table}")
            );
        }

        for column in &columns {
            quote(&column.name)?;
        }

        let has_column = |name: &str| table_columns.iter().any(|column| column.name == name);

        Ok(Self {
            catalog: None,
            schema: schema.to_owned(),
            table: table.to_owned(),
            columns,
            has_person_id: has_column(PERSON_ID_COLUMN),
            has_observation_date: has_column(OBSERVATION_DATE_COLUMN),
            person_ids: None,
            observed_since: None,
        })
    }

    /// Reads the table from an attached catalog.
    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    /// Keeps rows whose `person_id` is listed. Ignored for tables without that column.
    pub fn with_patient_filter(mut self, person_ids: Option<&[i64]>) -> Self {
        let applies = self.has_person_id;
        self.person_ids = person_ids
            .filter(|ids| applies && !ids.is_empty())
            .map(<[i64]>::to_vec);
        self
    }

    /// Keeps rows observed at or after `cutoff`. Ignored for tables without `observation_date`.
    pub fn with_timestamp_filter(mut self, cutoff: Option<&str>) -> Self {
        let applies = self.has_observation_date;
        self.observed_since = cutoff.filter(|_| applies).map(str::to_owned);
        self
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[SourceColumn] {
        &self.columns
    }

    pub fn is_filtered(&self) -> bool {
        self.person_ids.is_some() || self.observed_since.is_some()
    }

    /// Renders the query with plain column references and a `TIMESTAMP` cutoff.
    pub fn to_sql(&self) -> EngineResult<String> {
        self.to_sql_with(|_, column| column.to_string(), "TIMESTAMP")
    }

    /// Renders the query, wrapping every projected column with `project` and casting the
    /// timestamp cutoff to `timestamp_type`.
    pub fn to_sql_with<F>(&self, project: F, timestamp_type: &str) -> EngineResult<String>
    where
        F: Fn(&SourceColumn, &QuotedIdentifier) -> String,
    {
        let mut projection = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            projection.push(project(column, &quote(&column.name)?));
        }

        let mut sql = format!(
            "SELECT {} FROM {}",
            projection.join(", "),
            self.from_clause()?
        );

        let where_clause = self.where_clause(timestamp_type)?;
        if !where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause);
        }

        Ok(sql)
    }

    /// Renders the unfiltered projection matching no row, used to derive a table shape.
    pub fn to_shape_sql(&self) -> EngineResult<String> {
        let mut projection = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            projection.push(quote(&column.name)?.to_string());
        }

        Ok(format!(
            "SELECT {} FROM {} WHERE false",
            projection.join(", "),
            self.from_clause()?
        ))
    }

    /// Renders only the filter predicates, empty when the table is not filtered.
    pub fn where_clause(&self, timestamp_type: &str) -> EngineResult<String> {
        let mut predicates = Vec::new();

        if let Some(person_ids) = &self.person_ids {
            let placeholders = vec!["?"; person_ids.len()].join(", ");
            predicates.push(format!("{} IN ({placeholders})", quote(PERSON_ID_COLUMN)?));
        }

        if self.observed_since.is_some() {
            predicates.push(format!(
                "{} >= CAST(? AS {timestamp_type})",
                quote(OBSERVATION_DATE_COLUMN)?
            ));
        }

        Ok(predicates.join(" AND "))
    }

    /// Parameters bound to the placeholders of [`SourceQuery::to_sql`], in order.
    pub fn params(&self) -> Vec<Cell> {
        let mut params: Vec<Cell> = self
            .person_ids
            .iter()
            .flatten()
            .map(|id| Cell::I64(*id))
            .collect();

        if let Some(cutoff) = &self.observed_since {
            params.push(Cell::String(cutoff.clone()));
        }

        params
    }

    fn from_clause(&self) -> EngineResult<String> {
        let schema = escape(&self.schema, IdentifierKind::Schema)?;
        let table = escape(&self.table, IdentifierKind::Table)?;

        Ok(match &self.catalog {
            Some(catalog) => format!("{}.{schema}.{table}", quote_database_code(catalog)?),
            None => format!("{schema}.{table}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::mapping::wire;

    fn person_columns() -> Vec<SourceColumn> {
        vec![
            SourceColumn::new("person_id", wire::BIGINT),
            SourceColumn::new("year_of_birth", wire::INTEGER),
            SourceColumn::new("observation_date", wire::DATE),
        ]
    }

    #[test]
    fn projects_every_column_without_selection() {
        let query = SourceQuery::new("public", "person", &person_columns(), None).unwrap();
        assert_eq!(
            query.to_sql().unwrap(),
            r#"SELECT "person_id", "year_of_birth", "observation_date" FROM "public"."person""#
        );
        assert!(query.params().is_empty());
    }

    #[test]
    fn projects_selected_columns_in_selection_order() {
        let selected = vec!["year_of_birth".to_string(), "person_id".to_string()];
        let query =
            SourceQuery::new("public", "person", &person_columns(), Some(&selected)).unwrap();
        assert_eq!(
            query.to_sql().unwrap(),
            r#"SELECT "year_of_birth", "person_id" FROM "public"."person""#
        );
    }

    #[test]
    fn unknown_selected_columns_are_rejected() {
        let selected = vec!["gender".to_string()];
        let err =
            SourceQuery::new("public", "person", &person_columns(), Some(&selected)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn filters_are_parameterized_and_combined() {
        let query = SourceQuery::new("cdm", "person", &person_columns(), None)
            .unwrap()
            .with_catalog("__source_acme")
            .with_patient_filter(Some(&[1, 2, 3]))
            .with_timestamp_filter(Some("2020-01-01"));

        assert_eq!(
            query
                .to_sql_with(|_, column| format!("CAST({column} AS CHAR)"), "DATETIME")
                .unwrap(),
            "SELECT CAST(\"person_id\" AS CHAR), CAST(\"year_of_birth\" AS CHAR), \
             CAST(\"observation_date\" AS CHAR) FROM \"__source_acme\".\"cdm\".\"person\" \
             WHERE \"person_id\" IN (?, ?, ?) AND \"observation_date\" >= CAST(? AS DATETIME)"
        );
        assert_eq!(
            query.params(),
            vec![
                Cell::I64(1),
                Cell::I64(2),
                Cell::I64(3),
                Cell::String("2020-01-01".to_string())
            ]
        );
    }

    #[test]
    fn filters_are_skipped_for_tables_without_the_column() {
        let columns = vec![
            SourceColumn::new("concept_id", wire::INTEGER),
            SourceColumn::new("concept_name", wire::VARCHAR),
        ];
        let query = SourceQuery::new("cdm", "concept", &columns, None)
            .unwrap()
            .with_patient_filter(Some(&[1]))
            .with_timestamp_filter(Some("2020-01-01"));

        assert!(!query.is_filtered());
        assert!(!query.to_sql().unwrap().contains("WHERE"));
        assert!(query.params().is_empty());
    }

    #[test]
    fn filter_columns_do_not_need_to_be_projected() {
        let selected = vec!["year_of_birth".to_string()];
        let query = SourceQuery::new("cdm", "person", &person_columns(), Some(&selected))
            .unwrap()
            .with_patient_filter(Some(&[7]));

        assert_eq!(
            query.to_sql().unwrap(),
            r#"SELECT "year_of_birth" FROM "cdm"."person" WHERE "person_id" IN (?)"#
        );
    }

    #[test]
    fn shape_query_ignores_filters() {
        let query = SourceQuery::new("cdm", "person", &person_columns(), None)
            .unwrap()
            .with_catalog("__source_acme")
            .with_patient_filter(Some(&[7]));

        assert_eq!(
            query.to_shape_sql().unwrap(),
            "SELECT \"person_id\", \"year_of_birth\", \"observation_date\" \
             FROM \"__source_acme\".\"cdm\".\"person\" WHERE false"
        );
    }

    #[test]
    fn unsafe_identifiers_never_reach_sql() {
        assert!(SourceQuery::new("public; DROP", "person", &person_columns(), None).is_err());
        let columns = vec![SourceColumn::new("bad\"name", wire::VARCHAR)];
        assert!(SourceQuery::new("public", "person", &columns, None).is_err());
    }
}
