//! Source driver for MySQL and MariaDB over `sqlx`.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use cache_config::shared::{Dialect, SourceCredentials, mask_connection_string};
use futures::StreamExt;
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::query::Query;
use sqlx::{Connection, Row};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::conversions::{Cell, RawValue};
use crate::error::{EngineResult, ErrorKind};
use crate::source::duckdb::ChannelCursor;
use crate::source::{SourceConnection, SourceCursor, SourceDriver, SourceQuery};
use crate::types::SourceColumn;
use crate::types::mapping::wire;
use crate::{bail, engine_error};

/// Driver for one of the MySQL wire compatible dialects.
#[derive(Debug, Clone, Copy)]
pub struct MySqlDriver {
    dialect: Dialect,
}

impl MySqlDriver {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }
}

#[async_trait]
impl SourceDriver for MySqlDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn connect(
        &self,
        credentials: &SourceCredentials,
        read_only: bool,
        _timeout: Duration,
    ) -> EngineResult<Box<dyn SourceConnection>> {
        let url = connection_url(credentials.connection_string().unwrap_or_default());
        let mut options = MySqlConnectOptions::from_str(&url).map_err(|err| {
            engine_error!(
                ErrorKind::ConfigError,
                "Invalid MySQL connection string",
                format!("{}: {err}", mask_connection_string(&url))
            )
        })?;

        if let Some(user) = credentials.user() {
            options = options.username(user);
        }
        if let Some(password) = credentials.password() {
            options = options.password(password.expose());
        }

        let mut conn = MySqlConnection::connect_with(&options).await?;

        // Quoted identifiers are rendered with double quotes.
        sqlx::query("SET SESSION sql_mode = CONCAT(@@SESSION.sql_mode, ',ANSI_QUOTES')")
            .execute(&mut conn)
            .await?;
        if read_only {
            sqlx::query("SET SESSION TRANSACTION READ ONLY")
                .execute(&mut conn)
                .await?;
        }

        debug!(dialect = %self.dialect, read_only, "mysql source connection opened");

        Ok(Box::new(MySqlSourceConnection {
            conn: Some(conn),
            returning: None,
        }))
    }
}

fn connection_url(connection_string: &str) -> String {
    let url = connection_string.trim();
    let url = url.strip_prefix("jdbc:").unwrap_or(url);

    match url.strip_prefix("mariadb://") {
        Some(rest) => format!("mysql://{rest}"),
        None => url.to_owned(),
    }
}

struct MySqlSourceConnection {
    conn: Option<MySqlConnection>,
    /// Hands the connection back once an open cursor is exhausted or dropped.
    returning: Option<oneshot::Receiver<MySqlConnection>>,
}

impl MySqlSourceConnection {
    async fn conn(&mut self) -> EngineResult<&mut MySqlConnection> {
        if self.conn.is_none()
            && let Some(returning) = self.returning.take()
        {
            self.conn = returning.await.ok();
        }

        match self.conn.as_mut() {
            Some(conn) => Ok(conn),
            None => bail!(ErrorKind::ResourceClosed, "Source connection is closed"),
        }
    }
}

#[async_trait]
impl SourceConnection for MySqlSourceConnection {
    async fn list_tables(&mut self, schema: &str) -> EngineResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT CAST(TABLE_NAME AS CHAR) FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
        )
        .bind(schema)
        .fetch_all(self.conn().await?)
        .await?;

        rows.iter()
            .map(|row| Ok(row.try_get::<String, _>(0)?))
            .collect()
    }

    async fn list_columns(&mut self, schema: &str, table: &str) -> EngineResult<Vec<SourceColumn>> {
        let rows = sqlx::query(
            "SELECT CAST(COLUMN_NAME AS CHAR), CAST(DATA_TYPE AS CHAR), \
             CAST(COLUMN_TYPE AS CHAR), NUMERIC_PRECISION, NUMERIC_SCALE, \
             CAST(IS_NULLABLE AS CHAR) FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(self.conn().await?)
        .await?;

        rows.iter().map(source_column).collect()
    }

    async fn estimate_rows(&mut self, schema: &str, table: &str) -> EngineResult<Option<u64>> {
        let row = sqlx::query(
            "SELECT TABLE_ROWS FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
        )
        .bind(schema)
        .bind(table)
        .fetch_optional(self.conn().await?)
        .await?;

        match row {
            Some(row) => Ok(row.try_get::<Option<u64>, _>(0)?),
            None => Ok(None),
        }
    }

    async fn open_cursor(
        &mut self,
        query: &SourceQuery,
        fetch_size: usize,
    ) -> EngineResult<Box<dyn SourceCursor>> {
        let sql = query.to_sql_with(
            |column, quoted| match column.wire_type {
                wire::BLOB | wire::BINARY | wire::VARBINARY | wire::LONGVARBINARY => {
                    format!("HEX({quoted})")
                }
                wire::BIT => format!("CAST(CAST({quoted} AS UNSIGNED) AS CHAR)"),
                _ => format!("CAST({quoted} AS CHAR)"),
            },
            "DATETIME",
        )?;
        let params = query.params();
        let columns = query.columns().to_vec();
        let width = columns.len();

        self.conn().await?;
        let Some(mut conn) = self.conn.take() else {
            bail!(ErrorKind::ResourceClosed, "Source connection is closed");
        };

        debug!(sql, fetch_size, "opening mysql source cursor");

        let (tx, rx) = mpsc::channel(fetch_size.max(1));
        let (return_tx, return_rx) = oneshot::channel();
        self.returning = Some(return_rx);

        tokio::spawn(async move {
            match bind_params(sqlx::query(&sql), params) {
                Ok(statement) => {
                    let mut rows = statement.fetch(&mut conn);
                    while let Some(row) = rows.next().await {
                        let values = row.map_err(Into::into).and_then(|row| read_row(&row, width));
                        let failed = values.is_err();

                        // The cursor was dropped.
                        if tx.send(values).await.is_err() || failed {
                            break;
                        }
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                }
            }

            if return_tx.send(conn).is_err() {
                warn!("mysql source connection was released while a cursor was open");
            }
        });

        Ok(Box::new(ChannelCursor { columns, rows: rx }))
    }

    async fn is_valid(&mut self) -> bool {
        match self.conn().await {
            Ok(conn) => conn.ping().await.is_ok(),
            Err(_) => false,
        }
    }

    async fn close(&mut self) -> EngineResult<()> {
        self.conn().await?;
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
        }

        Ok(())
    }
}

fn bind_params(
    mut statement: Query<'_, MySql, MySqlArguments>,
    params: Vec<Cell>,
) -> EngineResult<Query<'_, MySql, MySqlArguments>> {
    for param in params {
        statement = match param {
            Cell::I64(value) => statement.bind(value),
            Cell::String(value) => statement.bind(value),
            other => bail!(
                ErrorKind::InvalidData,
                "Unsupported source query parameter",
                format!("{other:?}")
            ),
        };
    }

    Ok(statement)
}

fn read_row(row: &MySqlRow, width: usize) -> EngineResult<Vec<RawValue>> {
    let mut values = Vec::with_capacity(width);
    for index in 0..width {
        let value: Option<String> = row.try_get(index)?;
        values.push(value.map(RawValue::Text).unwrap_or(RawValue::Null));
    }

    Ok(values)
}

fn source_column(row: &MySqlRow) -> EngineResult<SourceColumn> {
    let name: String = row.try_get(0)?;
    let data_type: String = row.try_get(1)?;
    let column_type: String = row.try_get(2)?;
    let precision: Option<u64> = row.try_get(3)?;
    let scale: Option<u64> = row.try_get(4)?;
    let nullable: String = row.try_get(5)?;

    let data_type = data_type.to_lowercase();
    let column_type = column_type.to_lowercase();
    let unsigned = column_type.contains("unsigned");

    let (wire_type, fixed_precision) = match data_type.as_str() {
        "bit" if column_type == "bit(1)" => (wire::BIT, None),
        "bit" => (wire::BIGINT, None),
        "tinyint" if column_type.starts_with("tinyint(1)") => (wire::BIT, None),
        "tinyint" if unsigned => (wire::SMALLINT, None),
        "tinyint" => (wire::TINYINT, None),
        "smallint" if unsigned => (wire::INTEGER, None),
        "smallint" | "year" => (wire::SMALLINT, None),
        "mediumint" | "int" | "integer" if !unsigned => (wire::INTEGER, None),
        "mediumint" | "int" | "integer" => (wire::BIGINT, None),
        "bigint" if unsigned => (wire::DECIMAL, Some((20, 0))),
        "bigint" => (wire::BIGINT, None),
        "float" => (wire::REAL, None),
        "double" | "real" => (wire::DOUBLE, None),
        "decimal" | "numeric" => (wire::DECIMAL, None),
        "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "longtext" | "enum" | "set"
        | "json" => (wire::VARCHAR, None),
        "date" => (wire::DATE, None),
        "time" => (wire::TIME, None),
        "datetime" | "timestamp" => (wire::TIMESTAMP, None),
        "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
            (wire::BLOB, None)
        }
        _ => (wire::OTHER, None),
    };

    let (precision, scale) = fixed_precision.unwrap_or((
        precision.and_then(|p| u32::try_from(p).ok()).unwrap_or(0),
        scale.and_then(|s| u32::try_from(s).ok()).unwrap_or(0),
    ));

    Ok(SourceColumn {
        name,
        wire_type,
        precision,
        scale,
        nullable: nullable.eq_ignore_ascii_case("YES"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jdbc_and_mariadb_urls_are_normalized() {
        assert_eq!(
            connection_url("jdbc:mysql://db:3306/cdm"),
            "mysql://db:3306/cdm"
        );
        assert_eq!(
            connection_url("jdbc:mariadb://db:3306/cdm"),
            "mysql://db:3306/cdm"
        );
        assert_eq!(connection_url("mysql://db/cdm"), "mysql://db/cdm");
    }
}
