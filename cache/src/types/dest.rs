use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{EngineError, ErrorKind};

/// Largest precision of a DECIMAL column in the analytical store.
const MAX_DECIMAL_PRECISION: u8 = 38;

/// Column type of a destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DestType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },
    Varchar,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Blob,
}

impl DestType {
    /// Builds a DECIMAL type, falling back to DOUBLE when the precision cannot be represented.
    pub fn decimal(precision: u32, scale: u32) -> DestType {
        match (u8::try_from(precision), u8::try_from(scale)) {
            (Ok(precision), Ok(scale))
                if (1..=MAX_DECIMAL_PRECISION).contains(&precision) && scale <= precision =>
            {
                DestType::Decimal { precision, scale }
            }
            _ => DestType::Double,
        }
    }

    /// Type name used in `CREATE TABLE` statements.
    pub fn sql_name(&self) -> String {
        match self {
            DestType::Boolean => "BOOLEAN".to_string(),
            DestType::TinyInt => "TINYINT".to_string(),
            DestType::SmallInt => "SMALLINT".to_string(),
            DestType::Integer => "INTEGER".to_string(),
            DestType::BigInt => "BIGINT".to_string(),
            DestType::Float => "FLOAT".to_string(),
            DestType::Double => "DOUBLE".to_string(),
            DestType::Decimal { precision, scale } => format!("DECIMAL({precision},{scale})"),
            DestType::Varchar => "VARCHAR".to_string(),
            DestType::Date => "DATE".to_string(),
            DestType::Time => "TIME".to_string(),
            DestType::Timestamp => "TIMESTAMP".to_string(),
            DestType::TimestampTz => "TIMESTAMP WITH TIME ZONE".to_string(),
            DestType::Blob => "BLOB".to_string(),
        }
    }

    /// Returns `true` for text columns, the only ones a full-text index covers.
    pub fn is_text(&self) -> bool {
        matches!(self, DestType::Varchar)
    }
}

impl fmt::Display for DestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql_name())
    }
}

impl FromStr for DestType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();

        if let Some(args) = normalized
            .strip_prefix("DECIMAL(")
            .or_else(|| normalized.strip_prefix("NUMERIC("))
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let (precision, scale) = args.split_once(',').unwrap_or((args, "0"));
            return Ok(DestType::decimal(
                precision.trim().parse()?,
                scale.trim().parse()?,
            ));
        }

        let dest = match normalized.as_str() {
            "BOOLEAN" | "BOOL" => DestType::Boolean,
            "TINYINT" => DestType::TinyInt,
            "SMALLINT" => DestType::SmallInt,
            "INTEGER" | "INT" => DestType::Integer,
            "BIGINT" => DestType::BigInt,
            "FLOAT" | "REAL" => DestType::Float,
            "DOUBLE" => DestType::Double,
            "DECIMAL" | "NUMERIC" => DestType::Decimal {
                precision: 18,
                scale: 3,
            },
            "VARCHAR" | "TEXT" => DestType::Varchar,
            "DATE" => DestType::Date,
            "TIME" => DestType::Time,
            "TIMESTAMP" => DestType::Timestamp,
            "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => DestType::TimestampTz,
            "BLOB" => DestType::Blob,
            _ => bail!(
                ErrorKind::ConfigError,
                "Unknown destination type",
                format!("`{s}` is not a supported column type")
            ),
        };

        Ok(dest)
    }
}

impl TryFrom<String> for DestType {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DestType> for String {
    fn from(value: DestType) -> Self {
        value.sql_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_precision_out_of_range_falls_back_to_double() {
        assert_eq!(
            DestType::decimal(10, 2),
            DestType::Decimal {
                precision: 10,
                scale: 2
            }
        );
        assert_eq!(DestType::decimal(0, 0), DestType::Double);
        assert_eq!(DestType::decimal(39, 2), DestType::Double);
        assert_eq!(DestType::decimal(5, 6), DestType::Double);
    }

    #[test]
    fn sql_names_parse_back() {
        for dest in [
            DestType::Boolean,
            DestType::SmallInt,
            DestType::Decimal {
                precision: 12,
                scale: 4,
            },
            DestType::TimestampTz,
            DestType::Blob,
        ] {
            assert_eq!(dest.sql_name().parse::<DestType>().unwrap(), dest);
        }
    }

    #[test]
    fn parsing_is_case_insensitive_and_accepts_aliases() {
        assert_eq!("text".parse::<DestType>().unwrap(), DestType::Varchar);
        assert_eq!("int".parse::<DestType>().unwrap(), DestType::Integer);
        assert_eq!(
            "numeric(8)".parse::<DestType>().unwrap(),
            DestType::Decimal {
                precision: 8,
                scale: 0
            }
        );
        assert_eq!(
            "geometry".parse::<DestType>().unwrap_err().kind(),
            ErrorKind::ConfigError
        );
    }
}
