//! Validation and quoting of identifiers interpolated into SQL.
//!
//! Every schema, table, column and catalog name that ends up inside a SQL string goes through
//! [`quote`] (or [`escape`]) first. Validation rejects anything that is not a plain identifier, and
//! quoting doubles embedded quotes on top of that.

use std::fmt;

use crate::bail;
use crate::error::{EngineResult, ErrorKind};

/// Longest accepted identifier, in characters.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Role of an identifier, which decides the accepted character set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    /// Cache identifier, also used as file name and catalog alias. Allows `-`.
    DatabaseCode,
    Schema,
    Table,
    Column,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdentifierKind::DatabaseCode => "database code",
            IdentifierKind::Schema => "schema",
            IdentifierKind::Table => "table",
            IdentifierKind::Column => "column",
        };

        f.write_str(name)
    }
}

/// An identifier wrapped in double quotes, ready for interpolation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotedIdentifier(String);

impl QuotedIdentifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the identifier without its surrounding quotes.
    pub fn unquoted(&self) -> String {
        self.0[1..self.0.len() - 1].replace("\"\"", "\"")
    }
}

impl fmt::Display for QuotedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checks `name` against `^[A-Za-z_][A-Za-z0-9_]{0,127}$`, additionally accepting `-` after the
/// first character for database codes.
pub fn validate(name: &str, kind: IdentifierKind) -> EngineResult<()> {
    if name.is_empty() {
        bail!(
            ErrorKind::ValidationError,
            "Identifier is empty",
            format!("{kind} name must not be empty")
        );
    }

    let length = name.chars().count();
    if length > MAX_IDENTIFIER_LENGTH {
        bail!(
            ErrorKind::ValidationError,
            "Identifier is too long",
            format!("{kind} name has {length} characters, at most {MAX_IDENTIFIER_LENGTH} are allowed")
        );
    }

    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| {
        c.is_ascii_alphanumeric() || c == '_' || (c == '-' && kind == IdentifierKind::DatabaseCode)
    });

    if !valid_start || !valid_rest {
        bail!(
            ErrorKind::ValidationError,
            "Identifier contains invalid characters",
            format!("invalid {kind} name `{name}`")
        );
    }

    Ok(())
}

/// Validates `name` and wraps it in double quotes, doubling embedded quotes.
pub fn escape(name: &str, kind: IdentifierKind) -> EngineResult<QuotedIdentifier> {
    validate(name, kind)?;

    Ok(QuotedIdentifier(format!("\"{}\"", name.replace('"', "\"\""))))
}

/// Quotes a schema, table or column name.
pub fn quote(name: &str) -> EngineResult<QuotedIdentifier> {
    escape(name, IdentifierKind::Column)
}

/// Quotes a catalog alias derived from a database code.
pub fn quote_database_code(code: &str) -> EngineResult<QuotedIdentifier> {
    escape(code, IdentifierKind::DatabaseCode)
}

/// Renders `"catalog"."schema"."table"`.
pub fn qualified_table(catalog: &str, schema: &str, table: &str) -> EngineResult<String> {
    Ok(format!(
        "{}.{}.{}",
        quote_database_code(catalog)?,
        escape(schema, IdentifierKind::Schema)?,
        escape(table, IdentifierKind::Table)?
    ))
}

/// Quotes a SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [IdentifierKind; 4] = [
        IdentifierKind::DatabaseCode,
        IdentifierKind::Schema,
        IdentifierKind::Table,
        IdentifierKind::Column,
    ];

    #[test]
    fn accepts_plain_identifiers() {
        for name in ["person", "_staging", "Visit_Occurrence_2", "a", "concept_ancestor"] {
            for kind in KINDS {
                assert!(validate(name, kind).is_ok(), "{name} should be a valid {kind}");
            }
        }
    }

    #[test]
    fn rejects_non_conforming_identifiers() {
        for name in [
            "",
            "1person",
            "person;drop",
            "per son",
            "person\"",
            "schema.table",
            "é",
            "person'--",
            "-leading",
        ] {
            for kind in KINDS {
                let err = validate(name, kind).unwrap_err();
                assert_eq!(err.kind(), ErrorKind::ValidationError);
                assert!(escape(name, kind).is_err());
            }
        }
    }

    #[test]
    fn hyphens_are_only_accepted_in_database_codes() {
        assert!(validate("acme-2024", IdentifierKind::DatabaseCode).is_ok());
        assert!(validate("acme-2024", IdentifierKind::Schema).is_err());
        assert!(validate("acme-2024", IdentifierKind::Table).is_err());
        assert!(validate("acme-2024", IdentifierKind::Column).is_err());
    }

    #[test]
    fn length_limit_is_128_characters() {
        let longest = format!("a{}", "b".repeat(127));
        assert!(validate(&longest, IdentifierKind::Table).is_ok());

        let too_long = format!("a{}", "b".repeat(128));
        let err = validate(&too_long, IdentifierKind::Table).unwrap_err();
        assert!(err.to_string().contains("at most 128"));
    }

    #[test]
    fn escaped_identifiers_round_trip_through_validation() {
        let alphabet: Vec<char> = ('a'..='z')
            .chain('A'..='Z')
            .chain('0'..='9')
            .chain(['_', '-'])
            .collect();

        // Walks a deterministic sample of names over the identifier alphabet.
        for seed in 0..2_000usize {
            let length = 1 + seed % 40;
            let name: String = (0..length)
                .map(|i| alphabet[(seed * 31 + i * 17 + i * i) % alphabet.len()])
                .collect();

            for kind in KINDS {
                match escape(&name, kind) {
                    Ok(quoted) => {
                        let quoted = quoted.as_str();
                        assert!(quoted.starts_with('"') && quoted.ends_with('"'));
                        assert_eq!(&quoted[1..quoted.len() - 1], name);
                        assert!(validate(&quoted[1..quoted.len() - 1], kind).is_ok());
                    }
                    Err(err) => {
                        assert_eq!(err.kind(), ErrorKind::ValidationError);
                        assert!(validate(&name, kind).is_err());
                    }
                }
            }
        }
    }

    #[test]
    fn qualified_table_quotes_every_part() {
        assert_eq!(
            qualified_table("acme-1", "public", "person").unwrap(),
            "\"acme-1\".\"public\".\"person\""
        );
        assert!(qualified_table("acme", "public", "person\"; DROP TABLE x; --").is_err());
    }

    #[test]
    fn unquoted_returns_the_original_name() {
        let quoted = quote("observation_period").unwrap();
        assert_eq!(quoted.unquoted(), "observation_period");
    }

    #[test]
    fn literals_double_single_quotes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }
}
