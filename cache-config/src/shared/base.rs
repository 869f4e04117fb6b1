use thiserror::Error;

/// Errors raised while validating a configuration before any I/O happens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is absent or empty.
    #[error("Missing required configuration field `{0}`")]
    MissingField(&'static str),

    /// A numeric setting falls outside of its accepted range.
    #[error("Invalid value {value} for `{field}`: expected a value between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    /// Source credentials are incomplete for the selected dialect.
    #[error("Invalid source credentials: {0}")]
    InvalidCredentials(String),

    /// The timestamp filter is not an ISO-8601 date or date-time.
    #[error("Invalid timestamp filter `{0}`: expected an ISO-8601 date or date-time")]
    InvalidTimestamp(String),

    /// General configuration validation error.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
