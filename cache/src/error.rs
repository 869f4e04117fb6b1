use std::error;
use std::fmt;

use cache_config::shared::ValidationError;

/// Result type of fallible engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Words marking a failure message as transient.
const TRANSIENT_MARKERS: [&str; 4] = ["connection", "timeout", "network", "reset"];

/// Error type of the cache engine.
///
/// An [`EngineError`] carries a classification ([`ErrorKind`]), a static description and an
/// optional dynamic detail, or aggregates several errors.
#[derive(Debug, Clone)]
pub struct EngineError {
    repr: ErrorRepr,
    transient: bool,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<EngineError>),
}

/// Classification of engine failures.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Source errors
    SourceConnectionFailed,
    AuthenticationError,
    SourceTimeout,
    SourceQueryFailed,

    // Destination errors
    DestinationQueryFailed,
    ExtensionError,

    // Configuration errors
    ValidationError,
    ConfigError,

    // Data errors
    ConversionError,
    InvalidData,
    SerializationError,
    DeserializationError,

    // State errors
    ResourceClosed,
    InvalidState,
    JobNotFound,

    IoError,
    Unknown,
}

impl EngineError {
    /// Aggregates several errors into one.
    pub fn many(errors: Vec<EngineError>) -> EngineError {
        let transient = !errors.is_empty() && errors.iter().all(EngineError::is_transient);

        EngineError {
            repr: ErrorRepr::Many(errors),
            transient,
        }
    }

    fn single(repr: ErrorRepr, kind: ErrorKind) -> EngineError {
        EngineError {
            repr,
            transient: kind.is_transient(),
        }
    }

    /// Marks the error as transient when `message`, as reported by a database driver, describes
    /// a connection, timeout, network or reset condition.
    ///
    /// Only the driver's own message is inspected, never identifiers or SQL added as context.
    pub fn classify_driver_message(mut self, message: &str) -> EngineError {
        if !self.kind().is_permanent() && is_transient_message(message) {
            self.transient = true;
        }

        self
    }

    /// Keeps the transience of `cause` when it is wrapped into this error.
    pub fn caused_by(mut self, cause: &EngineError) -> EngineError {
        if !self.kind().is_permanent() && cause.is_transient() {
            self.transient = true;
        }

        self
    }

    /// Returns the [`ErrorKind`] of this error, the first one for aggregates.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors.iter().flat_map(|err| err.kinds()).collect(),
        }
    }

    /// Returns the dynamic detail, the first available one for aggregates.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            ErrorRepr::WithDescription(..) => None,
        }
    }

    /// Returns `true` when retrying the failed operation may succeed.
    ///
    /// Decided when the error is built: connection, timeout and I/O failures are transient, and
    /// other failures are when their driver message says so (see
    /// [`EngineError::classify_driver_message`]). Aggregates are transient when all their
    /// errors are.
    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

impl ErrorKind {
    fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::SourceConnectionFailed | ErrorKind::SourceTimeout | ErrorKind::IoError
        )
    }

    /// Kinds that no driver message can turn transient.
    fn is_permanent(self) -> bool {
        matches!(
            self,
            ErrorKind::ValidationError
                | ErrorKind::ConfigError
                | ErrorKind::AuthenticationError
                | ErrorKind::ResourceClosed
                | ErrorKind::JobNotFound
        )
    }
}

/// Returns `true` when `message` describes a connection, timeout, network or reset condition.
pub fn is_transient_message(message: &str) -> bool {
    let message = message.to_lowercase();
    TRANSIENT_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

impl PartialEq for EngineError {
    fn eq(&self, other: &EngineError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _))
            | (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => errors_a == errors_b,
            _ => false,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => write!(f, "{kind:?}: {desc}"),
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                write!(f, "{kind:?}: {desc} -> {detail}")
            }
            ErrorRepr::Many(ref errors) => match errors.as_slice() {
                [] => write!(f, "Multiple errors occurred (empty)"),
                [single] => fmt::Display::fmt(single, f),
                errors => {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                    Ok(())
                }
            },
        }
    }
}

impl error::Error for EngineError {}

impl From<(ErrorKind, &'static str)> for EngineError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> EngineError {
        EngineError::single(ErrorRepr::WithDescription(kind, desc), kind)
    }
}

impl From<(ErrorKind, &'static str, String)> for EngineError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> EngineError {
        EngineError::single(ErrorRepr::WithDescriptionAndDetail(kind, desc, detail), kind)
    }
}

impl<E> From<Vec<E>> for EngineError
where
    E: Into<EngineError>,
{
    fn from(errors: Vec<E>) -> EngineError {
        EngineError::many(errors.into_iter().map(Into::into).collect())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> EngineError {
        let kind = match err.kind() {
            std::io::ErrorKind::TimedOut => ErrorKind::SourceTimeout,
            _ => ErrorKind::IoError,
        };

        (kind, "I/O error occurred", err.to_string()).into()
    }
}

/// Maps serialization failures to [`ErrorKind::SerializationError`] and parse failures to
/// [`ErrorKind::DeserializationError`].
impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> EngineError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::SerializationError, "JSON I/O failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        (kind, description, err.to_string()).into()
    }
}

impl From<std::num::ParseIntError> for EngineError {
    fn from(err: std::num::ParseIntError) -> EngineError {
        (
            ErrorKind::ConversionError,
            "Integer parsing failed",
            err.to_string(),
        )
            .into()
    }
}

impl From<std::num::TryFromIntError> for EngineError {
    fn from(err: std::num::TryFromIntError) -> EngineError {
        (
            ErrorKind::ConversionError,
            "Integer does not fit the destination column",
            err.to_string(),
        )
            .into()
    }
}

impl From<std::num::ParseFloatError> for EngineError {
    fn from(err: std::num::ParseFloatError) -> EngineError {
        (
            ErrorKind::ConversionError,
            "Float parsing failed",
            err.to_string(),
        )
            .into()
    }
}

impl From<chrono::ParseError> for EngineError {
    fn from(err: chrono::ParseError) -> EngineError {
        (
            ErrorKind::ConversionError,
            "Temporal value parsing failed",
            err.to_string(),
        )
            .into()
    }
}

impl From<bigdecimal::ParseBigDecimalError> for EngineError {
    fn from(err: bigdecimal::ParseBigDecimalError) -> EngineError {
        (
            ErrorKind::ConversionError,
            "Decimal parsing failed",
            err.to_string(),
        )
            .into()
    }
}

/// Converts [`duckdb::Error`] raised by the analytical store.
impl From<duckdb::Error> for EngineError {
    fn from(err: duckdb::Error) -> EngineError {
        let message = err.to_string();

        EngineError::from((
            ErrorKind::DestinationQueryFailed,
            "Analytical store operation failed",
            message.clone(),
        ))
        .classify_driver_message(&message)
    }
}

/// Converts a failed or panicked blocking task.
impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> EngineError {
        (
            ErrorKind::InvalidState,
            "Blocking task did not complete",
            err.to_string(),
        )
            .into()
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> EngineError {
        (
            ErrorKind::ValidationError,
            "Invalid cache configuration",
            err.to_string(),
        )
            .into()
    }
}

/// Converts [`sqlx::Error`] raised by the MySQL source driver.
///
/// SQLSTATE class `08` and pool failures are connection failures, class `28` authentication
/// failures.
#[cfg(feature = "mysql")]
impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> EngineError {
        let kind = match &err {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some(code) if code.starts_with("08") => ErrorKind::SourceConnectionFailed,
                Some(code) if code.starts_with("28") => ErrorKind::AuthenticationError,
                _ => ErrorKind::SourceQueryFailed,
            },
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => ErrorKind::SourceConnectionFailed,
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => ErrorKind::SourceTimeout,
            _ => ErrorKind::SourceQueryFailed,
        };

        let message = err.to_string();

        EngineError::from((kind, "Source database operation failed", message.clone()))
            .classify_driver_message(&message)
    }
}
