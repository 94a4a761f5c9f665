// LogQuest - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// Each subsystem owns its error enum; `LogQuestError` wraps them for callers
// that span several subsystems (the CLI, integration tests).
//
// Cancellation is deliberately absent: a cancelled search is an outcome,
// not an error, and never reaches a presentation layer as a failure.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for all LogQuest operations.
#[derive(Debug, Error)]
pub enum LogQuestError {
    /// A transition referenced a session that is not in the store.
    #[error(transparent)]
    SessionNotFound(#[from] SessionNotFoundError),

    /// The query failed to compile.
    #[error("Query error: {0}")]
    Query(#[from] QueryParseError),

    /// The search engine reported a failure.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Export of session results failed.
    #[error("Export error: {0}")]
    Export(#[from] ExportError),
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

/// A per-session transition was applied to a name absent from the store.
///
/// This is a lifecycle-ordering defect in the orchestration layer (for
/// example a stream kept producing after its session was cleared). Callers
/// are not expected to recover from it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Trying to update search that does not exist: {name}")]
pub struct SessionNotFoundError {
    /// Name of the missing session.
    pub name: String,
}

// ---------------------------------------------------------------------------
// Query errors
// ---------------------------------------------------------------------------

/// What went wrong while compiling a search expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// A `"` was opened but never closed.
    UnterminatedQuote,
    /// A `/` regex literal was opened but never closed.
    UnterminatedRegex,
    /// A regex literal failed to compile.
    InvalidRegex { pattern: String, reason: String },
    /// A regex literal exceeds the allowed length.
    RegexTooLong { length: usize, max_length: usize },
    /// `=value` with nothing before the operator.
    MissingField,
    /// `field=` with nothing after the operator.
    MissingValue { field: String },
    /// `not` / `!` with no clause after it.
    DanglingNot,
    /// `or` at the start or end of the query, or doubled.
    DanglingOr,
    /// The whole query exceeds the allowed length.
    TooLong { length: usize, max_length: usize },
    /// An index search was issued with an empty pattern.
    EmptyPattern,
}

impl std::fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnterminatedQuote => f.write_str("unterminated quoted string"),
            Self::UnterminatedRegex => f.write_str("unterminated regex literal"),
            Self::InvalidRegex { pattern, reason } => {
                write!(f, "invalid regex '{pattern}': {reason}")
            }
            Self::RegexTooLong { length, max_length } => write!(
                f,
                "regex literal is {length} chars, exceeds maximum of {max_length}"
            ),
            Self::MissingField => f.write_str("comparison has no field name"),
            Self::MissingValue { field } => write!(f, "comparison on '{field}' has no value"),
            Self::DanglingNot => f.write_str("'not' must be followed by a term"),
            Self::DanglingOr => f.write_str("'or' must sit between two terms"),
            Self::TooLong { length, max_length } => write!(
                f,
                "query is {length} bytes, exceeds maximum of {max_length}"
            ),
            Self::EmptyPattern => f.write_str("index search pattern is empty"),
        }
    }
}

/// The submitted query failed to compile before dispatch.
///
/// Surfaced synchronously; no session is registered and no handle created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} (at offset {offset})")]
pub struct QueryParseError {
    /// Byte offset into the query text where the problem was detected.
    pub offset: usize,
    /// Classification of the problem.
    pub kind: QueryErrorKind,
}

impl QueryParseError {
    pub fn new(kind: QueryErrorKind, offset: usize) -> Self {
        Self { offset, kind }
    }
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

/// Failures reported by a search engine, either when the request is issued
/// or mid-stream. Recorded on the session as `Status(Error)`; never retried.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested space does not exist.
    #[error("space '{space_id}' does not exist")]
    SpaceNotFound { space_id: String },

    /// Reading a file inside the space failed.
    #[error("I/O error reading '{}': {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    /// Directory traversal inside the space failed.
    #[error("error traversing '{}': {source}", path.display())]
    Traversal {
        path: PathBuf,
        source: walkdir::Error,
    },

    /// The engine rejected or aborted the search with a message.
    #[error("{message}")]
    Remote { message: String },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Config parse error '{}': {source}", path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A config value is out of the allowed range.
    #[error("Config '{field}' = '{value}' is out of range. Expected: {expected}")]
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// I/O error reading config file.
    #[error("Config I/O error '{}': {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

// ---------------------------------------------------------------------------
// Export errors
// ---------------------------------------------------------------------------

/// Errors related to export operations.
#[derive(Debug, Error)]
pub enum ExportError {
    /// I/O error writing the export file.
    #[error("Export I/O error '{}': {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    /// CSV serialisation error.
    #[error("CSV export error '{}': {source}", path.display())]
    Csv { path: PathBuf, source: csv::Error },

    /// JSON serialisation error.
    #[error("JSON export error '{}': {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The export format could not be determined from the file extension.
    #[error("Cannot export to '{}': use a .csv or .json extension", path.display())]
    UnknownFormat { path: PathBuf },
}

/// Convenience type alias for LogQuest results.
pub type Result<T> = std::result::Result<T, LogQuestError>;
