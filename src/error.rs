//! Error types for the engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Syntax errors. Carries the offending token, the set of tokens the
    // parser would have accepted, and the position in the input.
    #[error("found {found}, expected {expected} at line {line}, char {column}")]
    Parse {
        found: String,
        expected: String,
        line: usize,
        column: usize,
    },

    // Compile errors, detected while planning and before any storage work.
    #[error("{count} values for {fields} fields")]
    ValuesFieldsMismatch { count: usize, fields: usize },

    #[error("field {0:?} must appear in the GROUP BY clause or be used in an aggregate function")]
    InvalidGroupByProjection(String),

    #[error("no tables specified")]
    NoTablesSpecified,

    #[error("{clause} expression must evaluate to a number, got {got:?}")]
    NonNumericClause {
        clause: &'static str,
        got: &'static str,
    },

    // Catalog errors
    #[error("{0:?} already exists")]
    AlreadyExists(String),

    #[error("{0:?} not found")]
    NotFound(String),

    // Row errors
    #[error("document not found")]
    DocumentNotFound,

    #[error("duplicate document")]
    DuplicateDocument,

    // Codec errors
    #[error("cannot decode buffer to {0}")]
    Decode(&'static str),

    // Evaluation errors
    #[error("division by zero")]
    DivisionByZero,

    #[error("cannot find parameter {0}")]
    ParameterNotFound(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("execution error: {0}")]
    ExecutionError(String),

    // Transaction misuse
    #[error("transaction is read-only")]
    ReadOnly,

    #[error("no transaction in progress")]
    NoTransaction,

    #[error("transaction already in progress")]
    TransactionInProgress,

    // Errors surfaced verbatim from the storage layer.
    #[error("storage error: {0}")]
    Storage(String),

    // Caller-initiated stop.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<fjall::Error> for Error {
    fn from(err: fjall::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
