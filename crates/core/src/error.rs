//! Unified error types for the query engine.
//!
//! Error codes:
//! - QUERY_001-012: Query configuration validation errors
//! - QUERY_020-021: Unsupported aggregate/operator tokens
//! - QUERY_030-031: Catalog resolution errors
//! - REQ_001: Malformed request
//! - EXEC_001: Execution backend failure
//!
//! Validation and execution failures both reach API consumers as a plain
//! message string; `ErrorKind` keeps the distinction for logs and for any
//! future wire format that exposes it.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Validation failure kinds for a custom query configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// QUERY_001: Table is not in the schema registry
    UnknownTable,
    /// QUERY_002: Select references an undeclared column
    UnknownColumn,
    /// QUERY_003: Filter references an undeclared column
    UnknownFilterColumn,
    /// QUERY_004: Aggregate requires an aggregatable column
    AggregateNotAllowed,
    /// QUERY_005: `*` may only be counted
    WildcardRequiresCount,
    /// QUERY_006: Column is not filterable
    FilterNotAllowed,
    /// QUERY_007: More than 10 selects
    TooManySelects,
    /// QUERY_008: No selects
    EmptySelects,
    /// QUERY_009: More than 20 filters
    TooManyFilters,
    /// QUERY_010: More than 5 group by fields
    TooManyGroupBy,
    /// QUERY_011: Group by references an undeclared column
    UnknownGroupByColumn,
    /// QUERY_012: Filter value shape does not match the operator
    InvalidFilterValue,
}

impl ValidationErrorKind {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownTable => "QUERY_001",
            Self::UnknownColumn => "QUERY_002",
            Self::UnknownFilterColumn => "QUERY_003",
            Self::AggregateNotAllowed => "QUERY_004",
            Self::WildcardRequiresCount => "QUERY_005",
            Self::FilterNotAllowed => "QUERY_006",
            Self::TooManySelects => "QUERY_007",
            Self::EmptySelects => "QUERY_008",
            Self::TooManyFilters => "QUERY_009",
            Self::TooManyGroupBy => "QUERY_010",
            Self::UnknownGroupByColumn => "QUERY_011",
            Self::InvalidFilterValue => "QUERY_012",
        }
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> u16 {
        400
    }
}

/// A single descriptive validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub message: String,
    /// Offending field or config section, when there is one.
    pub field: Option<String>,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            field: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// Coarse error family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad query shape, caught before any SQL was built.
    Validation,
    /// Malformed or disallowed request.
    Request,
    /// The execution backend failed.
    Execution,
    Internal,
}

/// Unified error type for the query engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Unknown aggregate function: {0}")]
    UnsupportedAggregate(String),

    #[error("Unknown operator: {0}")]
    UnsupportedOperator(String),

    #[error("Unknown query type: {0}")]
    UnknownQueryType(String),

    #[error("Filter on field '{field}' is not permitted for {parameter}")]
    FilterNotPermitted { parameter: String, field: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("Query execution failed: {0}")]
    Execution(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::UnsupportedAggregate(_) | Self::UnsupportedOperator(_) => {
                ErrorKind::Validation
            }
            Self::UnknownQueryType(_)
            | Self::FilterNotPermitted { .. }
            | Self::InvalidRequest(_)
            | Self::Serialization(_) => ErrorKind::Request,
            Self::Execution(_) => ErrorKind::Execution,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.kind.code(),
            Self::UnsupportedAggregate(_) => "QUERY_020",
            Self::UnsupportedOperator(_) => "QUERY_021",
            Self::UnknownQueryType(_) => "QUERY_030",
            Self::FilterNotPermitted { .. } => "QUERY_031",
            Self::InvalidRequest(_) | Self::Serialization(_) => "REQ_001",
            Self::Execution(_) => "EXEC_001",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Request => 400,
            ErrorKind::Execution => 502,
            ErrorKind::Internal => 500,
        }
    }

    /// The validation failure kind, if this is one.
    pub fn validation_kind(&self) -> Option<ValidationErrorKind> {
        match self {
            Self::Validation(e) => Some(e.kind),
            _ => None,
        }
    }
}
