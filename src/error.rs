//! Error types surfaced while dispatching percolate queries.

use std::fmt;

/// Failures while pulling typed values out of a [`Tuple`](crate::Tuple).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// The tuple does not declare the requested field.
    Missing(String),
    /// The field exists but does not hold the expected type.
    WrongType {
        /// Field name.
        field: String,
        /// Type the caller asked for.
        expected: &'static str,
        /// Type actually stored in the tuple.
        found: &'static str,
    },
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(field) => write!(f, "tuple has no field named `{field}`"),
            Self::WrongType {
                field,
                expected,
                found,
            } => write!(f, "field `{field}` holds {found}, expected {expected}"),
        }
    }
}

impl std::error::Error for FieldError {}

/// Failures raised by a [`SearchClient`](crate::SearchClient) while executing a percolate query.
#[derive(Debug)]
pub enum QueryError {
    /// The candidate document is not valid JSON.
    InvalidDocument(serde_json::Error),
    /// The request never produced an HTTP response (connect, timeout, body errors).
    Transport(String),
    /// The cluster answered with a non-success status.
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, when readable.
        body: String,
    },
    /// The response body could not be decoded into percolate matches.
    Decode(String),
    /// No node was configured or reachable.
    NoNodes,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDocument(err) => write!(f, "document is not valid JSON: {err}"),
            Self::Transport(msg) => write!(f, "percolate request failed: {msg}"),
            Self::Status { status, body } => {
                write!(f, "percolate request rejected ({status}): {body}")
            }
            Self::Decode(msg) => write!(f, "failed to decode percolate response: {msg}"),
            Self::NoNodes => write!(f, "no reachable search nodes"),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidDocument(err) => Some(err),
            _ => None,
        }
    }
}

/// Any failure that turns an input tuple into a `fail` signal.
#[derive(Debug)]
pub enum DispatchError {
    /// The tuple is missing one of `source`, `index`, `type`, or holds a non-string value.
    FieldExtraction(FieldError),
    /// The search client failed to execute the query.
    QueryExecution(QueryError),
}

impl DispatchError {
    /// Short label used in logs and error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FieldExtraction(_) => "field_extraction",
            Self::QueryExecution(_) => "query_execution",
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldExtraction(err) => write!(f, "malformed input tuple: {err}"),
            Self::QueryExecution(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::FieldExtraction(err) => Some(err),
            Self::QueryExecution(err) => Some(err),
        }
    }
}

impl From<FieldError> for DispatchError {
    fn from(err: FieldError) -> Self {
        Self::FieldExtraction(err)
    }
}

impl From<QueryError> for DispatchError {
    fn from(err: QueryError) -> Self {
        Self::QueryExecution(err)
    }
}
