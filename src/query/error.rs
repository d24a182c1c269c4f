use crate::error::{ClientErrorClass, SidxError};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    TableNotFound {
        keyspace: String,
        table: String,
    },
    ColumnNotFound {
        table: String,
        column: String,
    },
    TypeMismatch {
        column: String,
        expected: String,
        got: String,
    },
    InvalidQuery {
        reason: String,
    },
    /// Restrictions need post-filtering and the query did not opt in.
    FilteringRequired {
        table: String,
    },
    /// The selected index is still being built.
    ViewNotReady {
        index: String,
    },
    InvalidCursor {
        reason: String,
    },
    Timeout,
    InternalError(String),
}

impl QueryError {
    pub fn client_class(&self) -> ClientErrorClass {
        match self {
            QueryError::ViewNotReady { .. } => ClientErrorClass::ReadFailure,
            QueryError::Timeout => ClientErrorClass::Unavailable,
            QueryError::InternalError(_) => ClientErrorClass::ServerError,
            _ => ClientErrorClass::InvalidRequest,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::ViewNotReady { .. } | QueryError::Timeout)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::TableNotFound { keyspace, table } => {
                write!(f, "table '{table}' not found in keyspace '{keyspace}'")
            }
            QueryError::ColumnNotFound { table, column } => {
                write!(f, "column '{column}' not found in table '{table}'")
            }
            QueryError::TypeMismatch {
                column,
                expected,
                got,
            } => {
                write!(
                    f,
                    "type mismatch in column '{column}': expected {expected}, got {got}"
                )
            }
            QueryError::InvalidQuery { reason } => write!(f, "invalid query: {reason}"),
            QueryError::FilteringRequired { table } => write!(
                f,
                "cannot execute this query on '{table}' as it might involve data filtering; use ALLOW FILTERING"
            ),
            QueryError::ViewNotReady { index } => {
                write!(f, "index '{index}' is not ready: its backing view is still being built")
            }
            QueryError::InvalidCursor { reason } => write!(f, "invalid paging cursor: {reason}"),
            QueryError::Timeout => write!(f, "query timed out"),
            QueryError::InternalError(msg) => write!(f, "internal query error: {msg}"),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<SidxError> for QueryError {
    fn from(value: SidxError) -> Self {
        match value {
            SidxError::Validation(reason) => QueryError::InvalidQuery { reason },
            SidxError::InvalidConfig { message } => QueryError::InvalidQuery { reason: message },
            SidxError::Decode(reason) => QueryError::InvalidCursor { reason },
            SidxError::Encode(reason) => QueryError::InternalError(reason),
            SidxError::UnknownColumn { table, column } => {
                QueryError::ColumnNotFound { table, column }
            }
            SidxError::TypeMismatch {
                column,
                expected,
                actual,
                ..
            } => QueryError::TypeMismatch {
                column,
                expected,
                got: actual,
            },
            SidxError::ViewNotReady { index } => QueryError::ViewNotReady { index },
            SidxError::Timeout => QueryError::Timeout,
            err @ (SidxError::NameConflict { .. }
            | SidxError::DuplicateIndex { .. }
            | SidxError::NotFound { .. }
            | SidxError::SizeLimitExceeded { .. }) => QueryError::InvalidQuery {
                reason: err.to_string(),
            },
            err @ (SidxError::BatchWriteFailure { .. }
            | SidxError::QueueFull { .. }
            | SidxError::Unavailable { .. }) => QueryError::InternalError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::QueryError;
    use crate::error::{ClientErrorClass, SidxError};

    #[test]
    fn query_error_display_is_human_readable() {
        let err = QueryError::ColumnNotFound {
            table: "users".into(),
            column: "name".into(),
        };
        assert_eq!(err.to_string(), "column 'name' not found in table 'users'");
    }

    #[test]
    fn not_ready_maps_to_read_failure() {
        let err: QueryError = SidxError::ViewNotReady {
            index: "t_v_idx".into(),
        }
        .into();
        assert_eq!(err.client_class(), ClientErrorClass::ReadFailure);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("t_v_idx"));
    }
}
