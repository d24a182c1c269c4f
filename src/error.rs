use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Keyspace,
    Table,
    View,
    Index,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Keyspace => write!(f, "keyspace"),
            ResourceType::Table => write!(f, "table"),
            ResourceType::View => write!(f, "view"),
            ResourceType::Index => write!(f, "index"),
        }
    }
}

/// Error class a client driver sees for a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorClass {
    InvalidRequest,
    WriteRejected,
    WriteFailure,
    ReadFailure,
    Unavailable,
    ServerError,
}

impl ClientErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientErrorClass::InvalidRequest => "invalid_request",
            ClientErrorClass::WriteRejected => "write_rejected",
            ClientErrorClass::WriteFailure => "write_failure",
            ClientErrorClass::ReadFailure => "read_failure",
            ClientErrorClass::Unavailable => "unavailable",
            ClientErrorClass::ServerError => "server_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidxErrorCode {
    Encode,
    Decode,
    Validation,
    InvalidConfig,
    KeyspaceAlreadyExists,
    TableAlreadyExists,
    ViewAlreadyExists,
    IndexAlreadyExists,
    DuplicateIndex,
    KeyspaceNotFound,
    TableNotFound,
    ViewNotFound,
    IndexNotFound,
    UnknownColumn,
    TypeMismatch,
    SizeLimitExceeded,
    ViewNotReady,
    BatchWriteFailure,
    QueueFull,
    Timeout,
    Unavailable,
}

impl SidxErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            SidxErrorCode::Encode => "encode",
            SidxErrorCode::Decode => "decode",
            SidxErrorCode::Validation => "validation",
            SidxErrorCode::InvalidConfig => "invalid_config",
            SidxErrorCode::KeyspaceAlreadyExists => "keyspace_already_exists",
            SidxErrorCode::TableAlreadyExists => "table_already_exists",
            SidxErrorCode::ViewAlreadyExists => "view_already_exists",
            SidxErrorCode::IndexAlreadyExists => "index_already_exists",
            SidxErrorCode::DuplicateIndex => "duplicate_index",
            SidxErrorCode::KeyspaceNotFound => "keyspace_not_found",
            SidxErrorCode::TableNotFound => "table_not_found",
            SidxErrorCode::ViewNotFound => "view_not_found",
            SidxErrorCode::IndexNotFound => "index_not_found",
            SidxErrorCode::UnknownColumn => "unknown_column",
            SidxErrorCode::TypeMismatch => "type_mismatch",
            SidxErrorCode::SizeLimitExceeded => "size_limit_exceeded",
            SidxErrorCode::ViewNotReady => "view_not_ready",
            SidxErrorCode::BatchWriteFailure => "batch_write_failure",
            SidxErrorCode::QueueFull => "queue_full",
            SidxErrorCode::Timeout => "timeout",
            SidxErrorCode::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SidxError {
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    /// The name is already held by another table, view or index.
    #[error("{resource_type} '{name}' already exists")]
    NameConflict {
        resource_type: ResourceType,
        name: String,
    },
    /// An unnamed or differently named request targets columns that are
    /// already indexed.
    #[error(
        "index '{requested}' is a duplicate of existing index '{existing}' on {table}({columns})"
    )]
    DuplicateIndex {
        requested: String,
        existing: String,
        table: String,
        columns: String,
    },
    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },
    #[error(
        "type mismatch: column '{column}' in table '{table}' expected {expected}, got {actual}"
    )]
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
    #[error(
        "indexed value for column '{column}' of index '{index}' is {size} bytes, above the {limit} byte index key limit"
    )]
    SizeLimitExceeded {
        index: String,
        column: String,
        size: usize,
        limit: usize,
    },
    #[error("index '{index}' is not ready: its backing view is still being built")]
    ViewNotReady { index: String },
    #[error("view batch for '{view}' failed after {attempts} attempts: {reason}")]
    BatchWriteFailure {
        view: String,
        attempts: u32,
        reason: String,
    },
    /// The pending view-work log is at capacity.
    #[error("view work queue full ({capacity} items pending)")]
    QueueFull { capacity: usize },
    #[error("timeout")]
    Timeout,
    #[error("resource unavailable: {message}")]
    Unavailable { message: String },
}

impl SidxError {
    pub fn code(&self) -> SidxErrorCode {
        match self {
            SidxError::Encode(_) => SidxErrorCode::Encode,
            SidxError::Decode(_) => SidxErrorCode::Decode,
            SidxError::Validation(_) => SidxErrorCode::Validation,
            SidxError::InvalidConfig { .. } => SidxErrorCode::InvalidConfig,
            SidxError::NameConflict { resource_type, .. } => match resource_type {
                ResourceType::Keyspace => SidxErrorCode::KeyspaceAlreadyExists,
                ResourceType::Table => SidxErrorCode::TableAlreadyExists,
                ResourceType::View => SidxErrorCode::ViewAlreadyExists,
                ResourceType::Index => SidxErrorCode::IndexAlreadyExists,
            },
            SidxError::DuplicateIndex { .. } => SidxErrorCode::DuplicateIndex,
            SidxError::NotFound { resource_type, .. } => match resource_type {
                ResourceType::Keyspace => SidxErrorCode::KeyspaceNotFound,
                ResourceType::Table => SidxErrorCode::TableNotFound,
                ResourceType::View => SidxErrorCode::ViewNotFound,
                ResourceType::Index => SidxErrorCode::IndexNotFound,
            },
            SidxError::UnknownColumn { .. } => SidxErrorCode::UnknownColumn,
            SidxError::TypeMismatch { .. } => SidxErrorCode::TypeMismatch,
            SidxError::SizeLimitExceeded { .. } => SidxErrorCode::SizeLimitExceeded,
            SidxError::ViewNotReady { .. } => SidxErrorCode::ViewNotReady,
            SidxError::BatchWriteFailure { .. } => SidxErrorCode::BatchWriteFailure,
            SidxError::QueueFull { .. } => SidxErrorCode::QueueFull,
            SidxError::Timeout => SidxErrorCode::Timeout,
            SidxError::Unavailable { .. } => SidxErrorCode::Unavailable,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    pub fn client_class(&self) -> ClientErrorClass {
        match self {
            SidxError::Decode(_)
            | SidxError::Validation(_)
            | SidxError::InvalidConfig { .. }
            | SidxError::NameConflict { .. }
            | SidxError::DuplicateIndex { .. }
            | SidxError::NotFound { .. }
            | SidxError::UnknownColumn { .. }
            | SidxError::TypeMismatch { .. } => ClientErrorClass::InvalidRequest,
            SidxError::SizeLimitExceeded { .. } => ClientErrorClass::WriteRejected,
            SidxError::BatchWriteFailure { .. } => ClientErrorClass::WriteFailure,
            SidxError::ViewNotReady { .. } => ClientErrorClass::ReadFailure,
            SidxError::QueueFull { .. } | SidxError::Timeout | SidxError::Unavailable { .. } => {
                ClientErrorClass::Unavailable
            }
            SidxError::Encode(_) => ClientErrorClass::ServerError,
        }
    }

    /// Only transient view states and infrastructure failures may be retried;
    /// metadata and size errors are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SidxError::ViewNotReady { .. }
                | SidxError::BatchWriteFailure { .. }
                | SidxError::QueueFull { .. }
                | SidxError::Timeout
                | SidxError::Unavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientErrorClass, ResourceType, SidxError, SidxErrorCode};

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(SidxErrorCode::IndexNotFound.as_str(), "index_not_found");
        assert_eq!(SidxErrorCode::DuplicateIndex.as_str(), "duplicate_index");
        assert_eq!(
            SidxErrorCode::SizeLimitExceeded.as_str(),
            "size_limit_exceeded"
        );
    }

    #[test]
    fn name_conflict_and_duplicate_messages_are_distinguishable() {
        let conflict = SidxError::NameConflict {
            resource_type: ResourceType::Index,
            name: "xyz".into(),
        };
        let duplicate = SidxError::DuplicateIndex {
            requested: "abc".into(),
            existing: "xyz".into(),
            table: "t".into(),
            columns: "v".into(),
        };
        assert!(conflict.to_string().contains("already exists"));
        assert!(!conflict.to_string().contains("duplicate"));
        assert!(duplicate.to_string().contains("duplicate"));
        assert_eq!(conflict.code(), SidxErrorCode::IndexAlreadyExists);
        assert_eq!(duplicate.code_str(), "duplicate_index");
    }

    #[test]
    fn client_classes_follow_error_kind() {
        let oversized = SidxError::SizeLimitExceeded {
            index: "t_v_idx".into(),
            column: "v".into(),
            size: 66_536,
            limit: 65_535,
        };
        assert_eq!(oversized.client_class(), ClientErrorClass::WriteRejected);
        assert!(!oversized.is_retryable());

        let not_ready = SidxError::ViewNotReady {
            index: "t_v_idx".into(),
        };
        assert_eq!(not_ready.client_class(), ClientErrorClass::ReadFailure);
        assert!(not_ready.is_retryable());

        let missing = SidxError::NotFound {
            resource_type: ResourceType::Index,
            resource_id: "ks.nope".into(),
        };
        assert_eq!(missing.client_class(), ClientErrorClass::InvalidRequest);
        assert!(!missing.is_retryable());

        let full = SidxError::QueueFull { capacity: 4 };
        assert_eq!(full.client_class(), ClientErrorClass::Unavailable);
        assert_eq!(full.code_str(), "queue_full");
        assert!(full.is_retryable());
    }
}
