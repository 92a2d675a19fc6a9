//! Error types for entitydb_core operations.

use std::io;
use thiserror::Error;

/// Core error type for entitydb_core operations.
#[derive(Error, Debug)]
pub enum EntityDbError {
    /// Entity with the given id was not found.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// No session exists for the presented token.
    #[error("session not found")]
    SessionNotFound,

    /// An entity with this id already exists.
    #[error("entity already exists: {0}")]
    AlreadyExists(String),

    /// Entity id is not a 32-character lowercase hex UUID, or is reserved.
    #[error("invalid entity id: {0}")]
    InvalidEntityId(String),

    /// A mandatory tag is missing at entity creation.
    #[error("entity {entity} is missing mandatory tag {tag}")]
    MissingMandatoryTag {
        /// Entity being validated
        entity: String,
        /// The absent mandatory tag namespace
        tag: &'static str,
    },

    /// A temporal tag could not be parsed.
    #[error("malformed temporal tag: {0}")]
    MalformedTemporalTag(String),

    /// A tag payload has no namespace separator.
    #[error("invalid tag, no namespace separator: {0}")]
    InvalidTag(String),

    /// A duration literal (e.g. "24h", "7d") could not be parsed.
    #[error("invalid duration literal: {0}")]
    InvalidDuration(String),

    /// A size literal (e.g. "512k", "10m") could not be parsed.
    #[error("invalid size literal: {0}")]
    InvalidSize(String),

    /// A retention rule names a condition type the engine does not know.
    #[error("unknown retention condition: {0}")]
    UnknownCondition(String),

    /// A query filter is malformed (unknown field, operator, or value form).
    #[error("invalid query filter: {0}")]
    InvalidFilter(String),

    /// Content stream exceeds the maximum accepted size.
    #[error("content too large: {size} bytes exceeds limit of {limit} bytes")]
    ContentTooLarge {
        /// Bytes consumed before giving up
        size: usize,
        /// Maximum allowed size
        limit: usize,
    },

    /// Requested lifecycle transition is not in the legal set.
    #[error("illegal lifecycle transition from {from} to {to}")]
    IllegalTransition {
        /// Current state
        from: &'static str,
        /// Requested state
        to: &'static str,
    },

    /// The session's expiry tag is in the past.
    #[error("session expired")]
    SessionExpired,

    /// The session carries a status:invalidated tag.
    #[error("session invalidated")]
    SessionInvalidated,

    /// Username/password pair was rejected. Deliberately does not say which.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The user lacks the required permission tag.
    #[error("permission denied: {required}")]
    PermissionDenied {
        /// The rbac tag that was required
        required: String,
    },

    /// Incremental index state disagrees with a fresh rebuild.
    #[error("index inconsistent: {detail}")]
    IndexInconsistent {
        /// What diverged
        detail: String,
    },

    /// A transactional batch clashed with a concurrent writer.
    #[error("transaction conflict: {0}")]
    TransactionConflict(String),

    /// Password verification lost the race against its timer.
    #[error("authentication timed out after {seconds}s")]
    AuthenticationTimeout {
        /// The timeout budget that was exhausted
        seconds: u64,
    },

    /// A bounded retry loop ran out of attempts.
    #[error("{operation} not visible after {attempts} attempts")]
    RetryExhausted {
        /// What was being waited for
        operation: &'static str,
        /// Attempts made
        attempts: u32,
    },

    /// Stored content failed checksum verification.
    #[error("checksum mismatch on {entity}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Entity whose content is corrupt
        entity: String,
        /// Checksum recorded in the content tags
        expected: String,
        /// Checksum of the bytes actually read
        actual: String,
    },

    /// I/O error during storage operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Underlying database failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error while persisting a record.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error while loading a record.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Configuration error (loading, parsing, invalid values).
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// An internal invariant was detected broken (e.g. cache/tag mismatch).
    #[error("internal invariant breach: {0}")]
    Internal(String),
}

/// Matchable classification of errors, per the taxonomy callers dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Id or tag miss.
    NotFound,
    /// Duplicate creation.
    AlreadyExists,
    /// Malformed input of any sort.
    Validation,
    /// Missing/invalid/expired credentials or permission.
    Unauthorized,
    /// Index inconsistency or transaction clash.
    Conflict,
    /// A bounded operation ran out of time.
    Timeout,
    /// Storage-layer failure.
    Io,
    /// Invariant breach inside the engine.
    Internal,
}

impl EntityDbError {
    /// Returns the taxonomy kind for this error.
    pub fn kind(&self) -> ErrorKind {
        use EntityDbError::*;
        match self {
            EntityNotFound(_) | SessionNotFound => ErrorKind::NotFound,
            AlreadyExists(_) => ErrorKind::AlreadyExists,
            InvalidEntityId(_)
            | MissingMandatoryTag { .. }
            | MalformedTemporalTag(_)
            | InvalidTag(_)
            | InvalidDuration(_)
            | InvalidSize(_)
            | UnknownCondition(_)
            | InvalidFilter(_)
            | ContentTooLarge { .. }
            | IllegalTransition { .. }
            | ConfigError(_) => ErrorKind::Validation,
            SessionExpired | SessionInvalidated | AuthenticationFailed
            | PermissionDenied { .. } => ErrorKind::Unauthorized,
            IndexInconsistent { .. } | TransactionConflict(_) => ErrorKind::Conflict,
            AuthenticationTimeout { .. } | RetryExhausted { .. } => ErrorKind::Timeout,
            ChecksumMismatch { .. } | Io(_) | Storage(_) => ErrorKind::Io,
            Serialization(_) | Deserialization(_) | Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns a user-friendly recovery suggestion for the error, if available.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::IndexInconsistent { .. } => {
                Some("Run reindex_tags() to rebuild the temporal indexes from entity data.")
            }
            Self::EntityNotFound(_) => Some(
                "The entity may have been deleted, or the index may be stale; verify_index_health() will tell.",
            ),
            Self::TransactionConflict(_) => Some("Retry the batch; conflicts are transient."),
            Self::SessionExpired => Some("Re-authenticate to obtain a fresh session token."),
            Self::MissingMandatoryTag { .. } => Some(
                "Every entity needs type:, dataset:, created_at:, created_by: and uuid: tags at creation.",
            ),
            _ => None,
        }
    }
}

impl From<redb::Error> for EntityDbError {
    fn from(e: redb::Error) -> Self {
        EntityDbError::Storage(e.to_string())
    }
}

impl From<redb::DatabaseError> for EntityDbError {
    fn from(e: redb::DatabaseError) -> Self {
        EntityDbError::Storage(e.to_string())
    }
}

impl From<redb::TransactionError> for EntityDbError {
    fn from(e: redb::TransactionError) -> Self {
        EntityDbError::Storage(e.to_string())
    }
}

impl From<redb::TableError> for EntityDbError {
    fn from(e: redb::TableError) -> Self {
        EntityDbError::Storage(e.to_string())
    }
}

impl From<redb::StorageError> for EntityDbError {
    fn from(e: redb::StorageError) -> Self {
        EntityDbError::Storage(e.to_string())
    }
}

impl From<redb::CommitError> for EntityDbError {
    fn from(e: redb::CommitError) -> Self {
        EntityDbError::Storage(e.to_string())
    }
}

/// Convenience Result type for entitydb_core operations.
pub type Result<T> = std::result::Result<T, EntityDbError>;
