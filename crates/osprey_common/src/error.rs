use thiserror::Error;

use crate::types::{ServerId, ShardId};

/// Convenience alias for `Result<T, OspreyError>`.
pub type OspreyResult<T> = Result<T, OspreyError>;

/// Error classification for surfacing decisions.
///
/// - `UserError`  — bad input data (wrong document shape, illegal key)
/// - `Transport`  — cluster-internal communication failed; fatal for the query
/// - `Remote`     — a peer reported a business error; re-thrown with its code
/// - `Internal`   — planning invariant violated; should never happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Transport,
    Remote,
    Internal,
}

/// Stable numeric codes carried on the wire as `errorNum`.
pub mod codes {
    pub const NO_ERROR: i32 = 0;
    pub const INTERNAL: i32 = 1000;
    pub const SERIALIZATION: i32 = 1001;
    pub const DOCUMENT_TYPE_INVALID: i32 = 1216;
    pub const MUST_NOT_SPECIFY_KEY: i32 = 1222;
    pub const CLUSTER_TIMEOUT: i32 = 1450;
    pub const CLUSTER_CONNECTION_LOST: i32 = 1451;
    pub const CLUSTER_COMMUNICATION: i32 = 1452;
    pub const QUERY_NOT_FOUND: i32 = 1590;
}

/// Top-level error type of the cluster execution layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OspreyError {
    /// A planning invariant was violated (unknown shard id, missing
    /// register, malformed operator wiring). Fatal.
    #[error("internal error: {0}")]
    Internal(String),

    /// A wire body could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A routed row does not hold a document (or a key string where one is
    /// allowed).
    #[error("invalid document type")]
    InvalidDocumentType,

    /// The user supplied a `_key` for a collection that is not sharded by
    /// the key attribute.
    #[error("must not specify _key for this collection")]
    MustNotSpecifyKey,

    /// No reply from a peer within the request timeout.
    #[error("timeout in communication with shard '{shard}' on cluster node '{server}'")]
    ClusterTimeout { shard: ShardId, server: ServerId },

    /// The peer became unreachable mid-request.
    #[error("lost connection to shard '{shard}' on cluster node '{server}'")]
    ConnectionLost { shard: ShardId, server: ServerId },

    /// The peer answered, but the response carried no usable error
    /// information.
    #[error("error in cluster-internal communication: {0}")]
    Communication(String),

    /// The peer no longer knows the query id. Tolerated during shutdown,
    /// fatal everywhere else.
    #[error("query not found on peer")]
    QueryNotFound,

    /// A business error reported by the peer, re-thrown locally with the
    /// same numeric code.
    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },
}

impl OspreyError {
    /// Classify this error for surfacing decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OspreyError::InvalidDocumentType | OspreyError::MustNotSpecifyKey => {
                ErrorKind::UserError
            }
            OspreyError::ClusterTimeout { .. }
            | OspreyError::ConnectionLost { .. }
            | OspreyError::Communication(_)
            | OspreyError::QueryNotFound => ErrorKind::Transport,
            OspreyError::Remote { .. } => ErrorKind::Remote,
            OspreyError::Internal(_) | OspreyError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// The numeric code carried as `errorNum` on the wire.
    pub fn error_code(&self) -> i32 {
        match self {
            OspreyError::Internal(_) => codes::INTERNAL,
            OspreyError::Serialization(_) => codes::SERIALIZATION,
            OspreyError::InvalidDocumentType => codes::DOCUMENT_TYPE_INVALID,
            OspreyError::MustNotSpecifyKey => codes::MUST_NOT_SPECIFY_KEY,
            OspreyError::ClusterTimeout { .. } => codes::CLUSTER_TIMEOUT,
            OspreyError::ConnectionLost { .. } => codes::CLUSTER_CONNECTION_LOST,
            OspreyError::Communication(_) => codes::CLUSTER_COMMUNICATION,
            OspreyError::QueryNotFound => codes::QUERY_NOT_FOUND,
            OspreyError::Remote { code, .. } => *code,
        }
    }

    /// Rebuild a local error from a wire `errorNum` + message.
    pub fn from_wire(code: i32, message: impl Into<String>) -> Self {
        match code {
            codes::QUERY_NOT_FOUND => OspreyError::QueryNotFound,
            codes::DOCUMENT_TYPE_INVALID => OspreyError::InvalidDocumentType,
            codes::MUST_NOT_SPECIFY_KEY => OspreyError::MustNotSpecifyKey,
            _ => OspreyError::Remote {
                code,
                message: message.into(),
            },
        }
    }

    /// Construct an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        OspreyError::Internal(message.into())
    }

    pub fn is_user_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::UserError)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport)
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Internal)
    }

    /// Emit a structured log entry for internal errors. Call before
    /// surfacing an error that should never occur in production.
    pub fn log_if_internal(&self) {
        if let OspreyError::Internal(message) = self {
            tracing::error!(
                error_code = self.error_code(),
                error_category = "Internal",
                "internal error: {}",
                message
            );
        }
    }
}
