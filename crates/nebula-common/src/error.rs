//! Error handling for Nebula.
//!
//! Provides the unified error type shared across the control plane, the
//! query path and both daemons, together with a stable numeric code
//! registry for programmatic handling.

use std::fmt;

use thiserror::Error;

/// Result type alias for Nebula operations.
pub type NebulaResult<T> = std::result::Result<T, NebulaError>;

/// Error codes for categorizing errors.
///
/// These codes are stable across versions and cross RPC boundaries in
/// query stats and task replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal invariant violation (bug); fatal by policy.
    InternalInvariant = 0x0001,
    /// Invalid argument provided.
    InvalidArgument = 0x0002,
    /// Operation timed out.
    Timeout = 0x0003,

    // Configuration errors (0x0100 - 0x01FF)
    /// Cluster config could not be fetched; previous snapshot kept.
    ConfigUnavailable = 0x0100,
    /// Cluster config fetched but failed to parse.
    ConfigInvalid = 0x0101,

    // Cluster errors (0x0200 - 0x02FF)
    /// A node did not answer an RPC.
    NodeUnreachable = 0x0200,
    /// A node refused to accept a task.
    TaskRejected = 0x0201,
    /// A node accepted a task but reported failure.
    TaskFailed = 0x0202,

    // Query errors (0x0300 - 0x03FF)
    /// Query could not be compiled into a plan.
    PlanCompileFailed = 0x0300,
    /// Plan fragment execution failed.
    ExecutionFailed = 0x0301,
    /// Data did not match the declared schema.
    SchemaMismatch = 0x0302,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Config",
            0x02 => "Cluster",
            0x03 => "Query",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The unified error type for Nebula.
///
/// Library crates convert their local errors into this type at the crate
/// seams; binaries report it through `anyhow`.
#[derive(Debug, Error)]
pub enum NebulaError {
    /// Cluster config could not be fetched.
    #[error("cluster config unavailable at {uri}: {reason}")]
    ConfigUnavailable {
        /// Config URI that failed to resolve.
        uri: String,
        /// Fetch failure detail.
        reason: String,
    },

    /// Cluster config fetched but malformed.
    #[error("cluster config invalid at {uri}: {reason}")]
    ConfigInvalid {
        /// Config URI that was parsed.
        uri: String,
        /// Parse failure detail.
        reason: String,
    },

    /// A node did not answer an RPC inside the tick deadline.
    #[error("node {node} unreachable: {reason}")]
    NodeUnreachable {
        /// Node address as `host:port`.
        node: String,
        /// Transport-level detail.
        reason: String,
    },

    /// A node refused a task outright.
    #[error("task {signature} rejected by {node}")]
    TaskRejected {
        /// Signature of the rejected task.
        signature: String,
        /// Node address as `host:port`.
        node: String,
    },

    /// A node accepted a task but reported failure.
    #[error("task {signature} failed on {node}: {reason}")]
    TaskFailed {
        /// Signature of the failed task.
        signature: String,
        /// Node address as `host:port`.
        node: String,
        /// Failure detail from the node.
        reason: String,
    },

    /// Query could not be compiled into a plan.
    #[error("plan compile failed: {message}")]
    PlanCompileFailed {
        /// Human-readable compile diagnostic.
        message: String,
    },

    /// Plan fragment execution failed on some node.
    #[error("execution failed: {message}")]
    ExecutionFailed {
        /// Human-readable execution diagnostic.
        message: String,
    },

    /// Ingested data did not match the declared table schema.
    #[error("schema mismatch for table {table}: {message}")]
    SchemaMismatch {
        /// Table whose schema was violated.
        table: String,
        /// Mismatch detail.
        message: String,
    },

    /// Internal invariant violation. Callers treat this as fatal: log and
    /// terminate so an orchestrator can restart cleanly.
    #[error("internal invariant violated: {message}")]
    InternalInvariant {
        /// Description of the violated invariant.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl NebulaError {
    /// Shorthand for an internal invariant violation.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InternalInvariant {
            message: message.into(),
        }
    }

    /// Returns the stable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ConfigUnavailable { .. } => ErrorCode::ConfigUnavailable,
            Self::ConfigInvalid { .. } => ErrorCode::ConfigInvalid,
            Self::NodeUnreachable { .. } => ErrorCode::NodeUnreachable,
            Self::TaskRejected { .. } => ErrorCode::TaskRejected,
            Self::TaskFailed { .. } => ErrorCode::TaskFailed,
            Self::PlanCompileFailed { .. } => ErrorCode::PlanCompileFailed,
            Self::ExecutionFailed { .. } => ErrorCode::ExecutionFailed,
            Self::SchemaMismatch { .. } => ErrorCode::SchemaMismatch,
            Self::InternalInvariant { .. } => ErrorCode::InternalInvariant,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Io { .. } => ErrorCode::Unknown,
        }
    }

    /// Returns true if this error is fatal by propagation policy.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::InternalInvariant { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_categories() {
        assert_eq!(ErrorCode::ConfigInvalid.category(), "Config");
        assert_eq!(ErrorCode::NodeUnreachable.category(), "Cluster");
        assert_eq!(ErrorCode::PlanCompileFailed.category(), "Query");
        assert_eq!(ErrorCode::InternalInvariant.category(), "General");
    }

    #[test]
    fn test_error_to_code() {
        let err = NebulaError::ConfigUnavailable {
            uri: "s3://bucket/cluster.yml".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::ConfigUnavailable);
        assert!(!err.is_fatal());

        let err = NebulaError::invariant("duplicate signature");
        assert_eq!(err.code(), ErrorCode::InternalInvariant);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_display_carries_context() {
        let err = NebulaError::TaskFailed {
            signature: "events@0".to_string(),
            node: "10.0.0.2:9199".to_string(),
            reason: "oom".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("events@0"));
        assert!(text.contains("10.0.0.2:9199"));
    }
}
