//! Error types for the scorecard
//!
//! Errors are structured so callers can tell configuration problems,
//! infrastructure failures and teardown failures apart. Conformance
//! deficiencies are never errors; they are reported as scores.

use std::path::PathBuf;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for scorecard operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Configuration rejected before any cluster interaction
    #[error("invalid configuration: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The offending setting (e.g., "proxy-pull-policy")
        field: Option<String>,
    },

    /// A manifest document could not be decoded
    #[error("failed to parse {source_name}: {message}")]
    Parse {
        /// File path or in-memory source label
        source_name: String,
        /// Description of what failed
        message: String,
    },

    /// A manifest that must contain exactly one resource did not
    #[error("{source_name} must contain exactly one resource, found {count}")]
    MultipleResources {
        /// File path or in-memory source label
        source_name: String,
        /// Number of documents found
        count: usize,
    },

    /// More than one workload in a single run
    #[error("only one Deployment is supported per run: {existing} already provisioned, rejected {rejected}")]
    MultipleWorkloads {
        /// Name of the workload already provisioned
        existing: String,
        /// Name of the workload that was rejected
        rejected: String,
    },

    /// The API server does not (yet) serve this resource type
    #[error("resource type {kind} ({api_version}) is not served by the cluster")]
    UnknownResourceType {
        /// apiVersion of the resource
        api_version: String,
        /// Kind of the resource
        kind: String,
    },

    /// Conversion between generic and typed resource representations failed
    #[error("failed to convert {kind}: {message}")]
    Conversion {
        /// Target or source kind
        kind: String,
        /// Description of what failed
        message: String,
    },

    /// A bounded poll ran out of time
    #[error("timed out waiting for {operation}: {message}")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// Description of the unmet condition
        message: String,
    },

    /// One or more cleanup actions failed during ledger drain
    #[error("{failed} of {total} cleanup actions failed: {}", .failures.join("; "))]
    Cleanup {
        /// Number of failed actions
        failed: usize,
        /// Number of actions drained
        total: usize,
        /// Per-action failure descriptions, in execution order
        failures: Vec<String>,
    },

    /// Filesystem error
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// Path being read
        path: PathBuf,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "discovery", "basic-tests")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error naming the offending setting
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a parse error for a named manifest source
    pub fn parse(source_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            message: msg.into(),
        }
    }

    /// Create a conversion error for a resource kind
    pub fn conversion(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Conversion {
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create an IO error for a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True if the API server answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// True if a bounded poll ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// True if the API server refused the request as invalid (4xx other than 404).
    ///
    /// Tests use this to tell "the CR schema rejects this value" apart from
    /// "the cluster is unreachable".
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Kube { source: kube::Error::Api(ae) }
                if (400..500).contains(&ae.code) && ae.code != 404
        )
    }

    /// True if this error was raised before any cluster interaction
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            Error::Timeout { operation, .. } => Some(operation),
            _ => None,
        }
    }
}
