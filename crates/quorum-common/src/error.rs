//! Error types for the quorum operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Every variant that can be tied to a deployment scope carries the namespace
//! so the reconcile loop can log and requeue with full context.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for cluster identity and credential operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error [{scope}]: {source}")]
    Kube {
        /// Namespace of the deployment scope
        scope: String,
        /// The underlying kube-rs error
        source: kube::Error,
    },

    /// The legacy admin secret still holds its own field name
    #[error(
        "invalid admin credential for {scope}: legacy field '{field}' holds the placeholder value; \
         the admin key must be supplied for an externally managed cluster"
    )]
    InvalidCredentialPlaceholder {
        /// Namespace of the deployment scope
        scope: String,
        /// Name of the legacy field carrying the placeholder
        field: String,
    },

    /// The primary record exists but none of the known credential formats is present
    #[error("no admin credential found in record {record} for {scope}")]
    MissingCredential {
        /// Namespace of the deployment scope
        scope: String,
        /// Name of the record that was inspected
        record: String,
    },

    /// A new cluster identity would have to be created but no owner was supplied
    #[error("no cluster identity found for {scope} and no owner supplied to create one")]
    MissingOwner {
        /// Namespace of the deployment scope
        scope: String,
    },

    /// Optimistic concurrency check failed on update
    #[error("conflict updating {name} in {scope}: record was modified concurrently")]
    StoreConflict {
        /// Namespace of the deployment scope
        scope: String,
        /// Name of the record
        name: String,
    },

    /// Create failed because the record already exists
    #[error("record {name} already exists in {scope}")]
    AlreadyExists {
        /// Namespace of the deployment scope
        scope: String,
        /// Name of the record
        name: String,
    },

    /// The external keyring tool could not be run or exited unsuccessfully
    #[error("exec error [{scope}] running {command}: {message}")]
    ExecFailure {
        /// Namespace of the deployment scope
        scope: String,
        /// Command that was executed
        command: String,
        /// Description of what failed
        message: String,
    },

    /// The keyring output did not contain a `key = <secret>` line
    #[error("parse error [{scope}]: {message}")]
    ParseFailure {
        /// Namespace of the deployment scope
        scope: String,
        /// Description of what failed
        message: String,
    },

    /// The operating system random source failed
    #[error("random source exhausted [{scope}]: {message}")]
    RandomSourceExhausted {
        /// Namespace of the deployment scope
        scope: String,
        /// Description of what failed
        message: String,
    },

    /// An operation exceeded its configured time bound
    #[error("timeout [{scope}] during {operation}")]
    Timeout {
        /// Namespace of the deployment scope
        scope: String,
        /// Operation that timed out (e.g., "get", "generate")
        operation: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error [{scope}]: {message}")]
    Serialization {
        /// Namespace of the deployment scope
        scope: String,
        /// Description of what failed
        message: String,
        /// The record being decoded (if known)
        record: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{scope}] in {context}: {message}")]
    Internal {
        /// Namespace of the deployment scope
        scope: String,
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "resolver", "store")
        context: String,
    },
}

impl Error {
    /// Wrap a Kubernetes API error for the given scope
    pub fn kube(scope: impl Into<String>, source: kube::Error) -> Self {
        Self::Kube {
            scope: scope.into(),
            source,
        }
    }

    /// Create a placeholder error for the given scope and legacy field
    pub fn invalid_placeholder(scope: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidCredentialPlaceholder {
            scope: scope.into(),
            field: field.into(),
        }
    }

    /// Create a missing-credential error for the given record
    pub fn missing_credential(scope: impl Into<String>, record: impl Into<String>) -> Self {
        Self::MissingCredential {
            scope: scope.into(),
            record: record.into(),
        }
    }

    /// Create a store conflict error
    pub fn conflict(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self::StoreConflict {
            scope: scope.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            scope: scope.into(),
            name: name.into(),
        }
    }

    /// Create an exec error without scope context
    ///
    /// The resolver attaches the scope via [`Error::in_scope`].
    pub fn exec(command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ExecFailure {
            scope: UNKNOWN_CONTEXT.to_string(),
            command: command.into(),
            message: msg.into(),
        }
    }

    /// Create a parse error without scope context
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseFailure {
            scope: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a random-source error without scope context
    pub fn random_source(msg: impl Into<String>) -> Self {
        Self::RandomSourceExhausted {
            scope: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(scope: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Timeout {
            scope: scope.into(),
            operation: operation.into(),
        }
    }

    /// Create a serialization error naming the record being decoded
    pub fn serialization_for_record(record: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            scope: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            record: Some(record.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            scope: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Attach the deployment scope to errors created without one
    ///
    /// Leaves errors that already name a scope untouched.
    pub fn in_scope(mut self, namespace: &str) -> Self {
        let scope = match &mut self {
            Error::Kube { scope, .. }
            | Error::InvalidCredentialPlaceholder { scope, .. }
            | Error::MissingCredential { scope, .. }
            | Error::MissingOwner { scope }
            | Error::StoreConflict { scope, .. }
            | Error::AlreadyExists { scope, .. }
            | Error::ExecFailure { scope, .. }
            | Error::ParseFailure { scope, .. }
            | Error::RandomSourceExhausted { scope, .. }
            | Error::Timeout { scope, .. }
            | Error::Serialization { scope, .. }
            | Error::Internal { scope, .. } => scope,
        };
        if *scope == UNKNOWN_CONTEXT {
            *scope = namespace.to_string();
        }
        self
    }

    /// Check if this error is retryable
    ///
    /// Credential misconfiguration needs an operator to fix the record and is
    /// not retryable. Store races, tool failures and timeouts clear up on a
    /// later reconcile pass.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source, .. } => {
                // Don't retry on 4xx errors (validation, forbidden, etc.)
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::InvalidCredentialPlaceholder { .. } => false,
            Error::MissingCredential { .. } => false,
            Error::MissingOwner { .. } => false,
            Error::StoreConflict { .. } => true,
            Error::AlreadyExists { .. } => true,
            Error::ExecFailure { .. } => true,
            Error::ParseFailure { .. } => true,
            Error::RandomSourceExhausted { .. } => false,
            Error::Timeout { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the deployment scope if this error is associated with one
    pub fn scope(&self) -> Option<&str> {
        let scope = match self {
            Error::Kube { scope, .. }
            | Error::InvalidCredentialPlaceholder { scope, .. }
            | Error::MissingCredential { scope, .. }
            | Error::MissingOwner { scope }
            | Error::StoreConflict { scope, .. }
            | Error::AlreadyExists { scope, .. }
            | Error::ExecFailure { scope, .. }
            | Error::ParseFailure { scope, .. }
            | Error::RandomSourceExhausted { scope, .. }
            | Error::Timeout { scope, .. }
            | Error::Serialization { scope, .. }
            | Error::Internal { scope, .. } => scope.as_str(),
        };
        (scope != UNKNOWN_CONTEXT).then_some(scope)
    }

    /// Short machine-readable name of the error kind, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Kube { .. } => "Kube",
            Error::InvalidCredentialPlaceholder { .. } => "InvalidCredentialPlaceholder",
            Error::MissingCredential { .. } => "MissingCredential",
            Error::MissingOwner { .. } => "MissingOwner",
            Error::StoreConflict { .. } => "StoreConflict",
            Error::AlreadyExists { .. } => "AlreadyExists",
            Error::ExecFailure { .. } => "ExecFailure",
            Error::ParseFailure { .. } => "ParseFailure",
            Error::RandomSourceExhausted { .. } => "RandomSourceExhausted",
            Error::Timeout { .. } => "Timeout",
            Error::Serialization { .. } => "Serialization",
            Error::Internal { .. } => "Internal",
        }
    }
}
