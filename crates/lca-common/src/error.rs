//! Error types for the lifecycle agent
//!
//! Two layers:
//! - [`StatusError`] is the closed taxonomy reported to users when a backup,
//!   restore, configuration source or storage backend is in a bad state.
//!   It is matched structurally on `(kind, subject)`.
//! - [`Error`] is the crate-wide error that also carries transport, command
//!   and serialization failures, and wraps a `StatusError` when one applies.

use std::fmt;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// What went wrong with a tracked subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// Expected input (configuration source, exported artifact) is absent
    NotFound,
    /// Execution completed but reported failure
    Failed,
    /// Request rejected before execution because its spec is invalid
    FailedValidation,
    /// Backing storage for captured data could not be reached
    StorageBackendUnavailable,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusKind::NotFound => write!(f, "NotFound"),
            StatusKind::Failed => write!(f, "Failed"),
            StatusKind::FailedValidation => write!(f, "FailedValidation"),
            StatusKind::StorageBackendUnavailable => write!(f, "StorageBackendUnavailable"),
        }
    }
}

/// The kind of object a [`StatusError`] is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusSubject {
    /// A ConfigMap or exported directory holding request manifests
    ConfigurationSource,
    /// A Velero Backup
    CaptureRequest,
    /// A Velero Restore, or the identity recovery run
    RecoveryRequest,
    /// The OADP operator and its configuration
    Operator,
    /// The backup storage location or the ephemeral store
    StorageBackend,
}

impl fmt::Display for StatusSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusSubject::ConfigurationSource => write!(f, "configuration-source"),
            StatusSubject::CaptureRequest => write!(f, "capture-request"),
            StatusSubject::RecoveryRequest => write!(f, "recovery-request"),
            StatusSubject::Operator => write!(f, "operator"),
            StatusSubject::StorageBackend => write!(f, "storage-backend"),
        }
    }
}

/// User-facing status error with a closed `(kind, subject)` tag
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} [{subject}]: {message}")]
pub struct StatusError {
    /// What went wrong
    pub kind: StatusKind,
    /// What it went wrong with
    pub subject: StatusSubject,
    /// Human readable detail, naming the offending object where known
    pub message: String,
}

impl StatusError {
    /// Create a status error from its parts
    pub fn new(kind: StatusKind, subject: StatusSubject, message: impl Into<String>) -> Self {
        Self {
            kind,
            subject,
            message: message.into(),
        }
    }

    /// Expected configuration source or exported artifact is absent
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(
            StatusKind::NotFound,
            StatusSubject::ConfigurationSource,
            message,
        )
    }

    /// Execution of `subject` completed but failed
    pub fn failed(subject: StatusSubject, message: impl Into<String>) -> Self {
        Self::new(StatusKind::Failed, subject, message)
    }

    /// `subject` was rejected before execution
    pub fn failed_validation(subject: StatusSubject, message: impl Into<String>) -> Self {
        Self::new(StatusKind::FailedValidation, subject, message)
    }

    /// Backing storage could not be reached
    pub fn storage_backend_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusKind::StorageBackendUnavailable,
            StatusSubject::StorageBackend,
            message,
        )
    }

    /// A configuration source is missing
    pub fn is_not_found(&self) -> bool {
        self.kind == StatusKind::NotFound && self.subject == StatusSubject::ConfigurationSource
    }

    /// A backup, restore or operator action failed
    pub fn is_failed(&self) -> bool {
        self.kind == StatusKind::Failed
            && matches!(
                self.subject,
                StatusSubject::CaptureRequest
                    | StatusSubject::RecoveryRequest
                    | StatusSubject::Operator
            )
    }

    /// A backup or restore was rejected by validation
    pub fn is_failed_validation(&self) -> bool {
        self.kind == StatusKind::FailedValidation
            && matches!(
                self.subject,
                StatusSubject::CaptureRequest | StatusSubject::RecoveryRequest
            )
    }

    /// The storage backend is unreachable
    pub fn is_storage_backend_unavailable(&self) -> bool {
        self.kind == StatusKind::StorageBackendUnavailable
            && self.subject == StatusSubject::StorageBackend
    }
}

/// Main error type for lifecycle agent operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A tracked subject is in a bad state
    #[error(transparent)]
    Status(#[from] StatusError),

    /// A host command exited unsuccessfully or could not be spawned
    #[error("command `{program}` failed (exit code {}): {output}", describe_exit(.exit_code))]
    Command {
        /// Program that was executed
        program: String,
        /// Exit code, if the process ran to completion
        exit_code: Option<i32>,
        /// Captured stdout and stderr
        output: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Filesystem error
    #[error("io error at {path}: {message}")]
    Io {
        /// Path being accessed
        path: String,
        /// Description of what failed
        message: String,
    },

    /// A wait was aborted through its cancellation token
    #[error("{operation} was cancelled")]
    Cancelled {
        /// What was being waited on
        operation: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "poll_until", "tracker")
        context: String,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl Error {
    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an io error for a path
    pub fn io(path: impl AsRef<std::path::Path>, err: impl fmt::Display) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }

    /// Create a command failure
    pub fn command(
        program: impl Into<String>,
        exit_code: Option<i32>,
        output: impl Into<String>,
    ) -> Self {
        Self::Command {
            program: program.into(),
            exit_code,
            output: output.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
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

    /// The wrapped status error, if this is one
    pub fn status(&self) -> Option<&StatusError> {
        match self {
            Error::Status(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is a Kubernetes 404
    pub fn is_kube_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// Check if this error is retryable
    ///
    /// Status errors describe remote state that will not change by asking
    /// again, so they are not retryable. Host commands are never retried here
    /// either; callers decide.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Status(_) => false,
            Error::Command { .. } => false,
            Error::Serialization { .. } => false,
            Error::Io { .. } => true,
            Error::Cancelled { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: a failed restore is reported with the request it belongs to
    ///
    /// The status error carries a closed tag so callers can branch on it
    /// without comparing message strings.
    #[test]
    fn story_failed_restore_is_identifiable() {
        let err = StatusError::failed(StatusSubject::RecoveryRequest, "restore y failed");
        assert!(err.is_failed());
        assert!(!err.is_failed_validation());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "Failed [recovery-request]: restore y failed");
    }

    #[test]
    fn not_found_is_scoped_to_configuration_sources() {
        assert!(StatusError::not_found("configmap gone").is_not_found());

        let other = StatusError::new(
            StatusKind::NotFound,
            StatusSubject::CaptureRequest,
            "backup gone",
        );
        assert!(!other.is_not_found());
    }

    #[test]
    fn failed_validation_only_applies_to_requests() {
        let err = StatusError::failed_validation(StatusSubject::CaptureRequest, "bad spec");
        assert!(err.is_failed_validation());

        let err = StatusError::failed_validation(StatusSubject::Operator, "bad spec");
        assert!(!err.is_failed_validation());
    }

    #[test]
    fn storage_backend_unavailable_predicate() {
        let err = StatusError::storage_backend_unavailable("etcd not healthy");
        assert!(err.is_storage_backend_unavailable());
        assert_eq!(err.subject, StatusSubject::StorageBackend);
    }

    #[test]
    fn status_errors_compare_structurally() {
        let a = StatusError::failed(StatusSubject::CaptureRequest, "x");
        let b = StatusError::failed(StatusSubject::CaptureRequest, "x");
        assert_eq!(a, b);
        assert_ne!(a, StatusError::failed(StatusSubject::Operator, "x"));
    }

    #[test]
    fn error_exposes_wrapped_status() {
        let err: Error = StatusError::not_found("missing").into();
        assert!(err.status().is_some_and(|s| s.is_not_found()));
        assert!(!err.is_retryable());

        assert!(Error::internal("boom").status().is_none());
    }

    #[test]
    fn command_error_formats_exit_code() {
        let err = Error::command("nsenter", Some(125), "no such container");
        let msg = err.to_string();
        assert!(msg.contains("nsenter"));
        assert!(msg.contains("125"));
        assert!(msg.contains("no such container"));

        let err = Error::command("podman", None, "spawn failed");
        assert!(err.to_string().contains("exit code none"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn internal_error_with_context() {
        let err = Error::internal_with_context("tracker", "unexpected state");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("[tracker]"));
        assert!(Error::internal("x").to_string().contains("[unknown]"));
    }

    #[test]
    fn cancelled_is_not_retryable() {
        let err = Error::cancelled("etcd health wait");
        assert_eq!(err.to_string(), "etcd health wait was cancelled");
        assert!(!err.is_retryable());
    }
}
