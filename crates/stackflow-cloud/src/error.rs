//! Reconciler error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reconciler and provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    #[error("Resource conflict: {0}")]
    ResourceConflict(String),

    #[error("Field '{field}' of {resource} cannot be changed in place")]
    ImmutableFieldConflict { resource: String, field: String },

    #[error("Timeout: {0}")]
    TimedOut(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Dependency failed: {0}")]
    DependencyFailed(String),

    #[error("Resource failed: {0}")]
    ResourceFailed(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Provider not found for kind: {0}")]
    ProviderNotFound(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Classify the error for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            CloudError::NotAuthenticated(_) => ErrorKind::NotAuthenticated,
            CloudError::MissingConfiguration(_) | CloudError::ProviderNotFound(_) => {
                ErrorKind::MissingConfiguration
            }
            CloudError::ResourceConflict(_) => ErrorKind::ResourceConflict,
            CloudError::ImmutableFieldConflict { .. } => ErrorKind::ImmutableFieldConflict,
            CloudError::TimedOut(_) => ErrorKind::TimedOut,
            CloudError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            CloudError::DependencyFailed(_) => ErrorKind::DependencyFailed,
            CloudError::ResourceFailed(_) => ErrorKind::ResourceFailed,
            CloudError::Cancelled(_) => ErrorKind::Cancelled,
            CloudError::InvalidPlan(_) => ErrorKind::InvalidPlan,
            CloudError::CommandFailed(_) => ErrorKind::CommandFailed,
            CloudError::StateError(_)
            | CloudError::LockError(_)
            | CloudError::Io(_)
            | CloudError::Json(_) => ErrorKind::Internal,
        }
    }

    /// Transient errors are retried with backoff; everything else fails the spec
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::ProviderUnavailable
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

/// Serializable error classification carried in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotAuthenticated,
    MissingConfiguration,
    ResourceConflict,
    ImmutableFieldConflict,
    TimedOut,
    ProviderUnavailable,
    DependencyFailed,
    ResourceFailed,
    Cancelled,
    InvalidPlan,
    CommandFailed,
    Internal,
}

impl ErrorKind {
    /// Corrective hint shown next to failures and warnings
    pub fn hint(&self) -> &'static str {
        match self {
            ErrorKind::NotAuthenticated => {
                "log in to the provider CLI (aws configure / kubectl config) and retry"
            }
            ErrorKind::MissingConfiguration => {
                "set the missing parameter or environment variable in the plan file"
            }
            ErrorKind::ResourceConflict => {
                "a resource with the same name exists with incompatible settings; rename it or remove the existing one"
            }
            ErrorKind::ImmutableFieldConflict => {
                "the change requires recreating the resource; run cleanup for it first"
            }
            ErrorKind::TimedOut => {
                "the resource may still be provisioning; re-run deploy later or raise the wait timeout"
            }
            ErrorKind::ProviderUnavailable => {
                "the provider API was unreachable after retries; check network connectivity"
            }
            ErrorKind::DependencyFailed => "fix the failed dependency and re-run deploy",
            ErrorKind::ResourceFailed => {
                "the resource reported a failed condition; inspect it with the provider CLI"
            }
            ErrorKind::Cancelled => "the run was cancelled; re-run deploy to continue",
            ErrorKind::InvalidPlan => {
                "fix the plan file (duplicate ids, unknown dependencies or cycles)"
            }
            ErrorKind::CommandFailed => "inspect the command output in the log (RUST_LOG=debug)",
            ErrorKind::Internal => "unexpected error; re-run with RUST_LOG=debug",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotAuthenticated => "not-authenticated",
            ErrorKind::MissingConfiguration => "missing-configuration",
            ErrorKind::ResourceConflict => "resource-conflict",
            ErrorKind::ImmutableFieldConflict => "immutable-field-conflict",
            ErrorKind::TimedOut => "timed-out",
            ErrorKind::ProviderUnavailable => "provider-unavailable",
            ErrorKind::DependencyFailed => "dependency-failed",
            ErrorKind::ResourceFailed => "resource-failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidPlan => "invalid-plan",
            ErrorKind::CommandFailed => "command-failed",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}
