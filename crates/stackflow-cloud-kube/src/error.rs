//! Kubernetes CLI provider error types

use stackflow_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KubeError {
    #[error("{0} not found in PATH. Please install it first")]
    ToolNotFound(String),

    #[error("{program} authentication failed: {message}")]
    AuthenticationFailed { program: String, message: String },

    #[error("{program} could not reach the API: {message}")]
    Unavailable { program: String, message: String },

    #[error("{program} reported a conflict: {message}")]
    Conflict { program: String, message: String },

    #[error("'{resource}' cannot change {field} in place")]
    ImmutableField { resource: String, field: String },

    #[error("{program} command failed: {message}")]
    CommandFailed { program: String, message: String },

    #[error("Unexpected {program} output: {message}")]
    UnexpectedOutput { program: String, message: String },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cloud error: {0}")]
    CloudError(#[from] CloudError),
}

impl From<KubeError> for CloudError {
    fn from(err: KubeError) -> Self {
        match err {
            KubeError::ToolNotFound(_) => CloudError::MissingConfiguration(err.to_string()),
            KubeError::AuthenticationFailed { .. } => CloudError::NotAuthenticated(err.to_string()),
            KubeError::Unavailable { .. } => CloudError::ProviderUnavailable(err.to_string()),
            KubeError::Conflict { .. } => CloudError::ResourceConflict(err.to_string()),
            KubeError::ImmutableField { resource, field } => {
                CloudError::ImmutableFieldConflict { resource, field }
            }
            KubeError::CloudError(inner) => inner,
            KubeError::CommandFailed { .. }
            | KubeError::UnexpectedOutput { .. }
            | KubeError::JsonError(_)
            | KubeError::IoError(_) => CloudError::CommandFailed(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, KubeError>;

const UNAVAILABLE: [&str; 10] = [
    "unable to connect to the server",
    "connection refused",
    "i/o timeout",
    "tls handshake timeout",
    "serviceunavailable",
    "service unavailable",
    "throttling",
    "rate exceeded",
    "too many requests",
    "request timed out",
];

const UNAUTHENTICATED: [&str; 7] = [
    "unauthorized",
    "you must be logged in",
    "expiredtoken",
    "unable to locate credentials",
    "invalidclienttokenid",
    "could not get token",
    "no credentials",
];

const CONFLICT: [&str; 4] = [
    "alreadyexists",
    "already exists",
    "cannot re-use a name that is still in use",
    "another operation (install/upgrade/rollback) is in progress",
];

/// Map the stderr of a failed command to an error class
pub fn classify_failure(program: &str, stderr: &str) -> KubeError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();
    let program = program.to_string();

    if UNAVAILABLE.iter().any(|m| lower.contains(m)) {
        KubeError::Unavailable { program, message }
    } else if UNAUTHENTICATED.iter().any(|m| lower.contains(m)) {
        KubeError::AuthenticationFailed { program, message }
    } else if CONFLICT.iter().any(|m| lower.contains(m)) {
        KubeError::Conflict { program, message }
    } else {
        KubeError::CommandFailed { program, message }
    }
}

/// Whether stderr says the object does not exist
pub fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("not found")
        || lower.contains("notfound")
        || lower.contains("no cluster found")
        || lower.contains("resourcenotfoundexception")
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_cloud::ErrorKind;

    #[test]
    fn test_classify_failure() {
        let cases = [
            (
                "Unable to connect to the server: dial tcp 10.0.0.1:443: i/o timeout",
                ErrorKind::ProviderUnavailable,
            ),
            (
                "error: You must be logged in to the server (Unauthorized)",
                ErrorKind::NotAuthenticated,
            ),
            (
                "Error: INSTALLATION FAILED: cannot re-use a name that is still in use",
                ErrorKind::ResourceConflict,
            ),
            ("Error: chart \"nope\" version \"9\" not valid", ErrorKind::CommandFailed),
        ];

        for (stderr, expected) in cases {
            let err: CloudError = classify_failure("helm", stderr).into();
            assert_eq!(err.kind(), expected, "{}", stderr);
        }
    }

    #[test]
    fn test_immutable_field_maps_through() {
        let err: CloudError = KubeError::ImmutableField {
            resource: "c1".into(),
            field: "region".into(),
        }
        .into();
        assert!(matches!(
            err,
            CloudError::ImmutableFieldConflict { ref field, .. } if field == "region"
        ));
    }

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found("Error: release: not found"));
        assert!(is_not_found(
            "Error: ResourceNotFoundException: No cluster found for name: search"
        ));
        assert!(!is_not_found("error: the server doesn't have a resource type"));
    }
}
