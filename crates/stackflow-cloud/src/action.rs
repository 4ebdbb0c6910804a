//! Actions taken on resources and their results

use crate::error::{CloudError, ErrorKind};
use crate::spec::{Parameters, ResourceKind};
use serde::{Deserialize, Serialize};

/// What reconciliation did to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    /// Already in the desired state (or already absent during cleanup)
    Skipped,
    /// Created a new resource
    Created,
    /// Updated an existing resource in place
    Updated,
    /// Deleted the resource (cleanup)
    Deleted,
    /// Reconciliation failed
    Failed,
    /// Not attempted because a dependency failed
    DependencyFailed,
    /// Not started because the run was cancelled
    Aborted,
}

impl ReconcileAction {
    /// The resource reached its desired state
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ReconcileAction::Skipped
                | ReconcileAction::Created
                | ReconcileAction::Updated
                | ReconcileAction::Deleted
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ReconcileAction::Failed | ReconcileAction::DependencyFailed
        )
    }
}

impl std::fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileAction::Skipped => write!(f, "skipped"),
            ReconcileAction::Created => write!(f, "created"),
            ReconcileAction::Updated => write!(f, "updated"),
            ReconcileAction::Deleted => write!(f, "deleted"),
            ReconcileAction::Failed => write!(f, "failed"),
            ReconcileAction::DependencyFailed => write!(f, "dependency-failed"),
            ReconcileAction::Aborted => write!(f, "aborted"),
        }
    }
}

/// Outcome of a provider `apply`
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    /// `Skipped`, `Created` or `Updated`
    pub action: ReconcileAction,
    /// Attributes learned from the mutating call (ids, generated values)
    pub attributes: Parameters,
}

impl ApplyOutcome {
    pub fn skipped() -> Self {
        Self {
            action: ReconcileAction::Skipped,
            attributes: Parameters::new(),
        }
    }

    pub fn created() -> Self {
        Self {
            action: ReconcileAction::Created,
            attributes: Parameters::new(),
        }
    }

    pub fn updated() -> Self {
        Self {
            action: ReconcileAction::Updated,
            attributes: Parameters::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Outcome of a provider `delete`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

/// Result of reconciling a single spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileResult {
    /// Id of the spec
    pub spec_id: String,

    /// Kind of the spec
    pub kind: ResourceKind,

    /// Action taken
    pub action: ReconcileAction,

    /// Error kind; on a successful action this marks a warning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,

    /// Human readable detail
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Whether the spec was `required_ready`
    pub required: bool,

    /// Attributes exposed to dependents and the summary
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub outputs: Parameters,

    /// Execution time in milliseconds
    pub duration_ms: u64,
}

impl ReconcileResult {
    pub fn new(spec_id: impl Into<String>, kind: ResourceKind, action: ReconcileAction) -> Self {
        Self {
            spec_id: spec_id.into(),
            kind,
            action,
            error: None,
            message: String::new(),
            required: false,
            outputs: Parameters::new(),
            duration_ms: 0,
        }
    }

    pub fn failed(spec_id: impl Into<String>, kind: ResourceKind, error: &CloudError) -> Self {
        Self::new(spec_id, kind, ReconcileAction::Failed)
            .with_error(error.kind(), error.to_string())
    }

    pub fn with_error(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.error = Some(kind);
        self.message = message.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_outputs(mut self, outputs: Parameters) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Succeeded, but with a soft error such as a readiness timeout
    pub fn is_warning(&self) -> bool {
        self.action.is_success() && self.error.is_some()
    }
}

/// Change a deploy would make, as seen by a read-only preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Create a new resource
    Create,
    /// Update an existing resource
    Update,
    /// No changes needed
    NoOp,
    /// The current state could not be observed
    Unknown,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Create => write!(f, "create"),
            ChangeType::Update => write!(f, "update"),
            ChangeType::NoOp => write!(f, "no-op"),
            ChangeType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Planned change for one spec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedChange {
    pub spec_id: String,
    pub kind: ResourceKind,
    pub change: ChangeType,
    /// Drifted parameter keys for updates
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drift: Vec<String>,
    /// Why the state is unknown
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Summary of planned changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub create: usize,
    pub update: usize,
    pub no_change: usize,
    pub unknown: usize,
}

impl ChangeSummary {
    pub fn from_changes(changes: &[PlannedChange]) -> Self {
        let mut summary = Self::default();
        for change in changes {
            match change.change {
                ChangeType::Create => summary.create += 1,
                ChangeType::Update => summary.update += 1,
                ChangeType::NoOp => summary.no_change += 1,
                ChangeType::Unknown => summary.unknown += 1,
            }
        }
        summary
    }

    pub fn has_changes(&self) -> bool {
        self.create + self.update > 0
    }
}

impl std::fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} unchanged, {} unknown",
            self.create, self.update, self.no_change, self.unknown
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_classification() {
        let ok = ReconcileResult::new("r2", ResourceKind::Certificate, ReconcileAction::Created);
        assert!(!ok.is_warning());

        let warn = ok
            .clone()
            .with_error(ErrorKind::TimedOut, "certificate may still be provisioning");
        assert!(warn.is_warning());

        let failed = ReconcileResult::failed(
            "r1",
            ResourceKind::Release,
            &CloudError::ResourceConflict("release exists in another namespace".into()),
        );
        assert!(!failed.is_warning());
        assert_eq!(failed.error, Some(ErrorKind::ResourceConflict));
    }

    #[test]
    fn test_change_summary() {
        let change = |id: &str, change| PlannedChange {
            spec_id: id.to_string(),
            kind: ResourceKind::Namespace,
            change,
            drift: Vec::new(),
            description: String::new(),
        };
        let summary = ChangeSummary::from_changes(&[
            change("a", ChangeType::Create),
            change("b", ChangeType::NoOp),
            change("c", ChangeType::NoOp),
        ]);
        assert!(summary.has_changes());
        assert_eq!(
            summary.to_string(),
            "1 to create, 0 to update, 2 unchanged, 0 unknown"
        );
    }

    #[test]
    fn test_result_serialization_skips_empty_fields() {
        let result = ReconcileResult::new("n1", ResourceKind::Namespace, ReconcileAction::Skipped);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["action"], "skipped");
        assert!(json.get("error").is_none());
        assert!(json.get("outputs").is_none());
    }
}
