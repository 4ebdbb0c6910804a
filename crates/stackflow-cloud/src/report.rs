//! Run report
//!
//! Accumulates one `ReconcileResult` per spec and summarizes the run as a
//! serializable document.

use crate::action::{ReconcileAction, ReconcileResult};
use crate::error::{ErrorKind, Result};
use crate::spec::{Parameters, ResourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SENSITIVE_MARKERS: [&str; 6] = [
    "password",
    "secret",
    "token",
    "credential",
    "api_key",
    "apikey",
];

/// What the run was doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Deploy,
    Cleanup,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Deploy => write!(f, "deploy"),
            RunMode::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every spec reached its desired state (warnings allowed)
    Success,
    /// Some specs failed, none of them required
    PartialFailure,
    /// A required spec failed, or nothing succeeded
    Failed,
    /// Cancellation stopped the run before every spec was attempted
    Aborted,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success | RunStatus::PartialFailure => 0,
            RunStatus::Failed | RunStatus::Aborted => 1,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::PartialFailure => write!(f, "partial-failure"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Whether an output must not be shown in full
pub fn is_sensitive(kind: ResourceKind, key: &str) -> bool {
    if kind == ResourceKind::Secret {
        return true;
    }
    let key = key.to_lowercase();
    SENSITIVE_MARKERS.iter().any(|m| key.contains(m))
}

/// Mask a sensitive value, keeping at most a two character prefix
pub fn mask(value: &serde_json::Value) -> serde_json::Value {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() <= 8 {
        return serde_json::json!("********");
    }
    let prefix: String = text.chars().take(2).collect();
    serde_json::json!(format!("{}******", prefix))
}

/// Severity of a reported issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Failure,
    Warning,
}

/// A failed or warned spec with a corrective hint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub spec_id: String,
    pub severity: Severity,
    pub kind: ErrorKind,
    pub message: String,
    pub hint: String,
}

/// Counts per action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub failed: usize,
    pub dependency_failed: usize,
    pub aborted: usize,
    pub warnings: usize,
}

impl std::fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted, {} unchanged, {} failed, {} blocked, {} aborted ({} warnings)",
            self.created,
            self.updated,
            self.deleted,
            self.skipped,
            self.failed,
            self.dependency_failed,
            self.aborted,
            self.warnings
        )
    }
}

/// Append-only record of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Plan name, if the plan file had one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,

    pub mode: RunMode,

    pub status: RunStatus,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,

    pub summary: ReportSummary,

    /// Results in completion order
    pub results: Vec<ReconcileResult>,
}

impl Report {
    pub fn new(mode: RunMode) -> Self {
        Self {
            plan: None,
            mode,
            status: RunStatus::Success,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
            summary: ReportSummary::default(),
            results: Vec::new(),
        }
    }

    pub fn with_plan_name(mut self, name: impl Into<String>) -> Self {
        self.plan = Some(name.into());
        self
    }

    /// Append the result of one spec
    pub fn record(&mut self, result: ReconcileResult) {
        if self.result(&result.spec_id).is_some() {
            tracing::warn!("Ignoring second result for '{}'", result.spec_id);
            return;
        }
        self.results.push(result);
    }

    pub fn result(&self, spec_id: &str) -> Option<&ReconcileResult> {
        self.results.iter().find(|r| r.spec_id == spec_id)
    }

    pub fn action(&self, spec_id: &str) -> Option<ReconcileAction> {
        self.result(spec_id).map(|r| r.action)
    }

    /// Compute the summary and overall status
    pub fn finish(&mut self) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.duration_ms = now
            .signed_duration_since(self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self.summary = self.compute_summary();
        self.status = self.compute_status();
    }

    fn compute_summary(&self) -> ReportSummary {
        let mut summary = ReportSummary {
            total: self.results.len(),
            ..Default::default()
        };
        for result in &self.results {
            match result.action {
                ReconcileAction::Created => summary.created += 1,
                ReconcileAction::Updated => summary.updated += 1,
                ReconcileAction::Skipped => summary.skipped += 1,
                ReconcileAction::Deleted => summary.deleted += 1,
                ReconcileAction::Failed => summary.failed += 1,
                ReconcileAction::DependencyFailed => summary.dependency_failed += 1,
                ReconcileAction::Aborted => summary.aborted += 1,
            }
            if result.is_warning() {
                summary.warnings += 1;
            }
        }
        summary
    }

    fn compute_status(&self) -> RunStatus {
        let cancelled = self.results.iter().any(|r| {
            r.action == ReconcileAction::Aborted || r.error == Some(ErrorKind::Cancelled)
        });
        if cancelled {
            return RunStatus::Aborted;
        }

        let failures: Vec<&ReconcileResult> = self
            .results
            .iter()
            .filter(|r| r.action.is_failure())
            .collect();
        if failures.is_empty() {
            return RunStatus::Success;
        }

        let any_success = self.results.iter().any(|r| r.action.is_success());
        if failures.iter().any(|r| r.required) || !any_success {
            RunStatus::Failed
        } else {
            RunStatus::PartialFailure
        }
    }

    /// Failures and warnings with corrective hints
    pub fn issues(&self) -> Vec<Issue> {
        self.results
            .iter()
            .filter_map(|r| {
                let kind = r.error?;
                let severity = if r.action.is_success() {
                    Severity::Warning
                } else if r.action.is_failure() {
                    Severity::Failure
                } else {
                    return None;
                };
                Some(Issue {
                    spec_id: r.spec_id.clone(),
                    severity,
                    kind,
                    message: r.message.clone(),
                    hint: kind.hint().to_string(),
                })
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<Issue> {
        self.issues()
            .into_iter()
            .filter(|i| i.severity == Severity::Failure)
            .collect()
    }

    pub fn warnings(&self) -> Vec<Issue> {
        self.issues()
            .into_iter()
            .filter(|i| i.severity == Severity::Warning)
            .collect()
    }

    /// Copy of the report with sensitive outputs masked
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for result in &mut copy.results {
            let kind = result.kind;
            result.outputs = result
                .outputs
                .iter()
                .map(|(key, value)| {
                    if is_sensitive(kind, key) {
                        (key.clone(), mask(value))
                    } else {
                        (key.clone(), value.clone())
                    }
                })
                .collect::<Parameters>();
        }
        copy
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(id: &str, action: ReconcileAction) -> ReconcileResult {
        ReconcileResult::new(id, ResourceKind::Release, action)
    }

    #[test]
    fn test_success_with_warning() {
        let mut report = Report::new(RunMode::Deploy);
        report.record(result("r1", ReconcileAction::Created));
        report.record(
            result("cert", ReconcileAction::Created)
                .with_error(ErrorKind::TimedOut, "certificate may still be provisioning"),
        );
        report.finish();

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.summary.created, 2);
        assert_eq!(report.summary.warnings, 1);
        assert_eq!(report.warnings().len(), 1);
        assert!(report.failures().is_empty());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_partial_failure_vs_failed() {
        let mut report = Report::new(RunMode::Deploy);
        report.record(result("r2", ReconcileAction::Created));
        report.record(
            result("r1", ReconcileAction::Failed)
                .with_error(ErrorKind::ImmutableFieldConflict, "chart changed"),
        );
        report.record(
            result("i1", ReconcileAction::DependencyFailed)
                .with_error(ErrorKind::DependencyFailed, "r1 failed"),
        );
        report.finish();
        assert_eq!(report.status, RunStatus::PartialFailure);
        assert_eq!(report.exit_code(), 0);

        let mut strict = Report::new(RunMode::Deploy);
        strict.record(result("r2", ReconcileAction::Created));
        strict.record(
            result("r1", ReconcileAction::Failed).with_error(ErrorKind::ImmutableFieldConflict, ""),
        );
        strict.record(
            result("i1", ReconcileAction::DependencyFailed)
                .with_error(ErrorKind::DependencyFailed, "")
                .with_required(true),
        );
        strict.finish();
        assert_eq!(strict.status, RunStatus::Failed);
        assert_eq!(strict.exit_code(), 1);
    }

    #[test]
    fn test_nothing_succeeded_is_failed() {
        let mut report = Report::new(RunMode::Deploy);
        report.record(
            result("c1", ReconcileAction::Failed).with_error(ErrorKind::NotAuthenticated, ""),
        );
        report.finish();
        assert_eq!(report.status, RunStatus::Failed);
    }

    #[test]
    fn test_aborted() {
        let mut report = Report::new(RunMode::Deploy);
        report.record(result("c1", ReconcileAction::Created));
        report.record(result("n1", ReconcileAction::Aborted).with_error(ErrorKind::Cancelled, ""));
        report.finish();
        assert_eq!(report.status, RunStatus::Aborted);
        assert_eq!(report.summary.aborted, 1);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_append_only() {
        let mut report = Report::new(RunMode::Deploy);
        report.record(result("c1", ReconcileAction::Created));
        report.record(result("c1", ReconcileAction::Failed));
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.action("c1"), Some(ReconcileAction::Created));
    }

    #[test]
    fn test_redaction() {
        let mut report = Report::new(RunMode::Deploy);
        let outputs = Parameters::from([
            ("hostname".to_string(), json!("search.example.com")),
            ("elastic_password".to_string(), json!("s3cr3t-value-123")),
        ]);
        report.record(
            ReconcileResult::new("es", ResourceKind::Release, ReconcileAction::Created)
                .with_outputs(outputs),
        );
        report.record(
            ReconcileResult::new("creds", ResourceKind::Secret, ReconcileAction::Created)
                .with_outputs(Parameters::from([("value".to_string(), json!("abc"))])),
        );

        let redacted = report.redacted();
        let es = redacted.result("es").unwrap();
        assert_eq!(es.outputs["hostname"], json!("search.example.com"));
        assert_eq!(es.outputs["elastic_password"], json!("s3******"));
        assert_eq!(redacted.result("creds").unwrap().outputs["value"], json!("********"));

        // the original keeps the real values
        assert_eq!(
            report.result("es").unwrap().outputs["elastic_password"],
            json!("s3cr3t-value-123")
        );
    }

    #[test]
    fn test_json_document() {
        let mut report = Report::new(RunMode::Cleanup).with_plan_name("search-stack");
        report.record(result("r1", ReconcileAction::Deleted));
        report.finish();

        let json: serde_json::Value =
            serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["mode"], "cleanup");
        assert_eq!(json["status"], "success");
        assert_eq!(json["summary"]["deleted"], 1);
        assert_eq!(json["plan"], "search-stack");
    }
}
