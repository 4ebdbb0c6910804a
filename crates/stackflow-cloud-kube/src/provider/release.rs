//! Helm release provider
//!
//! Parameters: `name`, `chart` (required, `repo/chart` or chart name with
//! `repo`), `repo` (chart repository URL), `version`, `namespace`, `values`.

use super::namespace_of;
use crate::error::KubeError;
use crate::tools::{Helm, HelmRelease, ReleaseConfig};
use async_trait::async_trait;
use serde_json::json;
use stackflow_cloud::{
    ApplyOutcome, AuthStatus, DeleteOutcome, ObservedState, ReadyCondition, ResourceProvider,
    ResourceSpec, Result,
};

pub struct ReleaseProvider {
    helm: Helm,
}

impl ReleaseProvider {
    pub fn new(helm: Helm) -> Self {
        Self { helm }
    }

    fn config(spec: &ResourceSpec) -> Result<ReleaseConfig> {
        Ok(ReleaseConfig {
            name: spec.name().to_string(),
            chart: spec.require_param("chart")?,
            namespace: namespace_of(spec),
            repo: spec.get_param("repo"),
            version: spec.get_param("version"),
            values: spec.parameters.get("values").cloned(),
        })
    }
}

/// `ingress-nginx/ingress-nginx` → `ingress-nginx`
fn chart_basename(chart: &str) -> &str {
    chart.rsplit('/').next().unwrap_or(chart)
}

fn ready_condition(status: &str) -> ReadyCondition {
    match status {
        "deployed" => ReadyCondition::Ready,
        "failed" => ReadyCondition::Failed,
        s if s.starts_with("pending") || s == "uninstalling" => ReadyCondition::Pending,
        _ => ReadyCondition::Unknown,
    }
}

/// Report the installed chart in the form the spec uses when it is the same chart
fn observed_chart(spec: &ResourceSpec, release: &HelmRelease) -> String {
    let (installed, _) = release.chart_name_version();
    match spec.param_str("chart") {
        Some(desired) if chart_basename(desired) == installed => desired.to_string(),
        _ => installed.to_string(),
    }
}

#[async_trait]
impl ResourceProvider for ReleaseProvider {
    fn name(&self) -> &str {
        "helm"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        match self.helm.version().await {
            Ok(version) => Ok(AuthStatus::ok(format!("helm {}", version))),
            Err(e) => Ok(AuthStatus::failed(e.to_string())),
        }
    }

    async fn observe(&self, spec: &ResourceSpec) -> Result<ObservedState> {
        let namespace = namespace_of(spec);
        let Some(release) = self.helm.find_release(spec.name(), &namespace).await? else {
            return Ok(ObservedState::absent());
        };

        let mut state = ObservedState::present(ready_condition(&release.status))
            .with_attribute("name", json!(release.name))
            .with_attribute("namespace", json!(release.namespace))
            .with_attribute("chart", json!(observed_chart(spec, &release)))
            .with_attribute("status", json!(release.status))
            .with_attribute("revision", json!(release.revision));
        if let (_, Some(version)) = release.chart_name_version() {
            state = state.with_attribute("version", json!(version));
        }
        if !release.app_version.is_empty() {
            state = state.with_attribute("app_version", json!(release.app_version));
        }
        if spec.parameters.contains_key("values") {
            let values = self.helm.get_values(spec.name(), &namespace).await?;
            state = state.with_attribute("values", values);
        }
        Ok(state)
    }

    async fn apply(&self, spec: &ResourceSpec, observed: &ObservedState) -> Result<ApplyOutcome> {
        let config = Self::config(spec)?;

        if observed.exists {
            let drift = spec.drift(observed);
            if drift.is_empty() {
                return Ok(ApplyOutcome::skipped());
            }
            // Switching charts under a release name means uninstalling first
            if drift.iter().any(|k| k == "chart") {
                return Err(KubeError::ImmutableField {
                    resource: spec.id.clone(),
                    field: "chart".to_string(),
                }
                .into());
            }
            tracing::info!("Upgrading release {} ({:?} changed)", config.name, drift);
            self.helm.upgrade_install(&config).await?;
            return Ok(ApplyOutcome::updated());
        }

        tracing::info!("Installing release {} from {}", config.name, config.chart);
        self.helm.upgrade_install(&config).await?;
        Ok(ApplyOutcome::created())
    }

    async fn delete(&self, spec: &ResourceSpec) -> Result<DeleteOutcome> {
        if self.helm.uninstall(spec.name(), &namespace_of(spec)).await? {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::AlreadyAbsent)
        }
    }
}
