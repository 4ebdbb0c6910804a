//! Namespace provider (kubectl)
//!
//! Parameters: `name`, `labels` (map).

use super::converged;
use crate::tools::Kubectl;
use async_trait::async_trait;
use serde_json::{Value, json};
use stackflow_cloud::{
    ApplyOutcome, AuthStatus, DeleteOutcome, ObservedState, ReadyCondition, ResourceProvider,
    ResourceSpec, Result,
};

pub struct NamespaceProvider {
    kubectl: Kubectl,
}

impl NamespaceProvider {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }

    fn manifest(spec: &ResourceSpec) -> Value {
        let mut metadata = json!({ "name": spec.name() });
        if let Some(labels) = spec.parameters.get("labels") {
            metadata["labels"] = labels.clone();
        }
        json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": metadata,
        })
    }
}

#[async_trait]
impl ResourceProvider for NamespaceProvider {
    fn name(&self) -> &str {
        "kubectl"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        match self.kubectl.client_version().await {
            Ok(version) => Ok(AuthStatus::ok(format!("kubectl {}", version))),
            Err(e) => Ok(AuthStatus::failed(e.to_string())),
        }
    }

    async fn observe(&self, spec: &ResourceSpec) -> Result<ObservedState> {
        let Some(object) = self.kubectl.get("namespace", spec.name(), None).await? else {
            return Ok(ObservedState::absent());
        };

        let ready = match object["status"]["phase"].as_str() {
            Some("Active") => ReadyCondition::Ready,
            Some(_) => ReadyCondition::Pending,
            None => ReadyCondition::Unknown,
        };

        let mut state =
            ObservedState::present(ready).with_attribute("name", json!(spec.name()));
        if let Some(desired) = spec.parameters.get("labels").and_then(Value::as_object) {
            // Kubernetes adds its own labels; only compare the ones we manage
            let actual = &object["metadata"]["labels"];
            let managed: serde_json::Map<String, Value> = desired
                .keys()
                .filter_map(|k| actual.get(k).map(|v| (k.clone(), v.clone())))
                .collect();
            state = state.with_attribute("labels", Value::Object(managed));
        }
        Ok(state)
    }

    async fn apply(&self, spec: &ResourceSpec, observed: &ObservedState) -> Result<ApplyOutcome> {
        if spec.matches(observed) {
            return Ok(ApplyOutcome::skipped());
        }
        self.kubectl.apply(&Self::manifest(spec)).await?;
        Ok(converged(observed))
    }

    async fn delete(&self, spec: &ResourceSpec) -> Result<DeleteOutcome> {
        if self.kubectl.delete("namespace", spec.name(), None).await? {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::AlreadyAbsent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandOutput;
    use crate::runner::fake::FakeRunner;
    use stackflow_cloud::ResourceKind;
    use std::sync::Arc;

    fn spec() -> ResourceSpec {
        ResourceSpec::new("ns", ResourceKind::Namespace)
            .with_parameter("name", json!("elastic"))
            .with_parameter("labels", json!({"team": "search"}))
    }

    #[tokio::test]
    async fn test_existing_namespace_is_skipped() {
        let runner = Arc::new(FakeRunner::new().on(
            "kubectl",
            "get namespace elastic",
            CommandOutput::ok(
                r#"{"metadata":{"name":"elastic","labels":{"team":"search","kubernetes.io/metadata.name":"elastic"}},"status":{"phase":"Active"}}"#,
            ),
        ));
        let provider = NamespaceProvider::new(Kubectl::new(runner.clone(), None));

        let observed = provider.observe(&spec()).await.unwrap();
        assert!(observed.is_ready());
        let outcome = provider.apply(&spec(), &observed).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::skipped());
        assert!(runner.calls_matching("apply").is_empty());
    }

    #[tokio::test]
    async fn test_missing_namespace_is_applied() {
        let runner = Arc::new(FakeRunner::new());
        let provider = NamespaceProvider::new(Kubectl::new(runner.clone(), None));

        let observed = provider.observe(&spec()).await.unwrap();
        let outcome = provider.apply(&spec(), &observed).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::created());
        let apply = &runner.calls_matching("apply -f -")[0];
        let manifest: Value = serde_json::from_str(apply.stdin.as_deref().unwrap()).unwrap();
        assert_eq!(manifest["metadata"]["labels"]["team"], json!("search"));
    }

    #[tokio::test]
    async fn test_delete_missing_namespace() {
        let runner = Arc::new(FakeRunner::new());
        let provider = NamespaceProvider::new(Kubectl::new(runner.clone(), None));
        assert_eq!(
            provider.delete(&spec()).await.unwrap(),
            DeleteOutcome::AlreadyAbsent
        );
        assert_eq!(
            runner.lines(),
            vec!["kubectl delete namespace elastic --ignore-not-found --wait=false"]
        );
    }
}
