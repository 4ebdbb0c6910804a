//! Load balancer and ingress provider (kubectl)
//!
//! Parameters: `resource` (`service` or `ingress`, default `service`), `name`,
//! `namespace`, `manifest` (object applied when the resource is missing).
//!
//! Most load balancers are created by a chart; without a `manifest` this
//! provider only observes and waits for an address.

use super::{converged, namespace_of};
use crate::tools::Kubectl;
use async_trait::async_trait;
use serde_json::{Value, json};
use stackflow_cloud::{
    ApplyOutcome, CloudError, DeleteOutcome, ObservedState, ReadyCondition, ResourceProvider,
    ResourceSpec, Result,
};

pub struct NetworkProvider {
    kubectl: Kubectl,
}

impl NetworkProvider {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }

    fn resource(spec: &ResourceSpec) -> String {
        spec.param_str("resource").unwrap_or("service").to_string()
    }

    /// The `manifest` parameter with name and namespace filled in
    fn manifest(spec: &ResourceSpec) -> Option<Value> {
        let mut manifest = spec.parameters.get("manifest")?.clone();
        if !manifest.is_object() {
            return None;
        }
        if manifest["metadata"].is_null() {
            manifest["metadata"] = json!({});
        }
        manifest["metadata"]["name"] = json!(spec.name());
        manifest["metadata"]["namespace"] = json!(namespace_of(spec));
        Some(manifest)
    }
}

/// First load balancer address as (hostname, ip)
fn ingress_address(object: &Value) -> (Option<String>, Option<String>) {
    let first = &object["status"]["loadBalancer"]["ingress"][0];
    (
        first["hostname"].as_str().map(str::to_string),
        first["ip"].as_str().map(str::to_string),
    )
}

#[async_trait]
impl ResourceProvider for NetworkProvider {
    fn name(&self) -> &str {
        "kubectl"
    }

    async fn observe(&self, spec: &ResourceSpec) -> Result<ObservedState> {
        let resource = Self::resource(spec);
        let namespace = namespace_of(spec);
        let Some(object) = self
            .kubectl
            .get(&resource, spec.name(), Some(&namespace))
            .await?
        else {
            return Ok(ObservedState::absent());
        };

        let service_type = object["spec"]["type"].as_str().map(str::to_string);
        let (hostname, ip) = ingress_address(&object);
        let has_address = hostname.is_some() || ip.is_some();

        // Only load balancers and ingresses get an address assigned later
        let waits_for_address =
            resource == "ingress" || service_type.as_deref() == Some("LoadBalancer");
        let ready = if !waits_for_address || has_address {
            ReadyCondition::Ready
        } else {
            ReadyCondition::Pending
        };

        let mut state = ObservedState::present(ready)
            .with_attribute("name", json!(spec.name()))
            .with_attribute("namespace", json!(namespace))
            .with_attribute("resource", json!(resource));
        if let Some(service_type) = service_type {
            state = state.with_attribute("type", json!(service_type));
        }
        if let Some(hostname) = hostname {
            state = state.with_attribute("hostname", json!(hostname));
        }
        if let Some(ip) = ip {
            state = state.with_attribute("ip", json!(ip));
        }
        Ok(state)
    }

    async fn apply(&self, spec: &ResourceSpec, observed: &ObservedState) -> Result<ApplyOutcome> {
        let Some(manifest) = Self::manifest(spec) else {
            if observed.exists {
                return Ok(ApplyOutcome::skipped());
            }
            return Err(CloudError::MissingConfiguration(format!(
                "{} '{}' does not exist and has no 'manifest' to create it from",
                spec.kind, spec.id
            )));
        };

        if observed.exists {
            return Ok(ApplyOutcome::skipped());
        }
        self.kubectl.apply(&manifest).await?;
        Ok(converged(observed))
    }

    async fn delete(&self, spec: &ResourceSpec) -> Result<DeleteOutcome> {
        // Without a manifest the object belongs to whatever created it
        if Self::manifest(spec).is_none() {
            return Ok(DeleteOutcome::AlreadyAbsent);
        }
        let deleted = self
            .kubectl
            .delete(&Self::resource(spec), spec.name(), Some(&namespace_of(spec)))
            .await?;
        if deleted {
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
    use stackflow_cloud::{ErrorKind, ResourceKind};
    use std::sync::Arc;

    fn spec() -> ResourceSpec {
        ResourceSpec::new("lb", ResourceKind::Network)
            .with_parameter("name", json!("ingress-nginx-controller"))
            .with_parameter("namespace", json!("ingress"))
    }

    #[tokio::test]
    async fn test_load_balancer_without_address_is_pending() {
        let runner = Arc::new(FakeRunner::new().on(
            "kubectl",
            "get service ingress-nginx-controller -n ingress",
            CommandOutput::ok(r#"{"spec":{"type":"LoadBalancer"},"status":{"loadBalancer":{}}}"#),
        ));
        let provider = NetworkProvider::new(Kubectl::new(runner, None));

        let observed = provider.observe(&spec()).await.unwrap();
        assert!(observed.exists);
        assert_eq!(observed.ready, ReadyCondition::Pending);
    }

    #[tokio::test]
    async fn test_load_balancer_hostname_is_reported() {
        let runner = Arc::new(FakeRunner::new().on(
            "kubectl",
            "get service",
            CommandOutput::ok(
                r#"{"spec":{"type":"LoadBalancer"},"status":{"loadBalancer":{"ingress":[{"hostname":"a1b2.elb.us-west-2.amazonaws.com"}]}}}"#,
            ),
        ));
        let provider = NetworkProvider::new(Kubectl::new(runner, None));

        let observed = provider.observe(&spec()).await.unwrap();
        assert!(observed.is_ready());
        assert_eq!(
            observed.get_attribute::<String>("hostname").as_deref(),
            Some("a1b2.elb.us-west-2.amazonaws.com")
        );
    }

    #[tokio::test]
    async fn test_cluster_ip_service_is_ready_immediately() {
        let runner = Arc::new(FakeRunner::new().on(
            "kubectl",
            "get service",
            CommandOutput::ok(r#"{"spec":{"type":"ClusterIP"},"status":{}}"#),
        ));
        let provider = NetworkProvider::new(Kubectl::new(runner, None));
        assert!(provider.observe(&spec()).await.unwrap().is_ready());
    }

    #[tokio::test]
    async fn test_missing_without_manifest_is_configuration_error() {
        let runner = Arc::new(FakeRunner::new());
        let provider = NetworkProvider::new(Kubectl::new(runner, None));

        let observed = provider.observe(&spec()).await.unwrap();
        let err = provider.apply(&spec(), &observed).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingConfiguration);
    }

    #[tokio::test]
    async fn test_manifest_is_applied_with_identity() {
        let runner = Arc::new(FakeRunner::new());
        let provider = NetworkProvider::new(Kubectl::new(runner.clone(), None));
        let spec = spec().with_parameter(
            "manifest",
            json!({"apiVersion": "v1", "kind": "Service", "spec": {"type": "LoadBalancer"}}),
        );

        let outcome = provider
            .apply(&spec, &ObservedState::absent())
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::created());

        let apply = &runner.calls_matching("apply")[0];
        let manifest: Value = serde_json::from_str(apply.stdin.as_deref().unwrap()).unwrap();
        assert_eq!(manifest["metadata"]["name"], json!("ingress-nginx-controller"));
        assert_eq!(manifest["metadata"]["namespace"], json!("ingress"));
    }

    #[tokio::test]
    async fn test_delete_leaves_unmanaged_objects() {
        let runner = Arc::new(FakeRunner::new());
        let provider = NetworkProvider::new(Kubectl::new(runner.clone(), None));

        assert_eq!(
            provider.delete(&spec()).await.unwrap(),
            DeleteOutcome::AlreadyAbsent
        );
        assert!(runner.calls().is_empty());
    }
}
