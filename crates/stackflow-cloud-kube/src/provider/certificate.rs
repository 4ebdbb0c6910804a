//! cert-manager Certificate provider (kubectl)
//!
//! Parameters: `name`, `namespace`, `dns_names` (list) or `domain`, `issuer`
//! (required), `issuer_kind` (default `ClusterIssuer`), `secret_name`
//! (default `<name>-tls`).

use super::{converged, namespace_of};
use crate::tools::Kubectl;
use async_trait::async_trait;
use serde_json::{Value, json};
use stackflow_cloud::{
    ApplyOutcome, DeleteOutcome, ObservedState, ReadyCondition, ResourceProvider, ResourceSpec,
    Result,
};

const RESOURCE: &str = "certificate.cert-manager.io";

pub struct CertificateProvider {
    kubectl: Kubectl,
}

impl CertificateProvider {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }

    fn dns_names(spec: &ResourceSpec) -> Result<Vec<String>> {
        if let Some(names) = spec.get_param::<Vec<String>>("dns_names") {
            return Ok(names);
        }
        let domain: String = spec.require_param("domain")?;
        Ok(vec![domain])
    }

    fn secret_name(spec: &ResourceSpec) -> String {
        spec.get_param("secret_name")
            .unwrap_or_else(|| format!("{}-tls", spec.name()))
    }

    fn manifest(spec: &ResourceSpec) -> Result<Value> {
        let issuer: String = spec.require_param("issuer")?;
        let issuer_kind = spec
            .param_str("issuer_kind")
            .unwrap_or("ClusterIssuer")
            .to_string();

        Ok(json!({
            "apiVersion": "cert-manager.io/v1",
            "kind": "Certificate",
            "metadata": {
                "name": spec.name(),
                "namespace": namespace_of(spec),
            },
            "spec": {
                "secretName": Self::secret_name(spec),
                "dnsNames": Self::dns_names(spec)?,
                "issuerRef": { "name": issuer, "kind": issuer_kind },
            },
        }))
    }
}

/// Readiness from the `Ready` and `Issuing` conditions
fn ready_condition(object: &Value) -> ReadyCondition {
    let conditions = object["status"]["conditions"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    let find = |kind: &str| {
        conditions
            .iter()
            .find(|c| c["type"].as_str() == Some(kind))
            .cloned()
    };

    if find("Ready").is_some_and(|c| c["status"] == "True") {
        return ReadyCondition::Ready;
    }
    if find("Issuing")
        .is_some_and(|c| c["status"] == "False" && c["reason"] == "Failed")
    {
        return ReadyCondition::Failed;
    }
    ReadyCondition::Pending
}

#[async_trait]
impl ResourceProvider for CertificateProvider {
    fn name(&self) -> &str {
        "kubectl"
    }

    async fn observe(&self, spec: &ResourceSpec) -> Result<ObservedState> {
        let namespace = namespace_of(spec);
        let Some(object) = self
            .kubectl
            .get(RESOURCE, spec.name(), Some(&namespace))
            .await?
        else {
            return Ok(ObservedState::absent());
        };

        let cert = &object["spec"];
        let mut state = ObservedState::present(ready_condition(&object))
            .with_attribute("name", json!(spec.name()))
            .with_attribute("namespace", json!(namespace))
            .with_attribute("dns_names", cert["dnsNames"].clone())
            .with_attribute("issuer", cert["issuerRef"]["name"].clone())
            .with_attribute(
                "issuer_kind",
                cert["issuerRef"]
                    .get("kind")
                    .cloned()
                    .unwrap_or_else(|| json!("Issuer")),
            )
            .with_attribute("secret_name", cert["secretName"].clone());
        if let Some([domain]) = cert["dnsNames"].as_array().map(Vec::as_slice) {
            state = state.with_attribute("domain", domain.clone());
        }
        if let Some(expiry) = object["status"]["notAfter"].as_str() {
            state = state.with_attribute("not_after", json!(expiry));
        }
        Ok(state)
    }

    async fn apply(&self, spec: &ResourceSpec, observed: &ObservedState) -> Result<ApplyOutcome> {
        if spec.matches(observed) {
            return Ok(ApplyOutcome::skipped());
        }
        self.kubectl.apply(&Self::manifest(spec)?).await?;
        Ok(converged(observed))
    }

    async fn delete(&self, spec: &ResourceSpec) -> Result<DeleteOutcome> {
        if self
            .kubectl
            .delete(RESOURCE, spec.name(), Some(&namespace_of(spec)))
            .await?
        {
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
        ResourceSpec::new("cert", ResourceKind::Certificate)
            .with_parameter("name", json!("search"))
            .with_parameter("namespace", json!("elastic"))
            .with_parameter("domain", json!("search.example.com"))
            .with_parameter("issuer", json!("letsencrypt-prod"))
    }

    fn certificate(conditions: Value) -> String {
        json!({
            "spec": {
                "dnsNames": ["search.example.com"],
                "issuerRef": {"name": "letsencrypt-prod", "kind": "ClusterIssuer"},
                "secretName": "search-tls",
            },
            "status": {"conditions": conditions},
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_issued_certificate_is_ready_and_matches() {
        let runner = Arc::new(FakeRunner::new().on(
            "kubectl",
            "get certificate.cert-manager.io search -n elastic",
            CommandOutput::ok(certificate(json!([{"type": "Ready", "status": "True"}]))),
        ));
        let provider = CertificateProvider::new(Kubectl::new(runner, None));

        let observed = provider.observe(&spec()).await.unwrap();
        assert!(observed.is_ready());
        assert!(spec().matches(&observed));
    }

    #[tokio::test]
    async fn test_issuing_failure_is_failed_condition() {
        let runner = Arc::new(FakeRunner::new().on(
            "kubectl",
            "get certificate",
            CommandOutput::ok(certificate(json!([
                {"type": "Ready", "status": "False", "reason": "DoesNotExist"},
                {"type": "Issuing", "status": "False", "reason": "Failed"},
            ]))),
        ));
        let provider = CertificateProvider::new(Kubectl::new(runner, None));
        let observed = provider.observe(&spec()).await.unwrap();
        assert_eq!(observed.ready, ReadyCondition::Failed);
    }

    #[tokio::test]
    async fn test_apply_builds_manifest() {
        let runner = Arc::new(FakeRunner::new());
        let provider = CertificateProvider::new(Kubectl::new(runner.clone(), None));

        let outcome = provider
            .apply(&spec(), &ObservedState::absent())
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::created());

        let apply = &runner.calls_matching("apply")[0];
        let manifest: Value = serde_json::from_str(apply.stdin.as_deref().unwrap()).unwrap();
        assert_eq!(manifest["spec"]["dnsNames"], json!(["search.example.com"]));
        assert_eq!(manifest["spec"]["secretName"], json!("search-tls"));
        assert_eq!(manifest["spec"]["issuerRef"]["kind"], json!("ClusterIssuer"));
    }

    #[tokio::test]
    async fn test_missing_issuer_is_configuration_error() {
        let runner = Arc::new(FakeRunner::new());
        let provider = CertificateProvider::new(Kubectl::new(runner, None));
        let spec = ResourceSpec::new("cert", ResourceKind::Certificate)
            .with_parameter("domain", json!("search.example.com"));

        let err = provider
            .apply(&spec, &ObservedState::absent())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingConfiguration);
    }
}
