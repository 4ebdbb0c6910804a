//! Generated secret provider (kubectl)
//!
//! Parameters: `name`, `namespace`, `keys` (generated keys, default
//! `["password"]`), `length` (default 24), `literals` (fixed key/value pairs).
//!
//! Generated values are created once and never rotated; later runs only fill
//! in keys that are missing.

use super::namespace_of;
use crate::tools::Kubectl;
use async_trait::async_trait;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::{Map, Value, json};
use stackflow_cloud::{
    ApplyOutcome, DeleteOutcome, ObservedState, ReadyCondition, ResourceProvider, ResourceSpec,
    Result,
};
use std::collections::BTreeMap;

const DEFAULT_LENGTH: usize = 24;

/// First line marks existence so an empty secret is still observed
const MARKER: &str = "exists";
const TEMPLATE: &str =
    "exists\n{{range $k, $v := .data}}{{$k}}={{$v | base64decode}}\n{{end}}";

pub struct SecretProvider {
    kubectl: Kubectl,
}

impl SecretProvider {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }

    async fn read(&self, spec: &ResourceSpec) -> Result<Option<BTreeMap<String, String>>> {
        let Some(rendered) = self
            .kubectl
            .get_template("secret", spec.name(), Some(&namespace_of(spec)), TEMPLATE)
            .await?
        else {
            return Ok(None);
        };

        let mut lines = rendered.lines();
        if lines.next().map(str::trim) != Some(MARKER) {
            return Ok(None);
        }
        let data = lines
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Ok(Some(data))
    }
}

fn keys(spec: &ResourceSpec) -> Vec<String> {
    spec.get_param("keys")
        .unwrap_or_else(|| vec!["password".to_string()])
}

fn literals(spec: &ResourceSpec) -> Map<String, Value> {
    spec.get_param("literals").unwrap_or_default()
}

fn generate(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Literal values as strings, the way they are stored
fn literal_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ResourceProvider for SecretProvider {
    fn name(&self) -> &str {
        "kubectl"
    }

    async fn observe(&self, spec: &ResourceSpec) -> Result<ObservedState> {
        let Some(data) = self.read(spec).await? else {
            return Ok(ObservedState::absent());
        };

        let present: Vec<String> = keys(spec)
            .into_iter()
            .filter(|k| data.contains_key(k))
            .collect();
        let observed_literals: Map<String, Value> = literals(spec)
            .keys()
            .filter_map(|k| data.get(k).map(|v| (k.clone(), json!(v))))
            .collect();

        let mut state = ObservedState::present(ReadyCondition::Ready)
            .with_attribute("name", json!(spec.name()))
            .with_attribute("namespace", json!(namespace_of(spec)))
            .with_attribute("keys", json!(present))
            .with_attribute("literals", Value::Object(observed_literals));
        for (key, value) in data {
            state = state.with_attribute(key, json!(value));
        }
        Ok(state)
    }

    async fn apply(&self, spec: &ResourceSpec, observed: &ObservedState) -> Result<ApplyOutcome> {
        let length = spec.get_param("length").unwrap_or(DEFAULT_LENGTH);
        let literals = literals(spec);

        // Existing values are never regenerated
        let generated: BTreeMap<String, String> = keys(spec)
            .into_iter()
            .filter(|k| !literals.contains_key(k) && !observed.attributes.contains_key(k))
            .map(|k| (k, generate(length)))
            .collect();

        let literals_changed = literals.iter().any(|(k, v)| {
            observed.get_attribute::<String>(k).as_deref() != Some(literal_string(v).as_str())
        });
        if observed.exists && generated.is_empty() && !literals_changed {
            return Ok(ApplyOutcome::skipped());
        }

        let mut string_data: Map<String, Value> = generated
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        for (key, value) in &literals {
            string_data.insert(key.clone(), json!(literal_string(value)));
        }

        let namespace = namespace_of(spec);
        let mut outcome = if observed.exists {
            tracing::info!(
                "Updating secret {}/{} ({} generated keys)",
                namespace,
                spec.name(),
                generated.len()
            );
            self.kubectl
                .patch(
                    "secret",
                    spec.name(),
                    Some(&namespace),
                    &json!({ "stringData": string_data }),
                )
                .await?;
            ApplyOutcome::updated()
        } else {
            tracing::info!("Creating secret {}/{}", namespace, spec.name());
            self.kubectl
                .apply(&json!({
                    "apiVersion": "v1",
                    "kind": "Secret",
                    "type": "Opaque",
                    "metadata": { "name": spec.name(), "namespace": namespace },
                    "stringData": string_data,
                }))
                .await?;
            ApplyOutcome::created()
        };

        for (key, value) in generated {
            outcome = outcome.with_attribute(key, json!(value));
        }
        Ok(outcome)
    }

    async fn delete(&self, spec: &ResourceSpec) -> Result<DeleteOutcome> {
        if self
            .kubectl
            .delete("secret", spec.name(), Some(&namespace_of(spec)))
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
    use stackflow_cloud::{ReconcileAction, ResourceKind};
    use std::sync::Arc;

    fn spec() -> ResourceSpec {
        ResourceSpec::new("creds", ResourceKind::Secret)
            .with_parameter("name", json!("elastic-creds"))
            .with_parameter("namespace", json!("elastic"))
            .with_parameter("keys", json!(["password"]))
            .with_parameter("literals", json!({"username": "elastic"}))
    }

    #[tokio::test]
    async fn test_create_generates_password() {
        let runner = Arc::new(FakeRunner::new());
        let provider = SecretProvider::new(Kubectl::new(runner.clone(), None));

        let observed = provider.observe(&spec()).await.unwrap();
        assert!(!observed.exists);
        let outcome = provider.apply(&spec(), &observed).await.unwrap();

        assert_eq!(outcome.action, ReconcileAction::Created);
        let password = outcome.attributes["password"].as_str().unwrap().to_string();
        assert_eq!(password.len(), DEFAULT_LENGTH);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));

        let apply = &runner.calls_matching("apply")[0];
        let manifest: Value = serde_json::from_str(apply.stdin.as_deref().unwrap()).unwrap();
        assert_eq!(manifest["stringData"]["password"], json!(password));
        assert_eq!(manifest["stringData"]["username"], json!("elastic"));
    }

    #[tokio::test]
    async fn test_existing_secret_is_not_regenerated() {
        let runner = Arc::new(FakeRunner::new().on(
            "kubectl",
            "get secret elastic-creds -n elastic",
            CommandOutput::ok("exists\npassword=s3cr3tvalue\nusername=elastic\n"),
        ));
        let provider = SecretProvider::new(Kubectl::new(runner.clone(), None));

        let observed = provider.observe(&spec()).await.unwrap();
        assert!(observed.is_ready());
        assert!(spec().matches(&observed));
        assert_eq!(
            observed.get_attribute::<String>("password").as_deref(),
            Some("s3cr3tvalue")
        );

        let outcome = provider.apply(&spec(), &observed).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::skipped());
        assert!(runner.calls_matching("apply").is_empty());
        assert!(runner.calls_matching("patch").is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_is_patched_in() {
        let runner = Arc::new(FakeRunner::new().on(
            "kubectl",
            "get secret",
            CommandOutput::ok("exists\npassword=s3cr3tvalue\nusername=elastic\n"),
        ));
        let provider = SecretProvider::new(Kubectl::new(runner.clone(), None));
        let desired = spec().with_parameter("keys", json!(["password", "api_key"]));

        let observed = provider.observe(&desired).await.unwrap();
        assert_eq!(desired.drift(&observed), vec!["keys"]);
        let outcome = provider.apply(&desired, &observed).await.unwrap();

        assert_eq!(outcome.action, ReconcileAction::Updated);
        assert!(outcome.attributes.contains_key("api_key"));
        assert!(!outcome.attributes.contains_key("password"));

        let patch = &runner.calls_matching("patch secret elastic-creds")[0];
        let body: Value = serde_json::from_str(patch.stdin.as_deref().unwrap()).unwrap();
        assert!(body["stringData"]["api_key"].is_string());
        assert!(body["stringData"].get("password").is_none());
    }

    #[tokio::test]
    async fn test_changed_literal_is_patched() {
        let runner = Arc::new(FakeRunner::new().on(
            "kubectl",
            "get secret",
            CommandOutput::ok("exists\npassword=s3cr3tvalue\nusername=admin\n"),
        ));
        let provider = SecretProvider::new(Kubectl::new(runner.clone(), None));

        let observed = provider.observe(&spec()).await.unwrap();
        assert_eq!(spec().drift(&observed), vec!["literals"]);
        let outcome = provider.apply(&spec(), &observed).await.unwrap();

        assert_eq!(outcome.action, ReconcileAction::Updated);
        assert_eq!(runner.calls_matching("patch").len(), 1);
    }
}
