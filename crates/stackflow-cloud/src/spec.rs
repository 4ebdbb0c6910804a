//! Desired and observed state model for managed resources

use crate::error::{CloudError, Result};
use crate::wait::WaitPolicy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

/// Resource parameters and attributes, ordered for stable output
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// `{{ spec-id.attribute }}` reference to an output of another spec
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_-]+)\.([A-Za-z0-9_.-]+)\s*\}\}").unwrap()
});

/// Kind of externally managed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Managed Kubernetes cluster
    Cluster,
    /// Namespace inside a cluster
    Namespace,
    /// Package release (helm chart)
    Release,
    /// TLS certificate issued by a certificate authority
    Certificate,
    /// Network object: load balancer service, ingress
    Network,
    /// Generated credentials
    Secret,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Cluster,
        ResourceKind::Namespace,
        ResourceKind::Release,
        ResourceKind::Certificate,
        ResourceKind::Network,
        ResourceKind::Secret,
    ];

    /// Whether the resource becomes usable some time after the mutating call returns
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            ResourceKind::Cluster
                | ResourceKind::Release
                | ResourceKind::Certificate
                | ResourceKind::Network
        )
    }

    /// Whether a readiness timeout fails the spec when the plan does not say
    pub fn default_required_ready(&self) -> bool {
        matches!(self, ResourceKind::Cluster)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Cluster => write!(f, "cluster"),
            ResourceKind::Namespace => write!(f, "namespace"),
            ResourceKind::Release => write!(f, "release"),
            ResourceKind::Certificate => write!(f, "certificate"),
            ResourceKind::Network => write!(f, "network"),
            ResourceKind::Secret => write!(f, "secret"),
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.to_string() == s.to_lowercase())
            .ok_or_else(|| CloudError::InvalidPlan(format!("unknown resource kind '{}'", s)))
    }
}

/// Declarative description of one resource and its dependencies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Unique identifier within a plan
    pub id: String,

    /// Resource kind, selects the provider
    pub kind: ResourceKind,

    /// Desired parameters
    #[serde(default)]
    pub parameters: Parameters,

    /// Ids of specs that must be ready before this one is applied
    #[serde(default)]
    pub depends_on: BTreeSet<String>,

    /// Whether a readiness timeout fails this spec (defaults per kind)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_ready: Option<bool>,

    /// Readiness wait override (defaults per kind)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitPolicy>,
}

impl ResourceSpec {
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            parameters: Parameters::new(),
            depends_on: BTreeSet::new(),
            required_ready: None,
            wait: None,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    pub fn with_required_ready(mut self, required: bool) -> Self {
        self.required_ready = Some(required);
        self
    }

    pub fn with_wait(mut self, policy: WaitPolicy) -> Self {
        self.wait = Some(policy);
        self
    }

    /// Effective `required_ready` flag
    pub fn is_required(&self) -> bool {
        self.required_ready
            .unwrap_or_else(|| self.kind.default_required_ready())
    }

    /// Whether dependents have to wait for readiness, not just existence
    pub fn needs_wait(&self) -> bool {
        self.wait.is_some() || self.kind.is_async()
    }

    /// Effective wait policy
    pub fn wait_policy(&self) -> WaitPolicy {
        self.wait
            .clone()
            .unwrap_or_else(|| WaitPolicy::for_kind(self.kind))
    }

    /// External name of the resource; falls back to the spec id
    pub fn name(&self) -> &str {
        self.param_str("name").unwrap_or(&self.id)
    }

    /// Get a parameter as a specific type
    pub fn get_param<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.parameters
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    /// Get a parameter that the provider cannot work without
    pub fn require_param<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get_param(key).ok_or_else(|| {
            CloudError::MissingConfiguration(format!(
                "{} '{}' requires parameter '{}'",
                self.kind, self.id, key
            ))
        })
    }

    /// Desired keys whose observed value differs.
    ///
    /// Only keys the provider reports are compared; unreported keys are write-only.
    pub fn drift(&self, observed: &ObservedState) -> Vec<String> {
        self.parameters
            .iter()
            .filter_map(|(key, desired)| match observed.attributes.get(key) {
                Some(actual) if !values_match(desired, actual) => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether the observation already satisfies this spec
    pub fn matches(&self, observed: &ObservedState) -> bool {
        observed.exists && self.drift(observed).is_empty()
    }

    /// Spec ids referenced through `{{ id.attribute }}` in parameters
    pub fn referenced_specs(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        for value in self.parameters.values() {
            collect_references(value, &mut ids);
        }
        ids
    }

    /// Replace `{{ id.attribute }}` references with outputs of reconciled specs
    pub fn resolve_references(&self, outputs: &HashMap<String, Parameters>) -> Result<Self> {
        let mut resolved = self.clone();
        for value in resolved.parameters.values_mut() {
            *value = resolve_value(value, outputs, &self.id)?;
        }
        Ok(resolved)
    }
}

/// Numbers and strings compare loosely: "3" and 3 are the same node count
fn values_match(desired: &serde_json::Value, actual: &serde_json::Value) -> bool {
    use serde_json::Value;
    match (desired, actual) {
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s == &n.to_string()
        }
        _ => desired == actual,
    }
}

fn collect_references(value: &serde_json::Value, ids: &mut BTreeSet<String>) {
    match value {
        serde_json::Value::String(s) => {
            for caps in REFERENCE.captures_iter(s) {
                ids.insert(caps[1].to_string());
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_references(item, ids);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_references(item, ids);
            }
        }
        _ => {}
    }
}

fn lookup_output<'a>(
    outputs: &'a HashMap<String, Parameters>,
    spec_id: &str,
    key: &str,
    owner: &str,
) -> Result<&'a serde_json::Value> {
    outputs
        .get(spec_id)
        .and_then(|attrs| attrs.get(key))
        .ok_or_else(|| {
            CloudError::MissingConfiguration(format!(
                "'{}' references {}.{} which has no such output",
                owner, spec_id, key
            ))
        })
}

fn resolve_value(
    value: &serde_json::Value,
    outputs: &HashMap<String, Parameters>,
    owner: &str,
) -> Result<serde_json::Value> {
    use serde_json::Value;
    match value {
        Value::String(s) => {
            // A value that is exactly one reference keeps the output's JSON type
            if let Some(caps) = REFERENCE.captures(s) {
                if caps[0].len() == s.len() {
                    return lookup_output(outputs, &caps[1], &caps[2], owner).cloned();
                }
            }

            let mut result = String::with_capacity(s.len());
            let mut last = 0;
            for caps in REFERENCE.captures_iter(s) {
                let Some(whole) = caps.get(0) else { continue };
                result.push_str(&s[last..whole.start()]);
                match lookup_output(outputs, &caps[1], &caps[2], owner)? {
                    Value::String(text) => result.push_str(text),
                    other => result.push_str(&other.to_string()),
                }
                last = whole.end();
            }
            result.push_str(&s[last..]);
            Ok(Value::String(result))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, outputs, owner))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = serde_json::Map::new();
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_value(item, outputs, owner)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

/// Readiness reported by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyCondition {
    #[default]
    Unknown,
    Pending,
    Ready,
    Failed,
}

impl std::fmt::Display for ReadyCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadyCondition::Unknown => write!(f, "unknown"),
            ReadyCondition::Pending => write!(f, "pending"),
            ReadyCondition::Ready => write!(f, "ready"),
            ReadyCondition::Failed => write!(f, "failed"),
        }
    }
}

/// Current state of a resource as seen by its provider.
///
/// Produced fresh on every observation and never cached across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    pub exists: bool,
    pub attributes: Parameters,
    pub ready: ReadyCondition,
}

impl ObservedState {
    /// The resource does not exist; a normal observation, not an error
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn present(ready: ReadyCondition) -> Self {
        Self {
            exists: true,
            attributes: Parameters::new(),
            ready,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_attributes(mut self, attributes: Parameters) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn get_attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn is_ready(&self) -> bool {
        self.exists && self.ready == ReadyCondition::Ready
    }
}
