//! Plan file document

use crate::error::{ConfigError, Result};
use crate::template::Context;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use stackflow_cloud::{Plan, ReconcilerConfig, ResourceSpec};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A parsed plan file with templates expanded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanDocument {
    /// Plan name shown in reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Reconciler settings
    #[serde(default)]
    pub settings: ReconcilerConfig,

    /// Variables referenced as `{{ name }}`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, Value>,

    /// Resource specs, in declaration order
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,

    /// Where the document was loaded from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl PlanDocument {
    /// Validate the resources into an executable plan
    pub fn to_plan(&self) -> Result<Plan> {
        Ok(Plan::new(self.resources.clone())?)
    }

    /// Display name: the `name` field, else the file stem
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| {
                self.source
                    .as_ref()
                    .and_then(|p| p.file_stem())
                    .map(|s| s.to_string_lossy().trim_start_matches('.').to_string())
            })
            .unwrap_or_else(|| "stack".to_string())
    }
}

/// Load and expand a plan file
pub fn load_plan_file(path: &Path) -> Result<PlanDocument> {
    tracing::debug!("Loading plan file: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let mut document = parse_plan(&content).map_err(|e| match e {
        ConfigError::Parse { message, .. } => ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    })?;
    document.source = Some(path.to_path_buf());
    Ok(document)
}

/// Parse plan YAML and expand `{{ ... }}` templates
pub fn parse_plan(content: &str) -> Result<PlanDocument> {
    let parse_error = |e: serde_yaml::Error| ConfigError::Parse {
        path: PathBuf::from("<plan>"),
        message: e.to_string(),
    };

    let raw: Value = serde_yaml::from_str(content).map_err(parse_error)?;
    let Value::Mapping(mut root) = raw else {
        return Err(ConfigError::Parse {
            path: PathBuf::from("<plan>"),
            message: "expected a mapping at the top level".to_string(),
        });
    };

    // variables may themselves read the environment, but not other variables
    let empty = BTreeMap::new();
    let mut variables = BTreeMap::new();
    if let Some(Value::Mapping(raw_vars)) = root.get("variables") {
        let env_only = Context::new(&empty);
        for (key, value) in raw_vars {
            let Some(name) = key.as_str() else {
                continue;
            };
            variables.insert(name.to_string(), env_only.expand(value)?);
        }
    }

    let context = Context::new(&variables);
    for key in ["name", "settings", "resources"] {
        if let Some(value) = root.get(key) {
            let expanded = context.expand(value)?;
            root.insert(Value::String(key.to_string()), expanded);
        }
    }
    root.insert(
        Value::String("variables".to_string()),
        serde_yaml::to_value(&variables).map_err(parse_error)?,
    );

    let document: PlanDocument =
        serde_yaml::from_value(Value::Mapping(root)).map_err(parse_error)?;
    tracing::debug!(
        "Parsed plan with {} resources and {} variables",
        document.resources.len(),
        document.variables.len()
    );
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stackflow_cloud::ResourceKind;

    const SEARCH_STACK: &str = r#"
name: search-stack
settings:
  concurrency: 2
  retry: { max_attempts: 5, initial_delay_ms: 500 }
variables:
  namespace: elastic
  nodes: 3
resources:
  - id: cluster
    kind: cluster
    parameters:
      name: "{{ env.STACKFLOW_TEST_CLUSTER_NAME | search-cluster }}"
      region: us-west-2
      nodes: "{{ nodes }}"
  - id: ns
    kind: namespace
    depends_on: [cluster]
    parameters: { name: "{{ namespace }}" }
  - id: ingress-nginx
    kind: release
    depends_on: [ns]
    parameters:
      chart: ingress-nginx/ingress-nginx
      namespace: "{{ namespace }}"
  - id: lb
    kind: network
    depends_on: [ingress-nginx]
    required_ready: true
    wait: { poll_interval_ms: 1000, timeout_ms: 60000 }
    parameters: { service: ingress-nginx-controller, namespace: "{{ namespace }}" }
  - id: cert
    kind: certificate
    depends_on: [lb]
    parameters: { target: "{{ lb.hostname }}" }
"#;

    #[test]
    fn test_parse_search_stack() {
        let doc = temp_env::with_var_unset("STACKFLOW_TEST_CLUSTER_NAME", || {
            parse_plan(SEARCH_STACK).unwrap()
        });

        assert_eq!(doc.name.as_deref(), Some("search-stack"));
        assert_eq!(doc.settings.concurrency, 2);
        assert_eq!(doc.settings.retry.max_attempts, 5);
        assert_eq!(doc.settings.retry.max_delay_ms, 30000);
        assert_eq!(doc.resources.len(), 5);

        let cluster = &doc.resources[0];
        assert_eq!(cluster.kind, ResourceKind::Cluster);
        assert_eq!(cluster.parameters["name"], json!("search-cluster"));
        assert_eq!(cluster.parameters["nodes"], json!(3));

        let lb = &doc.resources[3];
        assert_eq!(lb.required_ready, Some(true));
        assert_eq!(lb.wait.as_ref().unwrap().timeout_ms, 60000);

        assert_eq!(doc.resources[4].parameters["target"], json!("{{ lb.hostname }}"));

        let plan = doc.to_plan().unwrap();
        assert_eq!(plan.ids(), vec!["cluster", "ns", "ingress-nginx", "lb", "cert"]);
    }

    #[test]
    fn test_env_overrides_default() {
        let doc = temp_env::with_var("STACKFLOW_TEST_CLUSTER_NAME", Some("prod-search"), || {
            parse_plan(SEARCH_STACK).unwrap()
        });
        assert_eq!(doc.resources[0].parameters["name"], json!("prod-search"));
    }

    #[test]
    fn test_defaults_when_sections_missing() {
        let doc = parse_plan("resources:\n  - { id: ns, kind: namespace }\n").unwrap();
        assert!(doc.name.is_none());
        assert_eq!(doc.settings, ReconcilerConfig::default());
        assert_eq!(doc.display_name(), "stack");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = parse_plan("resources:\n  - { id: db, kind: database }\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = parse_plan("resource:\n  - { id: ns, kind: namespace }\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_cycle_is_invalid_plan() {
        let doc = parse_plan(
            "resources:\n  - { id: a, kind: namespace, depends_on: [b] }\n  - { id: b, kind: namespace, depends_on: [a] }\n",
        )
        .unwrap();
        assert!(matches!(doc.to_plan(), Err(ConfigError::InvalidPlan(_))));
    }

    #[test]
    fn test_load_sets_source() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(".stack.local.yaml");
        std::fs::write(&path, "resources: []\n").unwrap();

        let doc = load_plan_file(&path).unwrap();
        assert_eq!(doc.source.as_deref(), Some(path.as_path()));
        assert_eq!(doc.display_name(), "stack.local");
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("stack.yaml");
        std::fs::write(&path, "resources: [ {").unwrap();

        match load_plan_file(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
