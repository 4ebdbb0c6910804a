//! EKS cluster provider (eksctl)
//!
//! Parameters: `name`, `region` (required), `version`, `nodegroup`
//! (default `workers`), `node_type` (default `m5.large`), `nodes` (default 2).

use crate::error::KubeError;
use crate::tools::{Aws, ClusterConfig, Eksctl};
use async_trait::async_trait;
use serde_json::json;
use stackflow_cloud::{
    ApplyOutcome, AuthStatus, DeleteOutcome, ObservedState, ReadyCondition, ResourceProvider,
    ResourceSpec, Result,
};

const DEFAULT_NODEGROUP: &str = "workers";
const DEFAULT_NODE_TYPE: &str = "m5.large";
const DEFAULT_NODES: u32 = 2;

pub struct ClusterProvider {
    eksctl: Eksctl,
    aws: Aws,
}

impl ClusterProvider {
    pub fn new(eksctl: Eksctl, aws: Aws) -> Self {
        Self { eksctl, aws }
    }

    fn config(spec: &ResourceSpec) -> Result<ClusterConfig> {
        Ok(ClusterConfig {
            name: spec.name().to_string(),
            region: spec.require_param("region")?,
            version: spec.get_param("version"),
            nodegroup: nodegroup(spec),
            node_type: spec
                .get_param("node_type")
                .unwrap_or_else(|| DEFAULT_NODE_TYPE.to_string()),
            nodes: spec.get_param("nodes").unwrap_or(DEFAULT_NODES),
        })
    }
}

fn nodegroup(spec: &ResourceSpec) -> String {
    spec.get_param("nodegroup")
        .unwrap_or_else(|| DEFAULT_NODEGROUP.to_string())
}

fn ready_condition(status: &str) -> ReadyCondition {
    match status {
        "ACTIVE" => ReadyCondition::Ready,
        "FAILED" => ReadyCondition::Failed,
        "" => ReadyCondition::Unknown,
        _ => ReadyCondition::Pending,
    }
}

#[async_trait]
impl ResourceProvider for ClusterProvider {
    fn name(&self) -> &str {
        "eksctl"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        if !self.eksctl.is_installed() {
            return Ok(AuthStatus::failed(KubeError::ToolNotFound("eksctl".into()).to_string()));
        }
        match self.aws.caller_identity().await {
            Ok(identity) => Ok(AuthStatus::ok(format!(
                "{} ({})",
                identity.arn, identity.account
            ))),
            Err(e) => Ok(AuthStatus::failed(e.to_string())),
        }
    }

    async fn observe(&self, spec: &ResourceSpec) -> Result<ObservedState> {
        let region: String = spec.require_param("region")?;
        let Some(cluster) = self.eksctl.get_cluster(spec.name(), &region).await? else {
            return Ok(ObservedState::absent());
        };

        let ready = ready_condition(&cluster.status);
        let mut state = ObservedState::present(ready)
            .with_attribute("name", json!(cluster.name))
            .with_attribute("region", json!(region))
            .with_attribute("status", json!(cluster.status));
        if !cluster.version.is_empty() {
            state = state.with_attribute("version", json!(cluster.version));
        }
        if let Some(endpoint) = cluster.endpoint {
            state = state.with_attribute("endpoint", json!(endpoint));
        }

        if ready == ReadyCondition::Ready {
            let wanted = nodegroup(spec);
            let groups = self.eksctl.get_nodegroups(spec.name(), &region).await?;
            if let Some(group) = groups.into_iter().find(|g| g.name == wanted) {
                state = state
                    .with_attribute("nodes", json!(group.desired_capacity))
                    .with_attribute("node_type", json!(group.instance_type));
            }
        }

        Ok(state)
    }

    async fn apply(&self, spec: &ResourceSpec, observed: &ObservedState) -> Result<ApplyOutcome> {
        let config = Self::config(spec)?;

        if !observed.exists {
            tracing::info!(
                "Creating EKS cluster {} in {} (this takes a while)",
                config.name,
                config.region
            );
            self.eksctl.create_cluster(&config).await?;
            self.eksctl
                .write_kubeconfig(&config.name, &config.region)
                .await?;
            return Ok(ApplyOutcome::created());
        }

        let drift = spec.drift(observed);
        if drift.is_empty() {
            return Ok(ApplyOutcome::skipped());
        }
        // The node count is the only thing eksctl changes in place
        if let Some(field) = drift.iter().find(|k| k.as_str() != "nodes") {
            return Err(KubeError::ImmutableField {
                resource: spec.id.clone(),
                field: field.clone(),
            }
            .into());
        }

        tracing::info!(
            "Scaling nodegroup {} of {} to {} nodes",
            config.nodegroup,
            config.name,
            config.nodes
        );
        self.eksctl
            .scale_nodegroup(&config.name, &config.region, &config.nodegroup, config.nodes)
            .await?;
        Ok(ApplyOutcome::updated())
    }

    async fn delete(&self, spec: &ResourceSpec) -> Result<DeleteOutcome> {
        let region: String = spec.require_param("region")?;
        if self.eksctl.delete_cluster(spec.name(), &region).await? {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::AlreadyAbsent)
        }
    }
}
