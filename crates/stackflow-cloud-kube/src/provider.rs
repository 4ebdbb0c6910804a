//! Resource providers backed by eksctl, kubectl and helm

mod certificate;
mod cluster;
mod namespace;
mod network;
mod release;
mod secret;

pub use certificate::CertificateProvider;
pub use cluster::ClusterProvider;
pub use namespace::NamespaceProvider;
pub use network::NetworkProvider;
pub use release::ReleaseProvider;
pub use secret::SecretProvider;

use crate::runner::{CommandRunner, SystemRunner};
use crate::tools::{Aws, Eksctl, Helm, Kubectl};
use stackflow_cloud::{ApplyOutcome, ObservedState, ProviderRegistry, ResourceKind, ResourceSpec};
use std::sync::Arc;

/// Namespace of a namespaced object; `default` when unset
pub(crate) fn namespace_of(spec: &ResourceSpec) -> String {
    spec.param_str("namespace").unwrap_or("default").to_string()
}

/// `Created` for a new object, `Updated` for an existing one
pub(crate) fn converged(observed: &ObservedState) -> ApplyOutcome {
    if observed.exists {
        ApplyOutcome::updated()
    } else {
        ApplyOutcome::created()
    }
}

/// Builds the provider for every resource kind
pub struct KubeProviders {
    runner: Arc<dyn CommandRunner>,
    context: Option<String>,
}

impl Default for KubeProviders {
    fn default() -> Self {
        Self::new(Arc::new(SystemRunner))
    }
}

impl KubeProviders {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            context: None,
        }
    }

    /// kubeconfig context used by kubectl and helm
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    fn kubectl(&self) -> Kubectl {
        Kubectl::new(self.runner.clone(), self.context.as_deref())
    }

    /// Registry with one provider per kind
    pub fn registry(&self) -> ProviderRegistry {
        let kubectl = self.kubectl();
        let helm = Helm::new(self.runner.clone(), self.context.as_deref());

        ProviderRegistry::new()
            .with(
                ResourceKind::Cluster,
                Arc::new(ClusterProvider::new(
                    Eksctl::new(self.runner.clone()),
                    Aws::new(self.runner.clone()),
                )),
            )
            .with(
                ResourceKind::Namespace,
                Arc::new(NamespaceProvider::new(kubectl.clone())),
            )
            .with(ResourceKind::Release, Arc::new(ReleaseProvider::new(helm)))
            .with(
                ResourceKind::Certificate,
                Arc::new(CertificateProvider::new(kubectl.clone())),
            )
            .with(
                ResourceKind::Network,
                Arc::new(NetworkProvider::new(kubectl.clone())),
            )
            .with(ResourceKind::Secret, Arc::new(SecretProvider::new(kubectl)))
    }
}
