//! EKS, Kubernetes and Helm providers for StackFlow
//!
//! This crate implements [`stackflow_cloud::ResourceProvider`] for every
//! resource kind by driving the `eksctl`, `kubectl`, `helm` and `aws` CLIs.
//!
//! | Kind          | Tool    | Managed object                       |
//! |---------------|---------|--------------------------------------|
//! | `cluster`     | eksctl  | EKS cluster and managed node group   |
//! | `namespace`   | kubectl | Namespace                            |
//! | `release`     | helm    | Helm release                         |
//! | `certificate` | kubectl | cert-manager Certificate             |
//! | `network`     | kubectl | LoadBalancer Service or Ingress      |
//! | `secret`      | kubectl | Secret with generated values         |
//!
//! # Requirements
//!
//! - The CLIs above must be installed and on `PATH`
//! - Credentials come from the usual AWS profile and kubeconfig
//!
//! # Example
//!
//! ```ignore
//! use stackflow_cloud::Reconciler;
//! use stackflow_cloud_kube::KubeProviders;
//!
//! let registry = KubeProviders::default()
//!     .with_context(Some("search".into()))
//!     .registry();
//! let report = Reconciler::new(registry).reconcile(&plan).await;
//! ```

pub mod error;
pub mod provider;
pub mod runner;
pub mod tools;

pub use error::{KubeError, Result};
pub use provider::{
    CertificateProvider, ClusterProvider, KubeProviders, NamespaceProvider, NetworkProvider,
    ReleaseProvider, SecretProvider,
};
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
pub use tools::{Aws, Eksctl, Helm, Kubectl};
