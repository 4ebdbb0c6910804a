//! StackFlow reconciler core
//!
//! This crate provides an idempotent, dependency-ordered infrastructure
//! reconciler: check current state, converge to desired state, tolerate
//! partial completion, retry transient failures.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  StackFlow CLI                   │
//! │            (stack deploy / cleanup)              │
//! └─────────────────┬───────────────────────────────┘
//!                   │ Plan
//! ┌─────────────────▼───────────────────────────────┐
//! │                stackflow-cloud                   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │   Reconciler (graph walk, worker pool)   │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │  WaitPolicy  │  │    Report    │            │
//! │  └──────────────┘  └──────────────┘            │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │     trait ResourceProvider { ... }        │   │
//! │  └──────────────────────────────────────────┘   │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │ eksctl/kubectl│ │   in-memory   │
//! │  /helm (kube) │ │   provider    │
//! └───────────────┘ └───────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use stackflow_cloud::{InMemoryProvider, Plan, Reconciler, ResourceKind, ResourceSpec};
//! use std::sync::Arc;
//!
//! let provider = Arc::new(InMemoryProvider::new());
//! let plan = Plan::new(vec![
//!     ResourceSpec::new("c1", ResourceKind::Cluster),
//!     ResourceSpec::new("n1", ResourceKind::Namespace).with_dependency("c1"),
//! ])?;
//!
//! let report = Reconciler::new(provider.registry()).reconcile(&plan).await;
//! println!("{}", report.summary);
//! ```

pub mod action;
pub mod error;
pub mod memory;
pub mod plan;
pub mod provider;
pub mod reconciler;
pub mod report;
pub mod retry;
pub mod spec;
pub mod state;
pub mod wait;

// Re-exports
pub use action::{
    ApplyOutcome, ChangeSummary, ChangeType, DeleteOutcome, PlannedChange, ReconcileAction,
    ReconcileResult,
};
pub use error::{CloudError, ErrorKind, Result};
pub use memory::{InMemoryProvider, ProviderCall};
pub use plan::Plan;
pub use provider::{AuthStatus, ProviderRegistry, ResourceProvider};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use report::{Issue, Report, ReportSummary, RunMode, RunStatus, Severity, is_sensitive, mask};
pub use retry::{RetryConfig, retry_transient};
pub use spec::{ObservedState, Parameters, ReadyCondition, ResourceKind, ResourceSpec};
pub use state::{StateLock, StateManager};
pub use wait::{WaitOutcome, WaitPolicy};

pub use tokio_util::sync::CancellationToken;
