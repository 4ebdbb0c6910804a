//! Resource provider trait definition

use crate::action::{ApplyOutcome, DeleteOutcome};
use crate::error::{CloudError, Result};
use crate::spec::{ObservedState, ResourceKind, ResourceSpec};
use crate::wait::{WaitOutcome, WaitPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Resource provider abstraction trait
///
/// One implementation per resource kind (cluster API, package-release
/// manager, certificate authority, ...). Implementations must be idempotent:
/// `apply` on a resource that already matches returns `Skipped` without
/// issuing a mutating call.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Returns the provider name (e.g., "eksctl", "helm")
    fn name(&self) -> &str;

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> Result<AuthStatus> {
        Ok(AuthStatus::ok(self.name()))
    }

    /// Observe the current state of the resource described by `spec`.
    ///
    /// Must be side-effect free. A missing resource is `ObservedState::absent()`,
    /// not an error.
    async fn observe(&self, spec: &ResourceSpec) -> Result<ObservedState>;

    /// Converge the resource to `spec`, given what `observe` returned.
    ///
    /// Returns `ImmutableFieldConflict` instead of recreating when a drifted
    /// field cannot be changed in place.
    async fn apply(&self, spec: &ResourceSpec, observed: &ObservedState) -> Result<ApplyOutcome>;

    /// Delete the resource; a missing resource is `AlreadyAbsent`
    async fn delete(&self, spec: &ResourceSpec) -> Result<DeleteOutcome>;

    /// Wait until the resource is usable by dependents
    async fn await_ready(
        &self,
        spec: &ResourceSpec,
        policy: &WaitPolicy,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome> {
        policy.wait(cancel, || self.observe(spec)).await
    }
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Providers indexed by the resource kind they manage
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<ResourceKind, Arc<dyn ResourceProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` for `kind`, replacing any previous one
    pub fn register(&mut self, kind: ResourceKind, provider: Arc<dyn ResourceProvider>) {
        tracing::debug!("Registered provider {} for {}", provider.name(), kind);
        self.providers.insert(kind, provider);
    }

    pub fn with(mut self, kind: ResourceKind, provider: Arc<dyn ResourceProvider>) -> Self {
        self.register(kind, provider);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Result<Arc<dyn ResourceProvider>> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| CloudError::ProviderNotFound(kind.to_string()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.providers.keys().copied()
    }

    /// Check authentication of every distinct provider used by `kinds`
    pub async fn check_auth(
        &self,
        kinds: impl IntoIterator<Item = ResourceKind>,
    ) -> Result<Vec<(String, AuthStatus)>> {
        let mut seen = std::collections::BTreeSet::new();
        let mut statuses = Vec::new();
        for kind in kinds {
            let provider = self.get(kind)?;
            if !seen.insert(provider.name().to_string()) {
                continue;
            }
            let status = provider.check_auth().await?;
            statuses.push((provider.name().to_string(), status));
        }
        Ok(statuses)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.providers.iter().map(|(k, p)| (k, p.name())))
            .finish()
    }
}
