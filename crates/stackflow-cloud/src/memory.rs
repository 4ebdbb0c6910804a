//! In-memory resource provider
//!
//! A scriptable provider backed by a map instead of an external system.
//! Used to exercise the reconciler: injected failures, transient errors,
//! slow readiness, immutable fields and a log of every call made.

use crate::action::{ApplyOutcome, DeleteOutcome};
use crate::error::{CloudError, ErrorKind, Result};
use crate::provider::{ProviderRegistry, ResourceProvider};
use crate::spec::{ObservedState, Parameters, ReadyCondition, ResourceKind, ResourceSpec};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A call made against the provider, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Observe(String),
    Apply(String),
    Delete(String),
}

impl ProviderCall {
    pub fn spec_id(&self) -> &str {
        match self {
            ProviderCall::Observe(id) | ProviderCall::Apply(id) | ProviderCall::Delete(id) => id,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredResource {
    parameters: Parameters,
    polls_until_ready: u32,
}

#[derive(Default)]
struct World {
    resources: HashMap<String, StoredResource>,
    immutable_fields: HashSet<String>,
    apply_failures: HashMap<String, ErrorKind>,
    delete_failures: HashMap<String, ErrorKind>,
    transient_failures: HashMap<String, u32>,
    ready_after: HashMap<String, u32>,
    never_ready: HashSet<String>,
    failed_condition: HashSet<String>,
    outputs: HashMap<String, Parameters>,
    calls: Vec<ProviderCall>,
}

/// In-memory provider usable for any resource kind
pub struct InMemoryProvider {
    name: String,
    latency: Duration,
    world: Mutex<World>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self {
            name: "in-memory".to_string(),
            latency: Duration::ZERO,
            world: Mutex::new(World::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Simulated latency of every `apply`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Parameters that cannot be changed in place
    pub fn with_immutable_field(self, field: impl Into<String>) -> Self {
        self.world().immutable_fields.insert(field.into());
        self
    }

    /// A resource that already exists and is ready
    pub fn with_existing(self, spec: &ResourceSpec) -> Self {
        self.with_existing_parameters(&spec.id, spec.parameters.clone())
    }

    pub fn with_existing_parameters(self, id: &str, parameters: Parameters) -> Self {
        self.world().resources.insert(
            id.to_string(),
            StoredResource {
                parameters,
                polls_until_ready: 0,
            },
        );
        self
    }

    /// `apply` of `id` fails with `kind`
    pub fn fail_apply(self, id: &str, kind: ErrorKind) -> Self {
        self.world().apply_failures.insert(id.to_string(), kind);
        self
    }

    /// `delete` of `id` fails with `kind`
    pub fn fail_delete(self, id: &str, kind: ErrorKind) -> Self {
        self.world().delete_failures.insert(id.to_string(), kind);
        self
    }

    /// The next `count` observations of `id` fail with `ProviderUnavailable`
    pub fn transient_failures(self, id: &str, count: u32) -> Self {
        self.world()
            .transient_failures
            .insert(id.to_string(), count);
        self
    }

    /// After creation, `id` reports `Pending` for `polls` observations
    pub fn ready_after_polls(self, id: &str, polls: u32) -> Self {
        self.world().ready_after.insert(id.to_string(), polls);
        self
    }

    /// `id` never becomes ready
    pub fn never_ready(self, id: &str) -> Self {
        self.world().never_ready.insert(id.to_string());
        self
    }

    /// `id` reports a failed condition once it exists
    pub fn failed_condition(self, id: &str) -> Self {
        self.world().failed_condition.insert(id.to_string());
        self
    }

    /// Attributes reported for `id` besides its parameters (hostnames, ids)
    pub fn with_outputs(self, id: &str, outputs: Parameters) -> Self {
        self.world().outputs.insert(id.to_string(), outputs);
        self
    }

    /// Registry that routes every kind to this provider
    pub fn registry(self: &Arc<Self>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for kind in ResourceKind::ALL {
            registry.register(kind, self.clone());
        }
        registry
    }

    /// Every call made so far
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.world().calls.clone()
    }

    /// Number of mutating calls made so far
    pub fn mutation_count(&self) -> usize {
        self.world()
            .calls
            .iter()
            .filter(|c| !matches!(c, ProviderCall::Observe(_)))
            .count()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.world().resources.contains_key(id)
    }

    pub fn parameters(&self, id: &str) -> Option<Parameters> {
        self.world().resources.get(id).map(|r| r.parameters.clone())
    }

    /// Highest number of `apply` calls that ran at the same time
    pub fn max_concurrent_applies(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Change a stored parameter behind the reconciler's back
    pub fn drift(&self, id: &str, key: &str, value: serde_json::Value) {
        if let Some(resource) = self.world().resources.get_mut(id) {
            resource.parameters.insert(key.to_string(), value);
        }
    }

    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn scripted_error(kind: ErrorKind, id: &str) -> CloudError {
    let message = format!("injected failure for '{}'", id);
    match kind {
        ErrorKind::NotAuthenticated => CloudError::NotAuthenticated(message),
        ErrorKind::MissingConfiguration => CloudError::MissingConfiguration(message),
        ErrorKind::ResourceConflict => CloudError::ResourceConflict(message),
        ErrorKind::ImmutableFieldConflict => CloudError::ImmutableFieldConflict {
            resource: id.to_string(),
            field: "scripted".to_string(),
        },
        ErrorKind::TimedOut => CloudError::TimedOut(message),
        ErrorKind::ProviderUnavailable => CloudError::ProviderUnavailable(message),
        ErrorKind::DependencyFailed => CloudError::DependencyFailed(message),
        ErrorKind::ResourceFailed => CloudError::ResourceFailed(message),
        ErrorKind::Cancelled => CloudError::Cancelled(message),
        ErrorKind::InvalidPlan => CloudError::InvalidPlan(message),
        ErrorKind::CommandFailed => CloudError::CommandFailed(message),
        ErrorKind::Internal => CloudError::StateError(message),
    }
}

#[async_trait]
impl ResourceProvider for InMemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn observe(&self, spec: &ResourceSpec) -> Result<ObservedState> {
        let mut world = self.world();
        world.calls.push(ProviderCall::Observe(spec.id.clone()));

        if let Some(remaining) = world.transient_failures.get_mut(&spec.id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CloudError::ProviderUnavailable(format!(
                    "simulated outage observing '{}'",
                    spec.id
                )));
            }
        }

        let never_ready = world.never_ready.contains(&spec.id);
        let failed = world.failed_condition.contains(&spec.id);
        let outputs = world.outputs.get(&spec.id).cloned().unwrap_or_default();

        let Some(resource) = world.resources.get_mut(&spec.id) else {
            return Ok(ObservedState::absent());
        };

        let ready = if failed {
            ReadyCondition::Failed
        } else if never_ready {
            ReadyCondition::Pending
        } else if resource.polls_until_ready > 0 {
            resource.polls_until_ready -= 1;
            ReadyCondition::Pending
        } else {
            ReadyCondition::Ready
        };

        Ok(ObservedState::present(ready)
            .with_attributes(resource.parameters.clone())
            .with_attributes(outputs))
    }

    async fn apply(&self, spec: &ResourceSpec, observed: &ObservedState) -> Result<ApplyOutcome> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut world = self.world();
        world.calls.push(ProviderCall::Apply(spec.id.clone()));

        if let Some(kind) = world.apply_failures.get(&spec.id) {
            return Err(scripted_error(*kind, &spec.id));
        }

        let outputs = world.outputs.get(&spec.id).cloned().unwrap_or_default();

        if observed.exists {
            let drift = spec.drift(observed);
            if drift.is_empty() {
                return Ok(ApplyOutcome::skipped());
            }
            if let Some(field) = drift.iter().find(|k| world.immutable_fields.contains(*k)) {
                return Err(CloudError::ImmutableFieldConflict {
                    resource: spec.id.clone(),
                    field: field.clone(),
                });
            }
            if let Some(resource) = world.resources.get_mut(&spec.id) {
                resource.parameters.extend(spec.parameters.clone());
            }
            let mut outcome = ApplyOutcome::updated();
            outcome.attributes = outputs;
            return Ok(outcome);
        }

        let polls_until_ready = world.ready_after.get(&spec.id).copied().unwrap_or(0);
        world.resources.insert(
            spec.id.clone(),
            StoredResource {
                parameters: spec.parameters.clone(),
                polls_until_ready,
            },
        );
        let mut outcome = ApplyOutcome::created();
        outcome.attributes = outputs;
        Ok(outcome)
    }

    async fn delete(&self, spec: &ResourceSpec) -> Result<DeleteOutcome> {
        let mut world = self.world();
        world.calls.push(ProviderCall::Delete(spec.id.clone()));

        if let Some(kind) = world.delete_failures.get(&spec.id) {
            return Err(scripted_error(*kind, &spec.id));
        }

        match world.resources.remove(&spec.id) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::AlreadyAbsent),
        }
    }
}
