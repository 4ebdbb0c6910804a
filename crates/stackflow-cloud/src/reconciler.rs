//! Dependency-ordered reconciliation
//!
//! The reconciler is the single coordinator of a run. Specs whose
//! prerequisites are settled are handed to worker tasks (bounded by
//! `concurrency`); results flow back to the coordinator, which is the only
//! writer of the report.
//!
//! Per spec: `Pending → Observing → {Skipping | Applying} → AwaitingReady →
//! {Done | Failed}`. A failure marks every transitive dependent
//! `DependencyFailed`; independent branches keep going. Cleanup runs the same
//! scheduler over the reversed graph.

use crate::action::{
    ChangeType, DeleteOutcome, PlannedChange, ReconcileAction, ReconcileResult,
};
use crate::error::{CloudError, ErrorKind};
use crate::plan::Plan;
use crate::provider::{ProviderRegistry, ResourceProvider};
use crate::report::{Report, RunMode};
use crate::retry::{RetryConfig, retry_transient};
use crate::spec::{Parameters, ResourceSpec};
use crate::wait::WaitOutcome;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Run settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Maximum number of specs reconciled at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retry of transient provider failures
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_concurrency() -> usize {
    4
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retry: RetryConfig::default(),
        }
    }
}

/// Converges a plan through the registered providers
pub struct Reconciler {
    registry: ProviderRegistry,
    config: ReconcilerConfig,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            config: ReconcilerConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Use an externally owned cancellation token for the run
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels the run when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Converge every spec of `plan`, dependencies first
    pub async fn reconcile(&self, plan: &Plan) -> Report {
        self.run(plan, RunMode::Deploy).await
    }

    /// Tear down every spec of `plan`, dependents first
    pub async fn cleanup(&self, plan: &Plan) -> Report {
        self.run(plan, RunMode::Cleanup).await
    }

    /// Observe every spec and report what a deploy would change.
    ///
    /// Read only: never calls `apply` or `delete`.
    pub async fn preview(&self, plan: &Plan) -> Vec<PlannedChange> {
        let mut outputs: HashMap<String, Parameters> = HashMap::new();
        let mut changes = Vec::with_capacity(plan.len());

        for spec in plan.iter() {
            // Outputs of resources that do not exist yet are unknown; compare unresolved
            let resolved = spec
                .resolve_references(&outputs)
                .unwrap_or_else(|_| spec.clone());

            let observed = match self.registry.get(spec.kind) {
                Ok(provider) => {
                    retry_transient(&self.config.retry, "observe", &self.cancel, || {
                        provider.observe(&resolved)
                    })
                    .await
                }
                Err(e) => Err(e),
            };

            let (change, drift, description) = match observed {
                Ok(observed) if !observed.exists => (ChangeType::Create, Vec::new(), String::new()),
                Ok(observed) => {
                    let drift = resolved.drift(&observed);
                    outputs.insert(spec.id.clone(), observed.attributes);
                    if drift.is_empty() {
                        (ChangeType::NoOp, drift, String::new())
                    } else {
                        (ChangeType::Update, drift, String::new())
                    }
                }
                Err(e) => (ChangeType::Unknown, Vec::new(), e.to_string()),
            };

            changes.push(PlannedChange {
                spec_id: spec.id.clone(),
                kind: spec.kind,
                change,
                drift,
                description,
            });
        }
        changes
    }

    async fn run(&self, plan: &Plan, mode: RunMode) -> Report {
        let concurrency = self.config.concurrency.max(1);
        tracing::info!(
            mode = %mode,
            specs = plan.len(),
            concurrency = concurrency,
            "Starting run"
        );

        let mut schedule = Schedule::new(plan, mode);
        let mut running = FuturesUnordered::new();

        loop {
            while running.len() < concurrency && !self.cancel.is_cancelled() {
                let Some(position) = schedule.next_ready() else {
                    break;
                };
                let spec = &plan.specs()[position];

                let prepared = match mode {
                    RunMode::Deploy => spec.resolve_references(&schedule.outputs),
                    RunMode::Cleanup => Ok(spec.clone()),
                }
                .and_then(|resolved| {
                    self.registry
                        .get(spec.kind)
                        .map(|provider| (resolved, provider))
                });

                let (resolved, provider) = match prepared {
                    Ok(prepared) => prepared,
                    Err(e) => {
                        let result = ReconcileResult::failed(&spec.id, spec.kind, &e)
                            .with_required(spec.is_required());
                        schedule.settle(position, result);
                        continue;
                    }
                };

                let retry = self.config.retry.clone();
                let cancel = self.cancel.clone();
                let handle = tokio::spawn(async move {
                    match mode {
                        RunMode::Deploy => reconcile_spec(resolved, provider, retry, cancel).await,
                        RunMode::Cleanup => delete_spec(resolved, provider, retry, cancel).await,
                    }
                });
                running.push(async move { (position, handle.await) });
            }

            let Some((position, joined)) = running.next().await else {
                break;
            };
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    let spec = &plan.specs()[position];
                    ReconcileResult::new(&spec.id, spec.kind, ReconcileAction::Failed)
                        .with_error(ErrorKind::Internal, format!("worker task failed: {}", e))
                        .with_required(spec.is_required())
                }
            };
            schedule.settle(position, result);
        }

        schedule.abort_unsettled();
        let mut report = schedule.report;
        report.finish();

        tracing::info!(
            mode = %mode,
            status = %report.status,
            duration_ms = report.duration_ms,
            "Run finished: {}",
            report.summary
        );
        report
    }
}

/// Coordinator-side bookkeeping of one run
struct Schedule<'p> {
    plan: &'p Plan,
    mode: RunMode,
    /// Unsettled prerequisites per position
    waiting_on: Vec<usize>,
    /// Positions released when a position settles successfully
    followers: Vec<Vec<usize>>,
    settled: Vec<bool>,
    ready: BTreeSet<usize>,
    outputs: HashMap<String, Parameters>,
    report: Report,
}

impl<'p> Schedule<'p> {
    fn new(plan: &'p Plan, mode: RunMode) -> Self {
        let n = plan.len();
        let (prerequisites, followers): (Vec<Vec<usize>>, Vec<Vec<usize>>) = (0..n)
            .map(|p| match mode {
                RunMode::Deploy => (plan.dependency_positions(p), plan.dependent_positions(p)),
                RunMode::Cleanup => (plan.dependent_positions(p), plan.dependency_positions(p)),
            })
            .unzip();

        let waiting_on: Vec<usize> = prerequisites.iter().map(Vec::len).collect();
        let ready = waiting_on
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(p, _)| p)
            .collect();

        Self {
            plan,
            mode,
            waiting_on,
            followers,
            settled: vec![false; n],
            ready,
            outputs: HashMap::new(),
            report: Report::new(mode),
        }
    }

    /// Next startable position; topological order for deploy, reverse for cleanup
    fn next_ready(&mut self) -> Option<usize> {
        match self.mode {
            RunMode::Deploy => self.ready.pop_first(),
            RunMode::Cleanup => self.ready.pop_last(),
        }
    }

    fn settle(&mut self, position: usize, result: ReconcileResult) {
        if self.settled[position] {
            return;
        }
        self.settled[position] = true;
        log_result(&result);

        if result.action.is_success() {
            self.outputs
                .insert(result.spec_id.clone(), result.outputs.clone());
            for &follower in &self.followers[position] {
                self.waiting_on[follower] -= 1;
                if self.waiting_on[follower] == 0 && !self.settled[follower] {
                    self.ready.insert(follower);
                }
            }
            self.report.record(result);
            return;
        }

        let failed_id = result.spec_id.clone();
        let blocks_followers = result.action.is_failure();
        self.report.record(result);
        if !blocks_followers {
            return;
        }

        // Everything downstream of a failure is blocked
        let mut stack = self.followers[position].clone();
        while let Some(blocked) = stack.pop() {
            if self.settled[blocked] {
                continue;
            }
            self.settled[blocked] = true;
            self.ready.remove(&blocked);
            let spec = &self.plan.specs()[blocked];
            let result =
                ReconcileResult::new(&spec.id, spec.kind, ReconcileAction::DependencyFailed)
                    .with_error(
                        ErrorKind::DependencyFailed,
                        format!("not attempted: '{}' failed", failed_id),
                    )
                    .with_required(spec.is_required());
            log_result(&result);
            self.report.record(result);
            stack.extend(self.followers[blocked].iter().copied());
        }
    }

    /// Specs never started because the run was cancelled
    fn abort_unsettled(&mut self) {
        for position in 0..self.settled.len() {
            if self.settled[position] {
                continue;
            }
            self.settled[position] = true;
            let spec = &self.plan.specs()[position];
            self.report.record(
                ReconcileResult::new(&spec.id, spec.kind, ReconcileAction::Aborted)
                    .with_error(ErrorKind::Cancelled, "run cancelled before this resource started")
                    .with_required(spec.is_required()),
            );
        }
    }
}

fn log_result(result: &ReconcileResult) {
    if result.action.is_failure() {
        tracing::error!(
            spec = %result.spec_id,
            action = %result.action,
            "{}",
            result.message
        );
    } else if result.is_warning() || result.action == ReconcileAction::Aborted {
        tracing::warn!(
            spec = %result.spec_id,
            action = %result.action,
            "{}",
            result.message
        );
    } else {
        tracing::info!(
            spec = %result.spec_id,
            action = %result.action,
            duration_ms = result.duration_ms,
            "Reconciled"
        );
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Cancellation aborts the spec; any other error fails it
fn error_result(spec: &ResourceSpec, e: &CloudError) -> ReconcileResult {
    let result = if e.kind() == ErrorKind::Cancelled {
        ReconcileResult::new(&spec.id, spec.kind, ReconcileAction::Aborted)
            .with_error(ErrorKind::Cancelled, e.to_string())
    } else {
        ReconcileResult::failed(&spec.id, spec.kind, e)
    };
    result.with_required(spec.is_required())
}

/// Observe, apply if needed, then wait for readiness
async fn reconcile_spec(
    spec: ResourceSpec,
    provider: Arc<dyn ResourceProvider>,
    retry: RetryConfig,
    cancel: CancellationToken,
) -> ReconcileResult {
    let started = Instant::now();
    let required = spec.is_required();
    let fail = |e: &CloudError| error_result(&spec, e).with_duration_ms(elapsed_ms(started));

    if cancel.is_cancelled() {
        return ReconcileResult::new(&spec.id, spec.kind, ReconcileAction::Aborted)
            .with_error(ErrorKind::Cancelled, "run cancelled before this resource started")
            .with_required(required);
    }

    tracing::debug!(spec = %spec.id, kind = %spec.kind, "Observing");
    let observed = match retry_transient(&retry, &format!("observe {}", spec.id), &cancel, || {
        provider.observe(&spec)
    })
    .await
    {
        Ok(observed) => observed,
        Err(e) => return fail(&e),
    };

    let mut outputs = observed.attributes.clone();
    let (action, ready_now) = if spec.matches(&observed) {
        tracing::debug!(spec = %spec.id, "Already in desired state");
        (ReconcileAction::Skipped, observed.is_ready())
    } else {
        if observed.exists {
            tracing::info!(spec = %spec.id, drift = ?spec.drift(&observed), "Updating");
        } else {
            tracing::info!(spec = %spec.id, kind = %spec.kind, "Creating");
        }
        match retry_transient(&retry, &format!("apply {}", spec.id), &cancel, || {
            provider.apply(&spec, &observed)
        })
        .await
        {
            Ok(outcome) => {
                outputs.extend(outcome.attributes);
                (outcome.action, false)
            }
            Err(e) => return fail(&e),
        }
    };

    let mut result = ReconcileResult::new(&spec.id, spec.kind, action).with_required(required);

    if spec.needs_wait() && !ready_now {
        let policy = spec.wait_policy();
        tracing::info!(
            spec = %spec.id,
            timeout_ms = policy.timeout_ms,
            "Waiting for readiness"
        );
        match provider.await_ready(&spec, &policy, &cancel).await {
            Ok(WaitOutcome::Ready(ready)) => outputs.extend(ready.attributes),
            Ok(WaitOutcome::Failed(_)) => {
                return fail(&CloudError::ResourceFailed(format!(
                    "{} '{}' reported a failed condition",
                    spec.kind, spec.id
                )));
            }
            Ok(WaitOutcome::TimedOut { elapsed, last }) => {
                if let Some(last) = last {
                    outputs.extend(last.attributes);
                }
                let message = format!(
                    "not ready after {}s; it may still be provisioning",
                    elapsed.as_secs()
                );
                if required {
                    return fail(&CloudError::TimedOut(message)).with_outputs(outputs);
                }
                result = result.with_error(ErrorKind::TimedOut, message);
            }
            Ok(WaitOutcome::Cancelled) => {
                result = result.with_error(
                    ErrorKind::Cancelled,
                    "run cancelled while waiting for readiness",
                );
            }
            Err(e) => return fail(&e),
        }
    }

    result
        .with_outputs(outputs)
        .with_duration_ms(elapsed_ms(started))
}

/// Delete if present, then wait until it is gone
async fn delete_spec(
    spec: ResourceSpec,
    provider: Arc<dyn ResourceProvider>,
    retry: RetryConfig,
    cancel: CancellationToken,
) -> ReconcileResult {
    let started = Instant::now();
    let required = spec.is_required();
    let fail = |e: &CloudError| error_result(&spec, e).with_duration_ms(elapsed_ms(started));

    if cancel.is_cancelled() {
        return ReconcileResult::new(&spec.id, spec.kind, ReconcileAction::Aborted)
            .with_error(ErrorKind::Cancelled, "run cancelled before this resource started")
            .with_required(required);
    }

    let observed = match retry_transient(&retry, &format!("observe {}", spec.id), &cancel, || {
        provider.observe(&spec)
    })
    .await
    {
        Ok(observed) => observed,
        Err(e) => return fail(&e),
    };

    if !observed.exists {
        return ReconcileResult::new(&spec.id, spec.kind, ReconcileAction::Skipped)
            .with_message("already absent")
            .with_required(required)
            .with_duration_ms(elapsed_ms(started));
    }

    tracing::info!(spec = %spec.id, kind = %spec.kind, "Deleting");
    let outcome = match retry_transient(&retry, &format!("delete {}", spec.id), &cancel, || {
        provider.delete(&spec)
    })
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => return fail(&e),
    };

    if outcome == DeleteOutcome::AlreadyAbsent {
        return ReconcileResult::new(&spec.id, spec.kind, ReconcileAction::Skipped)
            .with_message("already absent")
            .with_required(required)
            .with_duration_ms(elapsed_ms(started));
    }

    let mut result =
        ReconcileResult::new(&spec.id, spec.kind, ReconcileAction::Deleted).with_required(required);

    if spec.needs_wait() {
        // Deletion is observable right away; no lead time
        let mut policy = spec.wait_policy();
        policy.initial_delay_ms = 0;
        match policy
            .wait_until(&cancel, || provider.observe(&spec), |o| !o.exists)
            .await
        {
            Ok(WaitOutcome::Ready(_)) => {}
            Ok(WaitOutcome::Failed(_)) => {
                return fail(&CloudError::ResourceFailed(format!(
                    "{} '{}' failed while being deleted",
                    spec.kind, spec.id
                )));
            }
            Ok(WaitOutcome::TimedOut { elapsed, .. }) => {
                let message = format!("still present {}s after deletion", elapsed.as_secs());
                if required {
                    return fail(&CloudError::TimedOut(message));
                }
                result = result.with_error(ErrorKind::TimedOut, message);
            }
            Ok(WaitOutcome::Cancelled) => {
                result = result.with_error(ErrorKind::Cancelled, "run cancelled while deleting");
            }
            Err(e) => return fail(&e),
        }
    }

    result.with_duration_ms(elapsed_ms(started))
}
