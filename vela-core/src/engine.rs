//! Apply engine - executes a plan against a provider adapter
//!
//! Walks the compiled plan while consulting the state store, so re-running
//! the same plan is idempotent: unchanged resources are skipped, drifted
//! ones are updated in place where the kind allows it, and a resource whose
//! create failed mid-flight is reconciled instead of duplicated.
//!
//! Independent branches of the graph run on a bounded worker pool. A node
//! is dispatched only once every dependency has reached a terminal
//! successful state; a failed node marks all transitive dependents failed
//! without an adapter call.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;

use crate::adapter::{AdapterError, ProviderAdapter};
use crate::descriptor::{ResourceDescriptor, ResourceKind};
use crate::plan::Plan;
use crate::report::{ApplyResult, FailureCode, Outcome, RunReport, SkipReason};
use crate::retry::{RetryError, RetryPolicy};
use crate::state::{ResourceStatus, StateEntry, StateStore};

/// Cooperative cancellation handle shared between the caller and a run.
///
/// In-flight provider calls are allowed to complete (a provider-side
/// mutation is never aborted); nothing new is dispatched after cancellation
/// is observed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of plan steps in flight at once.
    pub parallelism: usize,
    pub retry: RetryPolicy,
    /// Poll interval while waiting for asynchronously provisioned resources.
    pub poll_interval: Duration,
    /// Deadline for a created resource to report ready.
    pub readiness_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(5),
            readiness_timeout: Duration::from_secs(300),
        }
    }
}

/// Why a single plan step failed.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("provider error: {0}")]
    Provider(AdapterError),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: AdapterError },

    #[error("{kind} cannot be updated in place; recreate it to apply the new configuration")]
    ImmutableDrift { kind: ResourceKind },

    #[error("resource created but never reported ready within {timeout:?}")]
    ProvisioningTimeout { timeout: Duration },

    #[error("dependency {dependency} failed")]
    DependencyFailed { dependency: String },

    #[error("state store error: {0}")]
    State(#[from] crate::state::StateError),
}

impl StepError {
    fn failure_code(&self) -> FailureCode {
        match self {
            Self::Provider(_) => FailureCode::Provider,
            Self::RetriesExhausted { .. } => FailureCode::RetriesExhausted,
            Self::ImmutableDrift { .. } => FailureCode::ImmutableDrift,
            Self::ProvisioningTimeout { .. } => FailureCode::ProvisioningTimeout,
            Self::DependencyFailed { .. } => FailureCode::DependencyFailed,
            Self::State(_) => FailureCode::StateStore,
        }
    }

    fn from_retry(e: RetryError) -> Self {
        match e {
            RetryError::Permanent(e) => Self::Provider(e),
            RetryError::Exhausted { attempts, last } => Self::RetriesExhausted { attempts, last },
        }
    }
}

/// Outcome of one step before it is stamped with timestamps.
#[derive(Debug)]
struct StepResult {
    outcome: Outcome,
    physical_id: Option<String>,
    error: Option<StepError>,
}

impl StepResult {
    fn created(physical_id: String) -> Self {
        Self {
            outcome: Outcome::Created,
            physical_id: Some(physical_id),
            error: None,
        }
    }

    fn updated(physical_id: String) -> Self {
        Self {
            outcome: Outcome::Updated,
            physical_id: Some(physical_id),
            error: None,
        }
    }

    fn deleted(physical_id: String) -> Self {
        Self {
            outcome: Outcome::Deleted,
            physical_id: Some(physical_id),
            error: None,
        }
    }

    fn skipped(reason: SkipReason, physical_id: Option<String>) -> Self {
        Self {
            outcome: Outcome::Skipped(reason),
            physical_id,
            error: None,
        }
    }

    fn failed(error: StepError, physical_id: Option<String>) -> Self {
        Self {
            outcome: Outcome::Failed(error.failure_code()),
            physical_id,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Apply,
    Destroy,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        }
    }
}

/// Executes compiled plans against a provider adapter, recording progress
/// in the state store.
pub struct ApplyEngine {
    adapter: Arc<dyn ProviderAdapter>,
    store: Arc<dyn StateStore>,
    config: EngineConfig,
}

impl ApplyEngine {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, store: Arc<dyn StateStore>) -> Self {
        Self {
            adapter,
            store,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Apply the plan: create missing resources, update drifted ones,
    /// skip everything already up to date.
    pub async fn apply(&self, plan: &Plan, environment: &str, cancel: &CancelToken) -> RunReport {
        self.run(plan, environment, Mode::Apply, cancel).await
    }

    /// Tear down every resource in the plan, in reverse apply order.
    pub async fn destroy(&self, plan: &Plan, environment: &str, cancel: &CancelToken) -> RunReport {
        self.run(plan, environment, Mode::Destroy, cancel).await
    }

    async fn run(
        &self,
        plan: &Plan,
        environment: &str,
        mode: Mode,
        cancel: &CancelToken,
    ) -> RunReport {
        let started_at = Utc::now();

        // Execution order: plan order for apply, reversed for destroy.
        let steps: Vec<ResourceDescriptor> = match mode {
            Mode::Apply => plan.steps().to_vec(),
            Mode::Destroy => plan.teardown_steps().cloned().collect(),
        };
        let n = steps.len();
        let index: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, d)| (d.logical_name.as_str(), i))
            .collect();

        // before[i]: steps that must finish before i may run.
        // after[i]: steps unblocked (or poisoned) by i finishing.
        let mut before: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut after: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, step) in steps.iter().enumerate() {
            for dep in &step.depends_on {
                let j = index[dep.as_str()];
                match mode {
                    // A dependency applies first.
                    Mode::Apply => {
                        before[i].push(j);
                        after[j].push(i);
                    }
                    // A dependent is destroyed first.
                    Mode::Destroy => {
                        before[j].push(i);
                        after[i].push(j);
                    }
                }
            }
        }

        let mut waiting: Vec<usize> = before.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| waiting[i] == 0).collect();
        let mut results: Vec<Option<ApplyResult>> = (0..n).map(|_| None).collect();
        let mut in_flight: JoinSet<(usize, ApplyResult)> = JoinSet::new();
        let mut done = 0usize;
        let parallelism = self.config.parallelism.max(1);

        while done < n {
            while !cancel.is_cancelled() && in_flight.len() < parallelism {
                let Some(i) = ready.pop_first() else { break };
                let descriptor = steps[i].clone();
                let adapter = Arc::clone(&self.adapter);
                let store = Arc::clone(&self.store);
                let config = self.config.clone();
                in_flight.spawn(async move {
                    let step_started = Utc::now();
                    let result = match mode {
                        Mode::Apply => {
                            apply_step(adapter.as_ref(), store.as_ref(), &config, &descriptor)
                                .await
                        }
                        Mode::Destroy => {
                            destroy_step(adapter.as_ref(), store.as_ref(), &config, &descriptor)
                                .await
                        }
                    };
                    log::info!("{}: {}", descriptor.logical_name, result.outcome);
                    (
                        i,
                        ApplyResult {
                            logical_name: descriptor.logical_name,
                            outcome: result.outcome,
                            physical_id: result.physical_id,
                            error: result.error.map(|e| e.to_string()),
                            started_at: step_started,
                            finished_at: Utc::now(),
                        },
                    )
                });
            }

            if in_flight.is_empty() {
                // Nothing running and nothing dispatchable: the run was
                // cancelled, or the remainder is already marked failed.
                break;
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (i, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    log::error!("worker task failed: {e}");
                    continue;
                }
            };

            let succeeded = result.outcome.is_success();
            results[i] = Some(result);
            done += 1;

            if succeeded {
                for &j in &after[i] {
                    waiting[j] -= 1;
                    if waiting[j] == 0 && results[j].is_none() {
                        ready.insert(j);
                    }
                }
            } else {
                // Poison every transitive dependent without touching the
                // adapter.
                let mut stack: Vec<(usize, usize)> =
                    after[i].iter().map(|&j| (j, i)).collect();
                while let Some((j, via)) = stack.pop() {
                    if results[j].is_some() {
                        continue;
                    }
                    let error = StepError::DependencyFailed {
                        dependency: steps[via].logical_name.clone(),
                    };
                    let now = Utc::now();
                    results[j] = Some(ApplyResult {
                        logical_name: steps[j].logical_name.clone(),
                        outcome: Outcome::Failed(error.failure_code()),
                        physical_id: None,
                        error: Some(error.to_string()),
                        started_at: now,
                        finished_at: now,
                    });
                    done += 1;
                    ready.remove(&j);
                    stack.extend(after[j].iter().map(|&k| (k, j)));
                }
            }
        }

        // Steps never dispatched (cancellation, or unblocked slots drained
        // after a cancel) are reported, not silently dropped.
        for (i, slot) in results.iter_mut().enumerate() {
            if slot.is_none() {
                let now = Utc::now();
                *slot = Some(ApplyResult {
                    logical_name: steps[i].logical_name.clone(),
                    outcome: Outcome::Skipped(SkipReason::Cancelled),
                    physical_id: None,
                    error: None,
                    started_at: now,
                    finished_at: now,
                });
            }
        }

        RunReport {
            environment: environment.to_string(),
            operation: mode.as_str().to_string(),
            started_at,
            finished_at: Utc::now(),
            results: results.into_iter().flatten().collect(),
        }
    }
}

/// One apply step: consult state, then create, update, reconcile, or skip.
async fn apply_step(
    adapter: &dyn ProviderAdapter,
    store: &dyn StateStore,
    config: &EngineConfig,
    descriptor: &ResourceDescriptor,
) -> StepResult {
    let desired_hash = descriptor.config_hash();

    let existing = match store.get(&descriptor.logical_name).await {
        Ok(entry) => entry,
        Err(e) => return StepResult::failed(StepError::State(e), None),
    };

    match existing {
        None => create_resource(adapter, store, config, descriptor).await,
        Some(entry) => match (entry.status, entry.physical_id.clone()) {
            (ResourceStatus::Created, Some(id)) if entry.config_hash == desired_hash => {
                StepResult::skipped(SkipReason::UpToDate, Some(id))
            }
            (ResourceStatus::Created, Some(id)) => {
                update_resource(adapter, store, config, descriptor, entry, id).await
            }
            // An identifier exists but the last run never confirmed the
            // resource: reconcile instead of creating a duplicate.
            (ResourceStatus::Failed, Some(id)) | (ResourceStatus::Pending, Some(id)) => {
                reconcile_resource(adapter, store, config, descriptor, entry, id).await
            }
            // No identifier was ever recorded (or the resource was torn
            // down); create from scratch.
            _ => create_resource(adapter, store, config, descriptor).await,
        },
    }
}

async fn create_resource(
    adapter: &dyn ProviderAdapter,
    store: &dyn StateStore,
    config: &EngineConfig,
    descriptor: &ResourceDescriptor,
) -> StepResult {
    let physical_id = match config.retry.run(|| adapter.create(descriptor)).await {
        Ok(id) => id,
        Err(RetryError::Permanent(AdapterError::AlreadyExists { physical_id })) => {
            // Success-equivalent: record what the provider already has.
            let entry = StateEntry {
                logical_name: descriptor.logical_name.clone(),
                kind: descriptor.kind,
                physical_id: physical_id.clone(),
                config_hash: descriptor.config_hash(),
                status: ResourceStatus::Created,
            };
            if let Err(e) = store.put(entry).await {
                return StepResult::failed(StepError::State(e), physical_id);
            }
            return StepResult::skipped(SkipReason::AlreadyExists, physical_id);
        }
        Err(e) => {
            let step_error = StepError::from_retry(e);
            if let Err(se) = store.put(StateEntry::failed(descriptor)).await {
                log::warn!(
                    "could not record failure for {}: {se}",
                    descriptor.logical_name
                );
            }
            return StepResult::failed(step_error, None);
        }
    };

    // Commit the identifier before waiting on readiness, so a timeout or a
    // crash leaves enough behind for the next run to reconcile.
    let pending = StateEntry::pending(descriptor, physical_id.clone());
    if let Err(e) = store.put(pending.clone()).await {
        return StepResult::failed(StepError::State(e), Some(physical_id));
    }

    if descriptor.kind.provisions_asynchronously() {
        if let Err(error) = wait_ready(adapter, config, &physical_id, descriptor.kind).await {
            if let Err(se) = store
                .put(pending.with_status(ResourceStatus::Failed))
                .await
            {
                log::warn!(
                    "could not record failure for {}: {se}",
                    descriptor.logical_name
                );
            }
            return StepResult::failed(error, Some(physical_id));
        }
    }

    if let Err(e) = store.put(pending.with_status(ResourceStatus::Created)).await {
        return StepResult::failed(StepError::State(e), Some(physical_id));
    }
    StepResult::created(physical_id)
}

async fn update_resource(
    adapter: &dyn ProviderAdapter,
    store: &dyn StateStore,
    config: &EngineConfig,
    descriptor: &ResourceDescriptor,
    entry: StateEntry,
    physical_id: String,
) -> StepResult {
    if !descriptor.kind.supports_update() {
        return StepResult::failed(
            StepError::ImmutableDrift {
                kind: descriptor.kind,
            },
            Some(physical_id),
        );
    }

    match config
        .retry
        .run(|| adapter.update(descriptor, &physical_id))
        .await
    {
        Ok(()) => {
            let updated = StateEntry {
                config_hash: descriptor.config_hash(),
                status: ResourceStatus::Created,
                ..entry
            };
            if let Err(e) = store.put(updated).await {
                return StepResult::failed(StepError::State(e), Some(physical_id));
            }
            StepResult::updated(physical_id)
        }
        Err(e) => StepResult::failed(StepError::from_retry(e), Some(physical_id)),
    }
}

/// A previous run recorded an identifier but never confirmed the resource.
/// Wait for readiness again, then settle any remaining drift.
async fn reconcile_resource(
    adapter: &dyn ProviderAdapter,
    store: &dyn StateStore,
    config: &EngineConfig,
    descriptor: &ResourceDescriptor,
    entry: StateEntry,
    physical_id: String,
) -> StepResult {
    if descriptor.kind.provisions_asynchronously() {
        if let Err(error) = wait_ready(adapter, config, &physical_id, descriptor.kind).await {
            return StepResult::failed(error, Some(physical_id));
        }
    }

    let desired_hash = descriptor.config_hash();
    if entry.config_hash != desired_hash {
        return update_resource(adapter, store, config, descriptor, entry, physical_id).await;
    }

    if let Err(e) = store
        .put(entry.with_status(ResourceStatus::Created))
        .await
    {
        return StepResult::failed(StepError::State(e), Some(physical_id));
    }
    StepResult::created(physical_id)
}

async fn destroy_step(
    adapter: &dyn ProviderAdapter,
    store: &dyn StateStore,
    config: &EngineConfig,
    descriptor: &ResourceDescriptor,
) -> StepResult {
    let existing = match store.get(&descriptor.logical_name).await {
        Ok(entry) => entry,
        Err(e) => return StepResult::failed(StepError::State(e), None),
    };

    let Some(entry) = existing else {
        return StepResult::skipped(SkipReason::AlreadyAbsent, None);
    };
    let Some(physical_id) = entry.physical_id.clone() else {
        // Failed create with nothing provider-side; just drop the entry.
        if let Err(e) = store.remove(&descriptor.logical_name).await {
            return StepResult::failed(StepError::State(e), None);
        }
        return StepResult::skipped(SkipReason::AlreadyAbsent, None);
    };
    if entry.status == ResourceStatus::Deleted {
        return StepResult::skipped(SkipReason::AlreadyAbsent, Some(physical_id));
    }

    match config
        .retry
        .run(|| adapter.delete(&physical_id, descriptor.kind))
        .await
    {
        // Already gone provider-side counts as deleted.
        Ok(()) | Err(RetryError::Permanent(AdapterError::NotFound(_))) => {
            if let Err(e) = store.remove(&descriptor.logical_name).await {
                return StepResult::failed(StepError::State(e), Some(physical_id));
            }
            StepResult::deleted(physical_id)
        }
        Err(e) => StepResult::failed(StepError::from_retry(e), Some(physical_id)),
    }
}

/// Uniform bounded poll replacing per-resource waiter calls: query the
/// adapter's status until ready or the deadline passes. The resource is
/// always polled at least once, even with a zero timeout.
async fn wait_ready(
    adapter: &dyn ProviderAdapter,
    config: &EngineConfig,
    physical_id: &str,
    kind: ResourceKind,
) -> Result<(), StepError> {
    let deadline = tokio::time::Instant::now() + config.readiness_timeout;
    loop {
        match config
            .retry
            .run(|| adapter.describe_status(physical_id, kind))
            .await
        {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => return Err(StepError::from_retry(e)),
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(StepError::ProvisioningTimeout {
                timeout: config.readiness_timeout,
            });
        }
        tokio::time::sleep(config.poll_interval).await;
    }
}
