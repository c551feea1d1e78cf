//! Plan execution.
//!
//! A pass runs in two phases:
//! - Removal: nodes are removed one at a time, in plan order. The first
//!   failure stops the phase; the remaining nodes are reported as skipped.
//!   Each successful removal purges the node's identity cache entry. Setup
//!   runs once at the end if anything was removed.
//! - Addition: the cluster is re-snapshotted and additions are computed
//!   against what actually remains. Per-role failures are recorded and do
//!   not stop other roles.
//!
//! Backend failures end up in the report. Identity cache failures abort the
//! pass, since continuing would leave stale identities behind.

use std::sync::Arc;

use serde::Serialize;
use steward_known_hosts::{EntryRemoval, HostIdentityCache, Rebuild};
use steward_reconcile::{
    Additions, ClusterSnapshot, Node, Plan, ProbeScope, ReconciliationEngine, RemovalRequest,
};
use tracing::{debug, info, instrument, warn};

use crate::backend::{OrchestrationBackend, RemoveOptions};
use crate::config::ClusterConfig;
use crate::error::StewardError;
use crate::snapshot::SnapshotSource;
use crate::status::StatusProvider;

/// Status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Done,
    Failed,
    Skipped,
    DryRun,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::DryRun => "dry run",
        }
    }
}

/// What happened to the identity cache for one removed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CacheAction {
    /// The node's keys were removed.
    Purged { keys: usize },

    /// The node's address had no keys.
    NotCached,

    /// The node had no address, so the whole cache was dropped.
    Deleted { existed: bool },

    /// Nothing was done (dry run or failed removal).
    Untouched,
}

/// A failed backend operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationFailure {
    pub operation: &'static str,
    pub target: String,
    pub reason: String,
}

/// One node of the removal phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalStep {
    pub node: String,
    pub role: String,
    pub address: Option<String>,
    pub status: StepStatus,
    pub cache: CacheAction,
}

/// Result of the removal phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalOutcome {
    pub steps: Vec<RemovalStep>,

    /// Setup run after the removals, if one was due.
    pub setup: Option<StepStatus>,

    pub failures: Vec<OperationFailure>,
}

impl RemovalOutcome {
    /// Nodes removed, or that would have been in a dry run.
    pub fn removed(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Done | StepStatus::DryRun))
            .map(|s| s.node.as_str())
    }
}

/// One role of the addition phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdditionStep {
    pub role: String,
    pub count: u32,
    pub status: StepStatus,
}

/// Result of the addition phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdditionOutcome {
    /// Additions computed against the fresh snapshot.
    pub additions: Additions,

    pub steps: Vec<AdditionStep>,

    pub failures: Vec<OperationFailure>,
}

/// Everything a pass did, or would have done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub cluster: String,
    pub dry_run: bool,
    pub removal: Option<RemovalOutcome>,
    pub addition: Option<AdditionOutcome>,
}

impl ExecutionReport {
    /// All failures of the pass.
    pub fn failures(&self) -> impl Iterator<Item = &OperationFailure> {
        self.removal
            .iter()
            .flat_map(|r| r.failures.iter())
            .chain(self.addition.iter().flat_map(|a| a.failures.iter()))
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// Applies plans against the backend and the identity cache.
pub struct PlanExecutor {
    config: Arc<ClusterConfig>,
    engine: ReconciliationEngine,
    backend: Arc<dyn OrchestrationBackend>,
    source: SnapshotSource,
    cache: HostIdentityCache,
    dry_run: bool,
}

impl PlanExecutor {
    pub fn new(
        config: Arc<ClusterConfig>,
        backend: Arc<dyn OrchestrationBackend>,
        status: Arc<dyn StatusProvider>,
        cache: HostIdentityCache,
        dry_run: bool,
    ) -> Self {
        let source = SnapshotSource::new(&config.cluster_name, backend.clone(), status);
        Self {
            engine: ReconciliationEngine::new(config.policy),
            config,
            backend,
            source,
            cache,
            dry_run,
        }
    }

    pub fn cluster(&self) -> &str {
        &self.config.cluster_name
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Take a snapshot, classifying the nodes in `scope`.
    pub async fn snapshot(&self, scope: ProbeScope) -> Result<ClusterSnapshot, StewardError> {
        self.source.take(scope).await
    }

    /// Snapshot scope a removal request needs.
    fn scope_for(request: &RemovalRequest) -> ProbeScope {
        match request {
            RemovalRequest::ByName(_) => ProbeScope::Unprobed,
            RemovalRequest::ByStatus { role } => ProbeScope::for_filter(role.as_deref()),
        }
    }

    /// Take a snapshot and select the nodes to remove.
    pub async fn plan_removals(&self, request: &RemovalRequest) -> Result<Vec<Node>, StewardError> {
        let snapshot = self.snapshot(Self::scope_for(request)).await?;
        Ok(self.engine.plan_removals(&snapshot, request))
    }

    /// Take a snapshot and build a full plan.
    pub async fn plan(&self, request: &RemovalRequest) -> Result<Plan, StewardError> {
        let snapshot = self.snapshot(Self::scope_for(request)).await?;
        let plan = self.engine.plan(&snapshot, request, &self.config.desired);

        info!(
            cluster = %self.cluster(),
            to_remove = plan.to_remove.len(),
            to_add = plan.to_add.values().sum::<u32>(),
            "Planned reconciliation"
        );

        Ok(plan)
    }

    /// Remove `nodes` in order, stopping at the first failure.
    #[instrument(skip(self, nodes), fields(cluster = %self.cluster(), dry_run = self.dry_run))]
    pub async fn remove_phase(&self, nodes: &[Node]) -> Result<RemovalOutcome, StewardError> {
        let mut outcome = RemovalOutcome::default();

        if nodes.is_empty() {
            info!("No nodes to remove");
            return Ok(outcome);
        }

        // An unreadable cache fails the pass before the cluster changes.
        self.cache.load()?;

        let mut halted = false;
        for node in nodes {
            let address = node.preferred_address.clone();
            let mut step = RemovalStep {
                node: node.name.clone(),
                role: node.role.clone(),
                address: address.clone(),
                status: StepStatus::Skipped,
                cache: CacheAction::Untouched,
            };

            if halted {
                debug!(node = %node.name, "Skipping removal after earlier failure");
                outcome.steps.push(step);
                continue;
            }

            if self.dry_run {
                info!(
                    node = %node.name,
                    address = address.as_deref().unwrap_or("-"),
                    state = %node.state,
                    "[DRY RUN] Would remove node"
                );
                step.status = StepStatus::DryRun;
                outcome.steps.push(step);
                continue;
            }

            info!(
                node = %node.name,
                address = address.as_deref().unwrap_or("-"),
                state = %node.state,
                "Removing node"
            );

            let result = self
                .backend
                .remove_node(self.cluster(), &node.name, RemoveOptions { skip_setup: true })
                .await;

            match result {
                Ok(()) => {
                    step.status = StepStatus::Done;
                    step.cache = self.purge_identity(node)?;
                }
                Err(e) => {
                    warn!(node = %node.name, error = %e, "Node removal failed, stopping removals");
                    step.status = StepStatus::Failed;
                    outcome.failures.push(OperationFailure {
                        operation: "remove_node",
                        target: node.name.clone(),
                        reason: e.to_string(),
                    });
                    halted = true;
                }
            }

            outcome.steps.push(step);
        }

        if outcome.steps.iter().any(|s| s.status == StepStatus::Done) {
            outcome.setup = Some(self.run_setup(&mut outcome.failures).await);
        } else if self.dry_run {
            info!("[DRY RUN] Would run cluster setup");
            outcome.setup = Some(StepStatus::DryRun);
        }

        info!(
            removed = outcome.removed().count(),
            failed = outcome.failures.len(),
            "Removal phase complete"
        );

        Ok(outcome)
    }

    /// Drop the removed node's identity.
    fn purge_identity(&self, node: &Node) -> Result<CacheAction, StewardError> {
        let action = match self.cache.remove_entry(node.preferred_address.as_deref())? {
            EntryRemoval::Purged(keys) => CacheAction::Purged { keys },
            EntryRemoval::NotCached => CacheAction::NotCached,
            EntryRemoval::NoAddress => {
                warn!(
                    node = %node.name,
                    path = %self.cache.path().display(),
                    "Removed node has no address, dropping the whole identity cache"
                );
                CacheAction::Deleted {
                    existed: self.cache.delete()?,
                }
            }
        };
        Ok(action)
    }

    async fn run_setup(&self, failures: &mut Vec<OperationFailure>) -> StepStatus {
        info!(cluster = %self.cluster(), "Running cluster setup");
        match self.backend.run_setup(self.cluster()).await {
            Ok(()) => StepStatus::Done,
            Err(e) => {
                warn!(cluster = %self.cluster(), error = %e, "Cluster setup failed");
                failures.push(OperationFailure {
                    operation: "setup",
                    target: self.cluster().to_string(),
                    reason: e.to_string(),
                });
                StepStatus::Failed
            }
        }
    }

    /// Re-snapshot and add nodes where roles fall short.
    ///
    /// In a dry run nothing was removed, so the removals `removal` reports
    /// are simulated on the fresh snapshot.
    #[instrument(skip(self, removal), fields(cluster = %self.cluster(), dry_run = self.dry_run))]
    pub async fn add_phase(
        &self,
        removal: Option<&RemovalOutcome>,
    ) -> Result<AdditionOutcome, StewardError> {
        let mut snapshot = self.snapshot(ProbeScope::Unprobed).await?;
        if self.dry_run {
            if let Some(removal) = removal {
                snapshot = snapshot.without(removal.removed());
            }
        }

        let additions = self.engine.plan_additions(&snapshot, &self.config.desired);
        let mut outcome = AdditionOutcome {
            additions: additions.clone(),
            ..Default::default()
        };

        for (role, count) in additions.pending() {
            if self.dry_run {
                info!(role = %role, count, "[DRY RUN] Would add nodes");
                outcome.steps.push(AdditionStep {
                    role: role.to_string(),
                    count,
                    status: StepStatus::DryRun,
                });
                continue;
            }

            info!(role = %role, count, "Adding nodes");
            let status = match self.backend.add_nodes(self.cluster(), role, count).await {
                Ok(()) => StepStatus::Done,
                Err(e) => {
                    warn!(role = %role, count, error = %e, "Adding nodes failed");
                    outcome.failures.push(OperationFailure {
                        operation: "add_nodes",
                        target: role.to_string(),
                        reason: e.to_string(),
                    });
                    StepStatus::Failed
                }
            };

            outcome.steps.push(AdditionStep {
                role: role.to_string(),
                count,
                status,
            });
        }

        if outcome.steps.is_empty() {
            info!("Cluster size matches configuration");
        }

        Ok(outcome)
    }

    /// Run both phases of `plan`.
    ///
    /// The plan's own addition counts are not used: additions are always
    /// recomputed after the removal phase.
    pub async fn execute(&self, plan: Plan) -> Result<ExecutionReport, StewardError> {
        debug!(planned_additions = ?plan.to_add, "Executing plan");

        let removal = self.remove_phase(&plan.to_remove).await?;
        let addition = self.add_phase(Some(&removal)).await?;

        Ok(ExecutionReport {
            cluster: self.cluster().to_string(),
            dry_run: self.dry_run,
            removal: Some(removal),
            addition: Some(addition),
        })
    }

    /// Rebuild the identity cache from the cluster's current addresses.
    #[instrument(skip(self), fields(cluster = %self.cluster(), dry_run = self.dry_run))]
    pub async fn sanitize_identity_cache(&self) -> Result<Rebuild, StewardError> {
        let snapshot = self.snapshot(ProbeScope::Unprobed).await?;
        let authoritative = snapshot.addresses();

        let rebuild = if self.dry_run {
            let preview = self.cache.preview_rebuild(&authoritative)?;
            info!(?preview, "[DRY RUN] Would rewrite identity cache");
            preview
        } else {
            self.cache.rebuild_from_authoritative(&authoritative)?
        };

        Ok(rebuild)
    }
}
