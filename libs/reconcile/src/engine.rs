//! Convergence planning.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::plan::{Additions, Advisory, DesiredCounts, Plan, RemovalRequest};
use crate::snapshot::{ClusterSnapshot, Node};
use crate::status::RemovalPolicy;

/// Computes removal and addition plans from a snapshot.
///
/// The engine is pure: it never mutates the snapshot or any external state.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine {
    policy: RemovalPolicy,
}

impl ReconciliationEngine {
    pub fn new(policy: RemovalPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RemovalPolicy {
        &self.policy
    }

    /// Select the nodes to remove, in snapshot order.
    pub fn plan_removals(
        &self,
        snapshot: &ClusterSnapshot,
        request: &RemovalRequest,
    ) -> Vec<Node> {
        match request {
            RemovalRequest::ByName(names) => {
                for name in names {
                    if snapshot.find(name).is_none() {
                        debug!(
                            cluster = %snapshot.cluster_name(),
                            node = %name,
                            "Requested node not in cluster, skipping"
                        );
                    }
                }

                snapshot
                    .nodes()
                    .iter()
                    .filter(|n| names.contains(&n.name))
                    .cloned()
                    .collect()
            }
            RemovalRequest::ByStatus { role } => snapshot
                .nodes()
                .iter()
                .filter(|n| role.as_deref().is_none_or(|r| n.role == r))
                .filter(|n| {
                    if !snapshot.probe().covers(&n.role) {
                        debug!(
                            node = %n.name,
                            role = %n.role,
                            "Node status was not probed, not eligible for removal"
                        );
                        return false;
                    }
                    n.state.is_removal_candidate(&self.policy)
                })
                .cloned()
                .collect(),
        }
    }

    /// Compute how many nodes to add per configured role.
    ///
    /// Surplus nodes are reported, never removed.
    pub fn plan_additions(
        &self,
        snapshot: &ClusterSnapshot,
        desired: &DesiredCounts,
    ) -> Additions {
        let mut per_role = BTreeMap::new();
        let mut advisories = Vec::new();

        for (role, want) in desired.iter() {
            let have = snapshot.count_role(role);
            info!(
                cluster = %snapshot.cluster_name(),
                role = %role,
                have,
                desired = want,
                "Node type count"
            );

            if have > want {
                let advisory = Advisory::OverProvisioned {
                    role: role.to_string(),
                    have,
                    desired: want,
                };
                warn!(cluster = %snapshot.cluster_name(), "{}", advisory);
                advisories.push(advisory);
            }

            per_role.insert(role.to_string(), want.saturating_sub(have));
        }

        for (role, have) in snapshot.role_counts() {
            if !desired.contains(&role) {
                let advisory = Advisory::Unmanaged { role, have };
                info!(cluster = %snapshot.cluster_name(), "{}, leaving it alone", advisory);
                advisories.push(advisory);
            }
        }

        Additions {
            per_role,
            advisories,
        }
    }

    /// Build a full plan against one snapshot.
    ///
    /// Additions here are computed before any removal takes effect; the
    /// executor recomputes them against a fresh snapshot.
    pub fn plan(
        &self,
        snapshot: &ClusterSnapshot,
        request: &RemovalRequest,
        desired: &DesiredCounts,
    ) -> Plan {
        let to_remove = self.plan_removals(snapshot, request);
        let remaining = snapshot.without(to_remove.iter().map(|n| n.name.as_str()));
        let additions = self.plan_additions(&remaining, desired);

        Plan {
            to_remove,
            to_add: additions.per_role,
            advisories: additions.advisories,
        }
    }
}
