//! Snapshot acquisition.

use std::sync::Arc;

use steward_reconcile::{ClusterSnapshot, LifecycleState, Node, ProbeScope};
use tracing::{debug, info, instrument};

use crate::backend::{BackendNode, OrchestrationBackend};
use crate::error::StewardError;
use crate::status::{probe_state, StatusProvider};

/// Takes cluster snapshots from a backend listing plus status queries.
#[derive(Clone)]
pub struct SnapshotSource {
    cluster: String,
    backend: Arc<dyn OrchestrationBackend>,
    status: Arc<dyn StatusProvider>,
}

impl SnapshotSource {
    pub fn new(
        cluster: impl Into<String>,
        backend: Arc<dyn OrchestrationBackend>,
        status: Arc<dyn StatusProvider>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            backend,
            status,
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// List the cluster and classify the nodes in `scope`.
    ///
    /// Nodes outside the scope keep the `Unknown` placeholder state and no
    /// status query is made for them.
    #[instrument(skip(self), fields(cluster = %self.cluster))]
    pub async fn take(&self, scope: ProbeScope) -> Result<ClusterSnapshot, StewardError> {
        let listed = self
            .backend
            .list_nodes(&self.cluster)
            .await
            .map_err(|source| StewardError::Snapshot {
                cluster: self.cluster.clone(),
                source,
            })?;

        let mut nodes = Vec::with_capacity(listed.len());
        for backend_node in &listed {
            let state = if scope.covers(&backend_node.kind) {
                probe_state(self.status.as_ref(), backend_node).await
            } else {
                LifecycleState::Unknown
            };
            nodes.push(to_node(backend_node, state));
        }

        let snapshot = ClusterSnapshot::new(&self.cluster, nodes, scope)?;

        info!(nodes = snapshot.len(), probe = ?snapshot.probe(), "Took cluster snapshot");
        for node in snapshot.nodes() {
            debug!(
                node = %node.name,
                role = %node.role,
                address = node.preferred_address.as_deref().unwrap_or("-"),
                state = %node.state,
                "Snapshot node"
            );
        }

        Ok(snapshot)
    }
}

fn to_node(backend_node: &BackendNode, state: LifecycleState) -> Node {
    Node {
        id: backend_node
            .instance_id
            .clone()
            .filter(|id| !id.is_empty()),
        name: backend_node.name.clone(),
        role: backend_node.kind.clone(),
        preferred_address: backend_node.preferred_ip.clone(),
        state,
    }
}
