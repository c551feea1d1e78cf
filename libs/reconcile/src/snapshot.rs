//! Point-in-time view of cluster membership.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::LifecycleState;
use crate::ReconcileError;

/// A single cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Cloud instance identifier, if the backend knows it.
    pub id: Option<String>,

    /// Node name, unique within a cluster.
    pub name: String,

    /// Role tag (e.g. "worker", "master").
    pub role: String,

    /// Address used to reach the node; keys the identity cache.
    pub preferred_address: Option<String>,

    /// Classified lifecycle state.
    pub state: LifecycleState,
}

impl Node {
    /// Create a node with no id, no address and `Unknown` state.
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            role: role.into(),
            preferred_address: None,
            state: LifecycleState::Unknown,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.preferred_address = Some(address.into());
        self
    }

    pub fn with_state(mut self, state: LifecycleState) -> Self {
        self.state = state;
        self
    }
}

/// Which roles had their status queried when a snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeScope {
    /// No status was queried; every state is a placeholder.
    #[default]
    Unprobed,

    /// Every node was queried.
    All,

    /// Only nodes of this role were queried.
    Role(String),
}

impl ProbeScope {
    /// Scope for an optional role filter.
    pub fn for_filter(role: Option<&str>) -> Self {
        match role {
            Some(role) => Self::Role(role.to_string()),
            None => Self::All,
        }
    }

    /// Returns true if nodes of `role` carry a queried state.
    pub fn covers(&self, role: &str) -> bool {
        match self {
            Self::Unprobed => false,
            Self::All => true,
            Self::Role(probed) => probed == role,
        }
    }
}

/// Immutable view of a cluster's nodes at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    cluster_name: String,
    nodes: Vec<Node>,
    probe: ProbeScope,
    taken_at: DateTime<Utc>,
}

impl ClusterSnapshot {
    /// Build a snapshot, enforcing node invariants.
    ///
    /// Names must be unique. A node without an instance id is forced to
    /// `Unknown`, whatever state it was given.
    pub fn new(
        cluster_name: impl Into<String>,
        nodes: Vec<Node>,
        probe: ProbeScope,
    ) -> Result<Self, ReconcileError> {
        let cluster_name = cluster_name.into();

        let mut seen = HashSet::with_capacity(nodes.len());
        for node in &nodes {
            if !seen.insert(node.name.as_str()) {
                return Err(ReconcileError::DuplicateNode {
                    cluster: cluster_name,
                    node: node.name.clone(),
                });
            }
        }

        let nodes = nodes
            .into_iter()
            .map(|mut node| {
                if node.id.is_none() {
                    node.state = LifecycleState::Unknown;
                }
                node
            })
            .collect();

        Ok(Self {
            cluster_name,
            nodes,
            probe,
            taken_at: Utc::now(),
        })
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Nodes in backend order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn probe(&self) -> &ProbeScope {
        &self.probe
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by name.
    pub fn find(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Number of nodes with the given role.
    pub fn count_role(&self, role: &str) -> u32 {
        self.nodes.iter().filter(|n| n.role == role).count() as u32
    }

    /// Node counts per role.
    pub fn role_counts(&self) -> BTreeMap<String, u32> {
        let mut counts = BTreeMap::new();
        for node in &self.nodes {
            *counts.entry(node.role.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Preferred addresses of all nodes that have one.
    pub fn addresses(&self) -> BTreeSet<String> {
        self.nodes
            .iter()
            .filter_map(|n| n.preferred_address.clone())
            .filter(|a| !a.is_empty())
            .collect()
    }

    /// Copy of this snapshot without the named nodes.
    ///
    /// Used to predict the post-removal cluster when removals are simulated.
    pub fn without<'a, I>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: HashSet<&str> = names.into_iter().collect();
        Self {
            cluster_name: self.cluster_name.clone(),
            nodes: self
                .nodes
                .iter()
                .filter(|n| !names.contains(n.name.as_str()))
                .cloned()
                .collect(),
            probe: self.probe.clone(),
            taken_at: self.taken_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(name: &str) -> Node {
        Node::new(name, "worker")
            .with_id(format!("i-{name}"))
            .with_state(LifecycleState::Healthy)
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ClusterSnapshot::new(
            "c1",
            vec![worker("a"), worker("a")],
            ProbeScope::All,
        );
        assert!(matches!(
            result,
            Err(ReconcileError::DuplicateNode { ref node, .. }) if node == "a"
        ));
    }

    #[test]
    fn test_missing_id_forces_unknown() {
        let node = Node::new("a", "worker").with_state(LifecycleState::Healthy);
        let snapshot = ClusterSnapshot::new("c1", vec![node], ProbeScope::All).unwrap();
        assert_eq!(snapshot.nodes()[0].state, LifecycleState::Unknown);
    }

    #[test]
    fn test_role_counts() {
        let snapshot = ClusterSnapshot::new(
            "c1",
            vec![worker("a"), worker("b"), Node::new("m", "master").with_id("i-m")],
            ProbeScope::Unprobed,
        )
        .unwrap();

        assert_eq!(snapshot.count_role("worker"), 2);
        assert_eq!(snapshot.count_role("master"), 1);
        assert_eq!(snapshot.count_role("gpu"), 0);
        assert_eq!(snapshot.role_counts().get("worker"), Some(&2));
    }

    #[test]
    fn test_addresses_skip_missing() {
        let snapshot = ClusterSnapshot::new(
            "c1",
            vec![
                worker("a").with_address("10.0.0.1"),
                worker("b"),
                worker("c").with_address(""),
            ],
            ProbeScope::All,
        )
        .unwrap();

        let addresses: Vec<_> = snapshot.addresses().into_iter().collect();
        assert_eq!(addresses, vec!["10.0.0.1".to_string()]);
    }

    #[test]
    fn test_without_preserves_order() {
        let snapshot = ClusterSnapshot::new(
            "c1",
            vec![worker("a"), worker("b"), worker("c")],
            ProbeScope::All,
        )
        .unwrap();

        let trimmed = snapshot.without(["b"]);
        let names: Vec<_> = trimmed.nodes().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(snapshot.find("b").is_some());
        assert!(trimmed.find("b").is_none());
    }

    #[test]
    fn test_probe_scope_covers() {
        assert!(ProbeScope::All.covers("worker"));
        assert!(!ProbeScope::Unprobed.covers("worker"));
        assert!(ProbeScope::for_filter(Some("worker")).covers("worker"));
        assert!(!ProbeScope::for_filter(Some("worker")).covers("master"));
    }
}
