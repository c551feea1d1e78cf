//! Cluster membership reconciliation.
//!
//! This library decides how a cluster's actual membership should change to
//! match its desired membership. Key concepts:
//!
//! - **Snapshot**: the nodes a cluster has right now, each with a lifecycle
//!   state classified from the cloud provider's instance status.
//! - **Desired counts**: how many nodes of each role the cluster should have.
//! - **Plan**: nodes to remove and nodes to add per role.
//!
//! # Invariants
//!
//! - Planning is pure and deterministic: same inputs, same plan, same order
//! - Healthy nodes are never selected by status-derived removal
//! - Surplus nodes are reported, never removed implicitly
//! - Roles without a desired count are left alone

pub mod engine;
pub mod plan;
pub mod snapshot;
pub mod status;

use thiserror::Error;

pub use engine::ReconciliationEngine;
pub use plan::{Additions, Advisory, DesiredCounts, Plan, RemovalRequest};
pub use snapshot::{ClusterSnapshot, Node, ProbeScope};
pub use status::{classify, LifecycleState, RemovalPolicy};

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Two nodes in one snapshot share a name.
    #[error("duplicate node name '{node}' in cluster {cluster}")]
    DuplicateNode { cluster: String, node: String },
}
