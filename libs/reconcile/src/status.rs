//! Instance status classification.
//!
//! Cloud providers report free-form instance status strings. Everything
//! downstream works with the coarse [`LifecycleState`] produced here by a
//! single explicit table; no other code compares raw status strings.

use serde::{Deserialize, Serialize};

/// Coarse lifecycle state of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Instance is up (or on its way up) and should be kept.
    Healthy,

    /// Instance is shutting down.
    Stopping,

    /// Instance is gone or stopped.
    Terminated,

    /// Status could not be determined.
    Unknown,
}

impl LifecycleState {
    /// Returns true if a node in this state should be removed under `policy`.
    pub fn is_removal_candidate(&self, policy: &RemovalPolicy) -> bool {
        match self {
            Self::Healthy => false,
            Self::Stopping | Self::Terminated => true,
            Self::Unknown => policy.unknown_is_removable,
        }
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Stopping => "stopping",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy knobs for status-derived removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalPolicy {
    /// Treat nodes with an undeterminable status as dead.
    ///
    /// A node that is still starting can report no usable status, so this
    /// assumes nobody else is mutating the cluster concurrently.
    pub unknown_is_removable: bool,
}

impl Default for RemovalPolicy {
    fn default() -> Self {
        Self {
            unknown_is_removable: true,
        }
    }
}

/// Provider status strings and the state each maps to.
///
/// Values are GCE instance statuses. Anything not listed is `Unknown`.
const STATUS_TABLE: &[(&str, LifecycleState)] = &[
    ("PROVISIONING", LifecycleState::Healthy),
    ("STAGING", LifecycleState::Healthy),
    ("RUNNING", LifecycleState::Healthy),
    ("REPAIRING", LifecycleState::Healthy),
    ("STOPPING", LifecycleState::Stopping),
    ("SUSPENDING", LifecycleState::Stopping),
    ("TERMINATED", LifecycleState::Terminated),
    ("STOPPED", LifecycleState::Terminated),
    ("SUSPENDED", LifecycleState::Terminated),
];

/// Classify a raw provider status.
///
/// `raw` is `None` when the provider could not be queried. A node without an
/// instance id cannot be queried at all, so it is always `Unknown`.
pub fn classify(raw: Option<&str>, has_instance_id: bool) -> LifecycleState {
    if !has_instance_id {
        return LifecycleState::Unknown;
    }

    let Some(raw) = raw else {
        return LifecycleState::Unknown;
    };

    let raw = raw.trim();
    STATUS_TABLE
        .iter()
        .find(|(status, _)| status.eq_ignore_ascii_case(raw))
        .map(|(_, state)| *state)
        .unwrap_or(LifecycleState::Unknown)
}
