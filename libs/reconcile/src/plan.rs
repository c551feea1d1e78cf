//! Plan inputs and outputs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::snapshot::Node;

/// How the nodes to remove are chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalRequest {
    /// Remove nodes whose lifecycle state makes them candidates,
    /// optionally restricted to one role.
    ByStatus { role: Option<String> },

    /// Remove exactly these nodes, whatever their state.
    ByName(BTreeSet<String>),
}

impl RemovalRequest {
    /// Status-derived removal for an optional role.
    pub fn by_status(role: Option<&str>) -> Self {
        Self::ByStatus {
            role: role.map(str::to_string),
        }
    }

    /// Explicit removal of the given names. Blank names are dropped.
    pub fn by_name<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::ByName(
            names
                .into_iter()
                .map(|n| n.as_ref().trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
        )
    }

    /// Role filter for status probing, if any.
    pub fn role_filter(&self) -> Option<&str> {
        match self {
            Self::ByStatus { role } => role.as_deref(),
            Self::ByName(_) => None,
        }
    }
}

/// Desired node count per role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredCounts(BTreeMap<String, u32>);

impl DesiredCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, role: impl Into<String>, count: u32) -> Option<u32> {
        self.0.insert(role.into(), count)
    }

    pub fn get(&self, role: &str) -> Option<u32> {
        self.0.get(role).copied()
    }

    pub fn contains(&self, role: &str) -> bool {
        self.0.contains_key(role)
    }

    /// Roles and counts in role order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(role, count)| (role.as_str(), *count))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<R: Into<String>> FromIterator<(R, u32)> for DesiredCounts {
    fn from_iter<T: IntoIterator<Item = (R, u32)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(r, c)| (r.into(), c)).collect())
    }
}

/// Non-fatal observation made while planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    /// More nodes of a role than configured. Never corrected automatically.
    OverProvisioned { role: String, have: u32, desired: u32 },

    /// Role present in the cluster but absent from the desired counts.
    Unmanaged { role: String, have: u32 },
}

impl std::fmt::Display for Advisory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OverProvisioned { role, have, desired } => write!(
                f,
                "there are more nodes of type {role} than configured ({have} > {desired})"
            ),
            Self::Unmanaged { role, have } => {
                write!(f, "node type {role} ({have} nodes) has no configured count")
            }
        }
    }
}

/// Addition half of a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Additions {
    /// Nodes to add per configured role (zero when none are needed).
    pub per_role: BTreeMap<String, u32>,

    pub advisories: Vec<Advisory>,
}

impl Additions {
    /// Total nodes to add.
    pub fn total(&self) -> u32 {
        self.per_role.values().sum()
    }

    /// Roles with a non-zero addition, in role order.
    pub fn pending(&self) -> impl Iterator<Item = (&str, u32)> {
        self.per_role
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(role, count)| (role.as_str(), *count))
    }
}

/// A reconciliation plan, built once and consumed once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Nodes to remove, in snapshot order.
    pub to_remove: Vec<Node>,

    /// Nodes to add per role.
    pub to_add: BTreeMap<String, u32>,

    pub advisories: Vec<Advisory>,
}

impl Plan {
    /// Returns true if the plan neither removes nor adds anything.
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.values().all(|count| *count == 0)
    }

    /// Names of the nodes to remove.
    pub fn removal_names(&self) -> impl Iterator<Item = &str> {
        self.to_remove.iter().map(|n| n.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_name_drops_blanks() {
        let request = RemovalRequest::by_name(["a", " ", "", " c "]);
        let RemovalRequest::ByName(names) = request else {
            panic!("expected ByName");
        };
        assert_eq!(names.len(), 2);
        assert!(names.contains("a"));
        assert!(names.contains("c"));
    }

    #[test]
    fn test_role_filter() {
        assert_eq!(
            RemovalRequest::by_status(Some("worker")).role_filter(),
            Some("worker")
        );
        assert_eq!(RemovalRequest::by_status(None).role_filter(), None);
        assert_eq!(RemovalRequest::by_name(["a"]).role_filter(), None);
    }

    #[test]
    fn test_plan_is_empty_with_zero_additions() {
        let mut plan = Plan::default();
        plan.to_add.insert("worker".to_string(), 0);
        assert!(plan.is_empty());

        plan.to_add.insert("master".to_string(), 1);
        assert!(!plan.is_empty());
    }

    #[test]
    fn test_additions_pending() {
        let additions = Additions {
            per_role: [("master".to_string(), 0), ("worker".to_string(), 2)]
                .into_iter()
                .collect(),
            advisories: vec![],
        };
        assert_eq!(additions.total(), 2);
        assert_eq!(additions.pending().collect::<Vec<_>>(), vec![("worker", 2)]);
    }
}
