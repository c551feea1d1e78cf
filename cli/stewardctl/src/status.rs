//! Cloud instance status queries.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use steward_reconcile::{classify, LifecycleState};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::backend::BackendNode;

/// Errors from a status query.
#[derive(Debug, Error)]
pub enum ProviderQueryError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("status query for {instance_id} exited with {status}: {stderr}")]
    CommandFailed {
        instance_id: String,
        status: String,
        stderr: String,
    },

    #[error("malformed status response for {instance_id}: {reason}")]
    Malformed { instance_id: String, reason: String },

    #[error("no such instance: {0}")]
    NotFound(String),
}

/// Source of raw instance status strings.
#[async_trait]
pub trait StatusProvider: Send + Sync {
    /// Raw provider status of an instance (e.g. `RUNNING`).
    async fn describe_instance(&self, instance_id: &str) -> Result<String, ProviderQueryError>;
}

/// Classify a backend node, querying its status if it has an instance id.
///
/// Query failures are logged and classified as `Unknown`; they never fail
/// the caller.
pub async fn probe_state(provider: &dyn StatusProvider, node: &BackendNode) -> LifecycleState {
    let Some(instance_id) = node.instance_id.as_deref().filter(|id| !id.is_empty()) else {
        debug!(node = %node.name, "Node has no instance id");
        return classify(None, false);
    };

    match provider.describe_instance(instance_id).await {
        Ok(raw) => {
            let state = classify(Some(&raw), true);
            debug!(node = %node.name, instance_id = %instance_id, status = %raw, %state, "Node status");
            state
        }
        Err(e) => {
            warn!(
                node = %node.name,
                instance_id = %instance_id,
                error = %e,
                "Status query failed, treating node as unknown"
            );
            classify(None, true)
        }
    }
}

#[derive(Debug, Deserialize)]
struct InstanceDescription {
    status: String,
}

/// Parse `gcloud compute instances describe --format json` output.
pub fn parse_instance_status(instance_id: &str, json: &str) -> Result<String, ProviderQueryError> {
    serde_json::from_str::<InstanceDescription>(json)
        .map(|d| d.status)
        .map_err(|e| ProviderQueryError::Malformed {
            instance_id: instance_id.to_string(),
            reason: e.to_string(),
        })
}

/// Status provider backed by the gcloud CLI.
#[derive(Debug, Clone)]
pub struct GcloudStatusProvider {
    program: PathBuf,
    project_id: String,
    zone: String,
}

impl GcloudStatusProvider {
    pub fn new(
        program: impl Into<PathBuf>,
        project_id: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            project_id: project_id.into(),
            zone: zone.into(),
        }
    }
}

#[async_trait]
impl StatusProvider for GcloudStatusProvider {
    async fn describe_instance(&self, instance_id: &str) -> Result<String, ProviderQueryError> {
        let output = Command::new(&self.program)
            .args(["--project", self.project_id.as_str()])
            .args(["compute", "instances", "describe", instance_id])
            .args(["--zone", self.zone.as_str(), "--format", "json"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ProviderQueryError::Spawn {
                program: self.program.display().to_string(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(ProviderQueryError::CommandFailed {
                instance_id: instance_id.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_instance_status(instance_id, &String::from_utf8_lossy(&output.stdout))
    }
}

/// Fixed status table for testing.
///
/// Instances not in the table get the default status, or `NotFound` when
/// there is none.
#[derive(Debug, Default)]
pub struct StaticStatusProvider {
    statuses: Mutex<HashMap<String, String>>,
    default: Option<String>,
}

impl StaticStatusProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `status` for instances not in the table.
    pub fn with_default(mut self, status: impl Into<String>) -> Self {
        self.default = Some(status.into());
        self
    }

    pub fn with_status(self, instance_id: impl Into<String>, status: impl Into<String>) -> Self {
        self.set_status(instance_id, status);
        self
    }

    pub fn set_status(&self, instance_id: impl Into<String>, status: impl Into<String>) {
        let mut statuses = match self.statuses.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        statuses.insert(instance_id.into(), status.into());
    }
}

#[async_trait]
impl StatusProvider for StaticStatusProvider {
    async fn describe_instance(&self, instance_id: &str) -> Result<String, ProviderQueryError> {
        let statuses = match self.statuses.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        statuses
            .get(instance_id)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| ProviderQueryError::NotFound(instance_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instance_status() {
        let json = r#"{"id": "123", "name": "worker001", "status": "TERMINATED", "zone": "z"}"#;
        assert_eq!(parse_instance_status("123", json).unwrap(), "TERMINATED");

        assert!(matches!(
            parse_instance_status("123", r#"{"id": "123"}"#),
            Err(ProviderQueryError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_probe_state() {
        let provider = StaticStatusProvider::new()
            .with_status("1", "RUNNING")
            .with_status("2", "TERMINATED")
            .with_status("3", "SUSPENDING");

        let node = |id: &str| BackendNode::new(format!("n{id}"), "worker").with_instance_id(id);

        assert_eq!(probe_state(&provider, &node("1")).await, LifecycleState::Healthy);
        assert_eq!(probe_state(&provider, &node("2")).await, LifecycleState::Terminated);
        assert_eq!(probe_state(&provider, &node("3")).await, LifecycleState::Stopping);
    }

    #[tokio::test]
    async fn test_probe_state_downgrades_failures() {
        let provider = StaticStatusProvider::new();

        let unknown_instance = BackendNode::new("a", "worker").with_instance_id("404");
        assert_eq!(
            probe_state(&provider, &unknown_instance).await,
            LifecycleState::Unknown
        );

        let no_id = BackendNode::new("b", "worker");
        let provider = provider.with_default("RUNNING");
        assert_eq!(probe_state(&provider, &no_id).await, LifecycleState::Unknown);
    }
}
