//! Orchestration backend abstraction.
//!
//! The backend owns cluster membership: it lists nodes, removes them and
//! grows the cluster. [`ElasticlusterBackend`] drives the elasticluster CLI;
//! [`MockBackend`] keeps membership in memory for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Errors from the orchestration backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("malformed node listing: {0}")]
    MalformedListing(String),

    #[error("{0}")]
    Rejected(String),
}

/// A node as the backend reports it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendNode {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub preferred_ip: Option<String>,
}

impl BackendNode {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            instance_id: None,
            preferred_ip: None,
        }
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn with_preferred_ip(mut self, ip: impl Into<String>) -> Self {
        self.preferred_ip = Some(ip.into());
        self
    }
}

/// Options for a single node removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Skip re-running cluster setup after this removal.
    pub skip_setup: bool,
}

/// Cluster orchestration operations.
#[async_trait]
pub trait OrchestrationBackend: Send + Sync {
    /// List the cluster's nodes in backend order.
    async fn list_nodes(&self, cluster: &str) -> Result<Vec<BackendNode>, BackendError>;

    /// Remove one node.
    async fn remove_node(
        &self,
        cluster: &str,
        node: &str,
        options: RemoveOptions,
    ) -> Result<(), BackendError>;

    /// Add `count` nodes of `role`.
    async fn add_nodes(&self, cluster: &str, role: &str, count: u32) -> Result<(), BackendError>;

    /// Re-run cluster setup.
    async fn run_setup(&self, cluster: &str) -> Result<(), BackendError>;
}

#[derive(Debug, Deserialize)]
struct NodeListing {
    #[serde(default)]
    nodes: BTreeMap<String, Vec<BackendNode>>,
}

/// Parse `elasticluster list-nodes --json` output.
///
/// Nodes are returned grouped by kind in kind order.
pub fn parse_node_listing(json: &str) -> Result<Vec<BackendNode>, BackendError> {
    let listing: NodeListing =
        serde_json::from_str(json).map_err(|e| BackendError::MalformedListing(e.to_string()))?;

    Ok(listing.nodes.into_values().flatten().collect())
}

/// Child stdout for mutating commands: our stderr.
fn progress_stdio() -> Stdio {
    Stdio::from(std::io::stderr())
}

/// Backend driving the elasticluster CLI.
#[derive(Debug, Clone)]
pub struct ElasticlusterBackend {
    program: PathBuf,
    verbosity: u8,
    template: String,
}

impl ElasticlusterBackend {
    pub fn new(program: impl Into<PathBuf>, verbosity: u8, template: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            verbosity,
            template: template.into(),
        }
    }

    fn command<I, S>(&self, args: I) -> (Command, String)
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut argv: Vec<OsString> = (0..self.verbosity).map(|_| OsString::from("-v")).collect();
        argv.extend(args.into_iter().map(Into::into));

        let command_line = std::iter::once(self.program.as_os_str().to_string_lossy().into_owned())
            .chain(argv.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ");

        let mut cmd = Command::new(&self.program);
        cmd.args(argv);
        (cmd, command_line)
    }

    fn spawn_error(&self, source: std::io::Error) -> BackendError {
        BackendError::Spawn {
            program: self.program.display().to_string(),
            source,
        }
    }

    /// Run a mutating command with its output on our stderr so progress
    /// stays visible while stdout carries only the report.
    async fn run_streamed<I, S>(&self, args: I) -> Result<(), BackendError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let (mut cmd, command_line) = self.command(args);
        info!(command = %command_line, "Running elasticluster");

        let status = cmd
            .stdin(Stdio::null())
            .stdout(progress_stdio())
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !status.success() {
            return Err(BackendError::CommandFailed {
                command: command_line,
                status: status.to_string(),
                stderr: String::new(),
            });
        }

        Ok(())
    }

    async fn run_captured<I, S>(&self, args: I) -> Result<Output, BackendError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let (mut cmd, command_line) = self.command(args);
        debug!(command = %command_line, "Running elasticluster");

        let output = cmd
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(BackendError::CommandFailed {
                command: command_line,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl OrchestrationBackend for ElasticlusterBackend {
    async fn list_nodes(&self, cluster: &str) -> Result<Vec<BackendNode>, BackendError> {
        let output = self.run_captured(["list-nodes", "--json", cluster]).await?;
        parse_node_listing(&String::from_utf8_lossy(&output.stdout))
    }

    async fn remove_node(
        &self,
        cluster: &str,
        node: &str,
        options: RemoveOptions,
    ) -> Result<(), BackendError> {
        let mut args = vec!["remove-node"];
        if options.skip_setup {
            args.push("--no-setup");
        }
        args.extend(["--yes", cluster, node]);
        self.run_streamed(args).await
    }

    async fn add_nodes(&self, cluster: &str, role: &str, count: u32) -> Result<(), BackendError> {
        let nodes = format!("{count}:{role}");
        self.run_streamed([
            "resize",
            cluster,
            "-a",
            nodes.as_str(),
            "-t",
            self.template.as_str(),
        ])
        .await
    }

    async fn run_setup(&self, cluster: &str) -> Result<(), BackendError> {
        self.run_streamed(["setup", cluster]).await
    }
}

/// A call recorded by [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    ListNodes,
    RemoveNode { node: String, skip_setup: bool },
    AddNodes { role: String, count: u32 },
    RunSetup,
}

impl BackendCall {
    /// Returns true for calls that change the cluster.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::ListNodes)
    }
}

#[derive(Debug, Default)]
struct MockState {
    nodes: Vec<BackendNode>,
    calls: Vec<BackendCall>,
    fail_removals: BTreeSet<String>,
    fail_additions: BTreeSet<String>,
    added: u64,
}

/// In-memory backend for testing.
///
/// Added nodes get generated names, instance ids and addresses.
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new(nodes: Vec<BackendNode>) -> Self {
        Self {
            state: Mutex::new(MockState {
                nodes,
                ..Default::default()
            }),
        }
    }

    /// Make removal of `node` fail.
    pub fn fail_removal_of(self, node: impl Into<String>) -> Self {
        self.with_state(|s| {
            s.fail_removals.insert(node.into());
        });
        self
    }

    /// Make additions of `role` fail.
    pub fn fail_additions_of(self, role: impl Into<String>) -> Self {
        self.with_state(|s| {
            s.fail_additions.insert(role.into());
        });
        self
    }

    /// Calls made so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.with_state(|s| s.calls.clone())
    }

    /// Current membership.
    pub fn nodes(&self) -> Vec<BackendNode> {
        self.with_state(|s| s.nodes.clone())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }
}

#[async_trait]
impl OrchestrationBackend for MockBackend {
    async fn list_nodes(&self, _cluster: &str) -> Result<Vec<BackendNode>, BackendError> {
        Ok(self.with_state(|s| {
            s.calls.push(BackendCall::ListNodes);
            s.nodes.clone()
        }))
    }

    async fn remove_node(
        &self,
        cluster: &str,
        node: &str,
        options: RemoveOptions,
    ) -> Result<(), BackendError> {
        self.with_state(|s| {
            s.calls.push(BackendCall::RemoveNode {
                node: node.to_string(),
                skip_setup: options.skip_setup,
            });

            if s.fail_removals.contains(node) {
                return Err(BackendError::Rejected(format!(
                    "[MOCK] removal of {node} configured to fail"
                )));
            }

            let before = s.nodes.len();
            s.nodes.retain(|n| n.name != node);
            if s.nodes.len() == before {
                return Err(BackendError::Rejected(format!(
                    "no node {node} in cluster {cluster}"
                )));
            }

            info!(cluster = %cluster, node = %node, "[MOCK] Removed node");
            Ok(())
        })
    }

    async fn add_nodes(&self, cluster: &str, role: &str, count: u32) -> Result<(), BackendError> {
        self.with_state(|s| {
            s.calls.push(BackendCall::AddNodes {
                role: role.to_string(),
                count,
            });

            if s.fail_additions.contains(role) {
                return Err(BackendError::Rejected(format!(
                    "[MOCK] additions of {role} configured to fail"
                )));
            }

            for _ in 0..count {
                s.added += 1;
                let n = s.added;
                s.nodes.push(
                    BackendNode::new(format!("{role}-new{n:03}"), role)
                        .with_instance_id(format!("mock-{n:016x}"))
                        .with_preferred_ip(format!("192.0.2.{}", n % 250 + 1)),
                );
            }

            info!(cluster = %cluster, role = %role, count, "[MOCK] Added nodes");
            Ok(())
        })
    }

    async fn run_setup(&self, cluster: &str) -> Result<(), BackendError> {
        self.with_state(|s| s.calls.push(BackendCall::RunSetup));
        debug!(cluster = %cluster, "[MOCK] Ran setup");
        Ok(())
    }
}
