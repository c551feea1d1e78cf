//! CLI commands.

mod ensure_size;
mod list_nodes;
mod reconcile;
mod remove_nodes;
mod sanitize;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use steward_reconcile::RemovalRequest;
use tracing::{debug, info};

use crate::backend::ElasticlusterBackend;
use crate::config::{default_config_path, ClusterConfig, RunToggles, ToolConfig};
use crate::executor::PlanExecutor;
use crate::output::OutputFormat;
use crate::status::GcloudStatusProvider;

/// stewardctl - keep elasticluster clusters at their configured size.
#[derive(Debug, Parser)]
#[command(name = "stewardctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Cluster configuration file.
    #[arg(long, global = true, env = "STEWARD_CONFIG")]
    config: Option<PathBuf>,

    /// Log and report what would be done without changing anything.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the nodes of a cluster.
    ListNodes(list_nodes::ListNodesCommand),

    /// Remove dead nodes (or the nodes named in REMOVENODES).
    RemoveNodes(remove_nodes::RemoveNodesCommand),

    /// Add nodes until every role reaches its configured count.
    EnsureSize(ensure_size::EnsureSizeCommand),

    /// Drop identity cache entries of addresses no longer in the cluster.
    SanitizeKnownHosts(sanitize::SanitizeCommand),

    /// Remove dead nodes, then grow the cluster back to size.
    Reconcile(reconcile::ReconcileCommand),
}

impl Cli {
    /// Returns true if logs should be JSON.
    pub fn log_json(&self) -> bool {
        self.log_json
    }

    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let toggles = RunToggles::from_env();
        let dry_run = self.dry_run || toggles.dry_run;
        if dry_run {
            info!("Dry run: no changes will be made");
        }

        let config_path = match self.config {
            Some(path) => path,
            None => default_config_path()?,
        };
        debug!(path = %config_path.display(), "Using cluster configuration");

        let ctx = CommandContext {
            format: self.format,
            config_path,
            dry_run,
            toggles,
        };

        match self.command {
            Commands::ListNodes(cmd) => cmd.run(ctx).await,
            Commands::RemoveNodes(cmd) => cmd.run(ctx).await,
            Commands::EnsureSize(cmd) => cmd.run(ctx).await,
            Commands::SanitizeKnownHosts(cmd) => cmd.run(ctx).await,
            Commands::Reconcile(cmd) => cmd.run(ctx).await,
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub format: OutputFormat,
    pub config_path: PathBuf,
    pub dry_run: bool,
    pub toggles: RunToggles,
}

impl CommandContext {
    /// Load the configuration of `cluster`.
    pub fn cluster_config(&self, cluster: &str) -> Result<Arc<ClusterConfig>> {
        ClusterConfig::load(&self.config_path, cluster).map(Arc::new)
    }

    /// Build an executor for `cluster` driving the real tools.
    pub fn executor(&self, cluster: &str) -> Result<PlanExecutor> {
        let config = self.cluster_config(cluster)?;
        let tools = ToolConfig::from_env()?;

        let backend = ElasticlusterBackend::new(
            &tools.elasticluster,
            tools.verbosity,
            config.template.clone(),
        );
        let status =
            GcloudStatusProvider::new(&tools.gcloud, config.project_id.clone(), config.zone.clone());
        let cache = config.identity_cache();

        Ok(PlanExecutor::new(
            config,
            Arc::new(backend),
            Arc::new(status),
            cache,
            self.dry_run,
        ))
    }

    /// Removal request for an optional role filter.
    ///
    /// Names in `REMOVENODES` take precedence over status-derived removal.
    pub fn removal_request(&self, role: Option<&str>) -> RemovalRequest {
        if self.toggles.remove_nodes.is_empty() {
            return RemovalRequest::by_status(role);
        }

        if let Some(role) = role {
            info!(role = %role, "REMOVENODES is set, ignoring role filter");
        }
        RemovalRequest::by_name(&self.toggles.remove_nodes)
    }
}
