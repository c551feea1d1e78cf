//! Reconcile command (full pass).

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::output::print_report;

use super::CommandContext;

/// Remove dead nodes, then grow the cluster back to its configured size.
#[derive(Debug, Args)]
pub struct ReconcileCommand {
    /// Cluster name.
    cluster: String,

    /// Only consider nodes of this role for removal.
    role: Option<String>,
}

impl ReconcileCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let executor = ctx.executor(&self.cluster)?;
        let request = ctx.removal_request(self.role.as_deref());

        let plan = executor.plan(&request).await?;
        if plan.is_empty() {
            info!(cluster = %self.cluster, "Cluster already converged");
        }

        let report = executor.execute(plan).await?;
        print_report(&report, ctx.format);

        Ok(())
    }
}
