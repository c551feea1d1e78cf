//! Remove nodes command.

use anyhow::Result;
use clap::Args;

use crate::executor::ExecutionReport;
use crate::output::print_report;

use super::CommandContext;

/// Remove nodes that are terminated, stopping or unreachable.
///
/// With REMOVENODES set, removes exactly the named nodes instead.
#[derive(Debug, Args)]
pub struct RemoveNodesCommand {
    /// Cluster name.
    cluster: String,

    /// Only consider nodes of this role.
    role: Option<String>,
}

impl RemoveNodesCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let executor = ctx.executor(&self.cluster)?;
        let request = ctx.removal_request(self.role.as_deref());

        let nodes = executor.plan_removals(&request).await?;
        let removal = executor.remove_phase(&nodes).await?;

        let report = ExecutionReport {
            cluster: self.cluster,
            dry_run: executor.is_dry_run(),
            removal: Some(removal),
            addition: None,
        };
        print_report(&report, ctx.format);

        Ok(())
    }
}
