//! Ensure size command.

use anyhow::Result;
use clap::Args;

use crate::executor::ExecutionReport;
use crate::output::print_report;

use super::CommandContext;

/// Add nodes until every configured role reaches its count.
///
/// Never removes nodes; surplus is only reported.
#[derive(Debug, Args)]
pub struct EnsureSizeCommand {
    /// Cluster name.
    cluster: String,
}

impl EnsureSizeCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let executor = ctx.executor(&self.cluster)?;
        let addition = executor.add_phase(None).await?;

        let report = ExecutionReport {
            cluster: self.cluster,
            dry_run: executor.is_dry_run(),
            removal: None,
            addition: Some(addition),
        };
        print_report(&report, ctx.format);

        Ok(())
    }
}
