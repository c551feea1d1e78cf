//! List nodes command.

use anyhow::Result;
use clap::Args;
use steward_reconcile::ProbeScope;

use crate::output::{print_output, NodeRow, OutputFormat};

use super::CommandContext;

/// List the nodes of a cluster.
#[derive(Debug, Args)]
pub struct ListNodesCommand {
    /// Cluster name.
    cluster: String,

    /// Show a table with role, state and address instead of names only.
    #[arg(short, long)]
    long: bool,

    /// Query the cloud provider for each node's state.
    #[arg(long)]
    status: bool,
}

impl ListNodesCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let executor = ctx.executor(&self.cluster)?;

        let scope = if self.status {
            ProbeScope::All
        } else {
            ProbeScope::Unprobed
        };
        let snapshot = executor.snapshot(scope).await?;

        if ctx.format == OutputFormat::Table && !self.long {
            for node in snapshot.nodes() {
                println!("{}", node.name);
            }
            return Ok(());
        }

        let rows: Vec<NodeRow> = snapshot.nodes().iter().map(NodeRow::from).collect();
        print_output(&rows, ctx.format);

        Ok(())
    }
}
