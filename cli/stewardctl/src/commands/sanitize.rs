//! Sanitize known hosts command.

use anyhow::Result;
use clap::Args;

use crate::output::print_rebuild;

use super::CommandContext;

/// Rebuild the identity cache from the cluster's current addresses.
#[derive(Debug, Args)]
pub struct SanitizeCommand {
    /// Cluster name.
    cluster: String,
}

impl SanitizeCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let executor = ctx.executor(&self.cluster)?;
        let rebuild = executor.sanitize_identity_cache().await?;

        print_rebuild(&self.cluster, &rebuild, executor.is_dry_run(), ctx.format);

        Ok(())
    }
}
