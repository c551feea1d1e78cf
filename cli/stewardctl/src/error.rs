//! Error handling and display for the CLI.

use std::path::PathBuf;

use colored::Colorize;
use steward_known_hosts::KnownHostsError;
use steward_reconcile::ReconcileError;
use thiserror::Error;

use crate::backend::BackendError;

/// Reconciler errors.
#[derive(Debug, Error)]
pub enum StewardError {
    #[error("Cluster '{cluster}' is not configured")]
    UnknownCluster { cluster: String, path: PathBuf },

    #[error("Invalid configuration for cluster {cluster}: {reason}")]
    InvalidConfig { cluster: String, reason: String },

    #[error("Failed to take snapshot of cluster {cluster}: {source}")]
    Snapshot {
        cluster: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Identity cache error: {0}")]
    Cache(#[from] KnownHostsError),
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    let Some(steward_err) = err.downcast_ref::<StewardError>() else {
        return;
    };

    match steward_err {
        StewardError::UnknownCluster { path, .. } if !path.as_os_str().is_empty() => {
            eprintln!(
                "\n{}",
                format!(
                    "Hint: Add a [clusters.<name>] section to {}.",
                    path.display()
                )
                .yellow()
            );
        }
        StewardError::Snapshot {
            source: BackendError::Spawn { program, .. },
            ..
        } => {
            eprintln!(
                "\n{}",
                format!(
                    "Hint: Is {} installed? Set STEWARD_ELASTICLUSTER to its path.",
                    program
                )
                .yellow()
            );
        }
        StewardError::Cache(KnownHostsError::Unreadable { path, .. }) => {
            eprintln!(
                "\n{}",
                format!(
                    "Hint: Delete {}; SSH will repopulate it on the next connection.",
                    path.display()
                )
                .yellow()
            );
        }
        _ => {}
    }
}
