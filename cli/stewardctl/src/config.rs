//! Configuration.
//!
//! Handles:
//! - Cluster configuration (desired counts, cloud location, cache path)
//! - External tool locations
//! - Per-run toggles (`DRYRUN`, `REMOVENODES`)

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::{BaseDirs, ProjectDirs};
use serde::Deserialize;
use steward_known_hosts::HostIdentityCache;
use steward_reconcile::{DesiredCounts, RemovalPolicy};

use crate::error::StewardError;

/// Cluster configuration file name.
const CONFIG_FILE: &str = "clusters.toml";

/// Suffix of desired-count keys (`worker_nodes = 4`).
const NODES_SUFFIX: &str = "_nodes";

/// Get the default config file path.
pub fn default_config_path() -> Result<PathBuf> {
    ProjectDirs::from("io", "steward", "steward")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

/// Default known-hosts location used by elasticluster.
fn default_known_hosts(home: &Path, cluster_name: &str) -> PathBuf {
    home.join(".elasticluster")
        .join("storage")
        .join(format!("{cluster_name}.known_hosts"))
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    clusters: BTreeMap<String, ClusterSection>,
}

#[derive(Debug, Deserialize)]
struct ClusterSection {
    project_id: String,
    zone: String,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    known_hosts: Option<PathBuf>,
    #[serde(default = "default_unknown_is_removable")]
    unknown_is_removable: bool,
    #[serde(flatten)]
    extra: BTreeMap<String, toml::Value>,
}

fn default_unknown_is_removable() -> bool {
    RemovalPolicy::default().unknown_is_removable
}

/// Configuration of one cluster, loaded once per process and passed
/// explicitly to whatever needs it.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub cluster_name: String,

    /// Cloud project the instances live in.
    pub project_id: String,

    /// Cloud zone the instances live in.
    pub zone: String,

    /// Template used when growing the cluster.
    pub template: String,

    /// Identity cache file.
    pub known_hosts_path: PathBuf,

    pub desired: DesiredCounts,

    pub policy: RemovalPolicy,
}

impl ClusterConfig {
    /// Load the configuration of `cluster_name` from `path`.
    pub fn load(path: &Path, cluster_name: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        let home = BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());

        Self::from_toml_str(&contents, cluster_name, home.as_deref())
            .map_err(|e| match e.downcast::<StewardError>() {
                Ok(StewardError::UnknownCluster { cluster, .. }) => {
                    StewardError::UnknownCluster {
                        cluster,
                        path: path.to_path_buf(),
                    }
                    .into()
                }
                Ok(other) => other.into(),
                Err(e) => e.context(format!("Failed to parse config from {:?}", path)),
            })
    }

    /// Parse the configuration of `cluster_name` from TOML.
    ///
    /// `home` resolves the default known-hosts path when none is configured.
    pub fn from_toml_str(contents: &str, cluster_name: &str, home: Option<&Path>) -> Result<Self> {
        let mut file: ConfigFile = toml::from_str(contents).context("invalid cluster TOML")?;

        let section = file
            .clusters
            .remove(cluster_name)
            .ok_or_else(|| StewardError::UnknownCluster {
                cluster: cluster_name.to_string(),
                path: PathBuf::new(),
            })?;

        let desired = desired_counts(cluster_name, &section.extra)?;

        let known_hosts_path = match section.known_hosts {
            Some(path) => path,
            None => {
                let home = home.ok_or_else(|| {
                    anyhow::anyhow!(
                        "No home directory; set known_hosts for cluster {}",
                        cluster_name
                    )
                })?;
                default_known_hosts(home, cluster_name)
            }
        };

        Ok(Self {
            cluster_name: cluster_name.to_string(),
            project_id: section.project_id,
            zone: section.zone,
            template: section.template.unwrap_or_else(|| cluster_name.to_string()),
            known_hosts_path,
            desired,
            policy: RemovalPolicy {
                unknown_is_removable: section.unknown_is_removable,
            },
        })
    }

    /// The cluster's identity cache.
    pub fn identity_cache(&self) -> HostIdentityCache {
        HostIdentityCache::new(&self.known_hosts_path)
    }
}

/// Collect `<kind>_nodes` keys into desired counts.
fn desired_counts(
    cluster_name: &str,
    extra: &BTreeMap<String, toml::Value>,
) -> Result<DesiredCounts, StewardError> {
    let mut desired = DesiredCounts::new();

    for (key, value) in extra {
        let Some(kind) = key.strip_suffix(NODES_SUFFIX) else {
            tracing::debug!(cluster = %cluster_name, key = %key, "Ignoring unknown config key");
            continue;
        };

        let count = value
            .as_integer()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| StewardError::InvalidConfig {
                cluster: cluster_name.to_string(),
                reason: format!("{key} must be a non-negative integer, got {value}"),
            })?;

        if kind.is_empty() {
            return Err(StewardError::InvalidConfig {
                cluster: cluster_name.to_string(),
                reason: format!("{key} does not name a node type"),
            });
        }

        desired.insert(kind, count);
    }

    Ok(desired)
}

/// External tool settings.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// elasticluster executable.
    pub elasticluster: PathBuf,

    /// gcloud executable.
    pub gcloud: PathBuf,

    /// Number of `-v` flags passed to elasticluster.
    pub verbosity: u8,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            elasticluster: PathBuf::from("elasticluster"),
            gcloud: PathBuf::from("gcloud"),
            verbosity: 3,
        }
    }
}

impl ToolConfig {
    /// Load tool settings from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let elasticluster = std::env::var_os("STEWARD_ELASTICLUSTER")
            .map(PathBuf::from)
            .unwrap_or(defaults.elasticluster);

        let gcloud = std::env::var_os("STEWARD_GCLOUD")
            .map(PathBuf::from)
            .unwrap_or(defaults.gcloud);

        let verbosity: u8 = std::env::var("STEWARD_VERBOSITY")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("STEWARD_VERBOSITY must be a small integer.")?
            .unwrap_or(defaults.verbosity);

        Ok(Self {
            elasticluster,
            gcloud,
            verbosity,
        })
    }
}

/// Per-run toggles read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunToggles {
    /// Compute and log, but mutate nothing.
    pub dry_run: bool,

    /// Explicit node names to remove instead of status-derived removal.
    pub remove_nodes: Vec<String>,
}

impl RunToggles {
    /// Read `DRYRUN` and `REMOVENODES`.
    pub fn from_env() -> Self {
        Self::from_values(
            std::env::var("DRYRUN").ok().as_deref(),
            std::env::var("REMOVENODES").ok().as_deref(),
        )
    }

    pub fn from_values(dry_run: Option<&str>, remove_nodes: Option<&str>) -> Self {
        Self {
            dry_run: dry_run.is_some_and(is_truthy),
            remove_nodes: remove_nodes
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// Anything but an empty string, `0`, `false`, `no` or `off` is truthy.
pub fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    !(value.is_empty()
        || value == "0"
        || value.eq_ignore_ascii_case("false")
        || value.eq_ignore_ascii_case("no")
        || value.eq_ignore_ascii_case("off"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[clusters.gridengine]
project_id = "my-project"
zone = "us-central1-f"
master_nodes = 1
worker_nodes = 4
image_user = "ubuntu"

[clusters.slurm]
project_id = "other"
zone = "europe-west1-b"
template = "slurm-small"
known_hosts = "/tmp/slurm.known_hosts"
unknown_is_removable = false
compute_nodes = 2
"#;

    #[test]
    fn test_cluster_config_parse() {
        let config =
            ClusterConfig::from_toml_str(SAMPLE, "gridengine", Some(Path::new("/home/u"))).unwrap();

        assert_eq!(config.project_id, "my-project");
        assert_eq!(config.zone, "us-central1-f");
        assert_eq!(config.template, "gridengine");
        assert_eq!(config.desired.get("worker"), Some(4));
        assert_eq!(config.desired.get("master"), Some(1));
        assert_eq!(config.desired.len(), 2);
        assert!(config.policy.unknown_is_removable);
        assert_eq!(
            config.known_hosts_path,
            PathBuf::from("/home/u/.elasticluster/storage/gridengine.known_hosts")
        );
    }

    #[test]
    fn test_cluster_config_overrides() {
        let config = ClusterConfig::from_toml_str(SAMPLE, "slurm", None).unwrap();

        assert_eq!(config.template, "slurm-small");
        assert_eq!(config.known_hosts_path, PathBuf::from("/tmp/slurm.known_hosts"));
        assert!(!config.policy.unknown_is_removable);
        assert_eq!(config.desired.get("compute"), Some(2));
    }

    #[test]
    fn test_unknown_cluster() {
        let err = ClusterConfig::from_toml_str(SAMPLE, "missing", None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StewardError>(),
            Some(StewardError::UnknownCluster { cluster, .. }) if cluster == "missing"
        ));
    }

    #[test]
    fn test_invalid_node_count() {
        let contents = r#"
[clusters.c1]
project_id = "p"
zone = "z"
known_hosts = "/tmp/c1"
worker_nodes = -1
"#;
        let err = ClusterConfig::from_toml_str(contents, "c1", None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StewardError>(),
            Some(StewardError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_truthy_values() {
        for value in ["1", "yes", "true", "TRUE", "on", "anything"] {
            assert!(is_truthy(value), "{value} should be truthy");
        }
        for value in ["", " ", "0", "false", "False", "no", "off"] {
            assert!(!is_truthy(value), "{value:?} should be falsy");
        }
    }

    #[test]
    fn test_run_toggles() {
        let toggles = RunToggles::from_values(Some("1"), Some("node1, node2,,"));
        assert!(toggles.dry_run);
        assert_eq!(toggles.remove_nodes, vec!["node1", "node2"]);

        let toggles = RunToggles::from_values(None, None);
        assert_eq!(toggles, RunToggles::default());

        let toggles = RunToggles::from_values(Some("0"), Some(""));
        assert!(!toggles.dry_run);
        assert!(toggles.remove_nodes.is_empty());
    }
}
