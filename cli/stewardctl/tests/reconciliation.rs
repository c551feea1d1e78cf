//! End-to-end reconciliation passes against the in-memory backend.

use std::fs;
use std::sync::Arc;

use steward_known_hosts::{HostIdentityCache, KnownHosts, KnownHostsError, Rebuild};
use steward_reconcile::{DesiredCounts, RemovalPolicy, RemovalRequest};
use stewardctl::backend::{BackendCall, BackendNode, MockBackend};
use stewardctl::executor::{CacheAction, StepStatus};
use stewardctl::{ClusterConfig, PlanExecutor, StaticStatusProvider, StewardError};
use tempfile::TempDir;

struct Harness {
    backend: Arc<MockBackend>,
    status: Arc<StaticStatusProvider>,
    config: Arc<ClusterConfig>,
    _dir: TempDir,
}

impl Harness {
    fn new(backend: MockBackend, desired: DesiredCounts) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = ClusterConfig {
            cluster_name: "gridengine".to_string(),
            project_id: "my-project".to_string(),
            zone: "us-central1-f".to_string(),
            template: "gridengine".to_string(),
            known_hosts_path: dir.path().join("gridengine.known_hosts"),
            desired,
            policy: RemovalPolicy::default(),
        };

        Self {
            backend: Arc::new(backend),
            status: Arc::new(StaticStatusProvider::new().with_default("RUNNING")),
            config: Arc::new(config),
            _dir: dir,
        }
    }

    fn cache(&self) -> HostIdentityCache {
        self.config.identity_cache()
    }

    fn executor(&self, dry_run: bool) -> PlanExecutor {
        PlanExecutor::new(
            self.config.clone(),
            self.backend.clone(),
            self.status.clone(),
            self.cache(),
            dry_run,
        )
    }

    fn seed_cache(&self, addresses: &[&str]) {
        let mut known = KnownHosts::new();
        for address in addresses {
            known.insert(*address, "ssh-ed25519", vec![7, 7, 7]);
            known.insert(*address, "ssh-rsa", vec![8, 8, 8]);
        }
        self.cache().save(&known).unwrap();
    }

    fn mutating_calls(&self) -> Vec<BackendCall> {
        self.backend
            .calls()
            .into_iter()
            .filter(BackendCall::is_mutating)
            .collect()
    }
}

fn worker(name: &str, address: &str) -> BackendNode {
    BackendNode::new(name, "worker")
        .with_instance_id(format!("i-{name}"))
        .with_preferred_ip(address)
}

fn workers(count: u32) -> DesiredCounts {
    [("worker", count)].into_iter().collect()
}

/// a is terminated, b is running; two workers wanted.
fn replace_one_worker() -> Harness {
    let harness = Harness::new(
        MockBackend::new(vec![worker("a", "10.0.0.1"), worker("b", "10.0.0.2")]),
        workers(2),
    );
    harness.status.set_status("i-a", "TERMINATED");
    harness.seed_cache(&["10.0.0.1", "10.0.0.2"]);
    harness
}

#[tokio::test]
async fn pass_replaces_dead_node_and_converges() {
    let harness = replace_one_worker();
    let executor = harness.executor(false);
    let request = RemovalRequest::by_status(None);

    let plan = executor.plan(&request).await.unwrap();
    assert_eq!(plan.removal_names().collect::<Vec<_>>(), vec!["a"]);
    assert_eq!(plan.to_add.get("worker"), Some(&1));

    let report = executor.execute(plan).await.unwrap();
    assert!(!report.has_failures());

    let removal = report.removal.as_ref().unwrap();
    assert_eq!(removal.steps.len(), 1);
    assert_eq!(removal.steps[0].status, StepStatus::Done);
    assert_eq!(removal.steps[0].cache, CacheAction::Purged { keys: 2 });
    assert_eq!(removal.setup, Some(StepStatus::Done));

    let addition = report.addition.as_ref().unwrap();
    assert_eq!(addition.additions.per_role.get("worker"), Some(&1));

    assert_eq!(
        harness.mutating_calls(),
        vec![
            BackendCall::RemoveNode {
                node: "a".to_string(),
                skip_setup: true,
            },
            BackendCall::RunSetup,
            BackendCall::AddNodes {
                role: "worker".to_string(),
                count: 1,
            },
        ]
    );

    let known = harness.cache().load().unwrap().unwrap();
    assert!(!known.contains("10.0.0.1"));
    assert_eq!(known.lookup("10.0.0.2").map(|keys| keys.len()), Some(2));

    // Second pass has nothing to do
    let plan = executor.plan(&request).await.unwrap();
    assert!(plan.is_empty());
}

#[tokio::test]
async fn converged_pass_is_idempotent() {
    let harness = Harness::new(
        MockBackend::new(vec![worker("a", "10.0.0.1"), worker("b", "10.0.0.2")]),
        workers(2),
    );
    harness.seed_cache(&["10.0.0.1", "10.0.0.2"]);
    let before = fs::read(harness.cache().path()).unwrap();

    let executor = harness.executor(false);
    for _ in 0..2 {
        let plan = executor.plan(&RemovalRequest::by_status(None)).await.unwrap();
        assert!(plan.is_empty());
        let report = executor.execute(plan).await.unwrap();
        assert!(!report.has_failures());
    }

    assert!(harness.mutating_calls().is_empty());
    assert_eq!(fs::read(harness.cache().path()).unwrap(), before);
}

#[tokio::test]
async fn failed_removal_halts_removals_but_not_additions() {
    let harness = Harness::new(
        MockBackend::new(vec![
            worker("a", "10.0.0.1"),
            worker("b", "10.0.0.2"),
            worker("c", "10.0.0.3"),
        ])
        .fail_removal_of("a"),
        workers(4),
    );
    harness.status.set_status("i-a", "TERMINATED");
    harness.status.set_status("i-c", "STOPPED");
    harness.seed_cache(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);

    let executor = harness.executor(false);
    let plan = executor.plan(&RemovalRequest::by_status(None)).await.unwrap();
    assert_eq!(plan.removal_names().collect::<Vec<_>>(), vec!["a", "c"]);

    let report = executor.execute(plan).await.unwrap();

    let removal = report.removal.as_ref().unwrap();
    let statuses: Vec<_> = removal.steps.iter().map(|s| s.status).collect();
    assert_eq!(statuses, vec![StepStatus::Failed, StepStatus::Skipped]);
    assert_eq!(removal.setup, None);

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].operation, "remove_node");
    assert_eq!(failures[0].target, "a");

    // Three workers still listed, so one is added
    assert_eq!(
        harness.mutating_calls(),
        vec![
            BackendCall::RemoveNode {
                node: "a".to_string(),
                skip_setup: true,
            },
            BackendCall::AddNodes {
                role: "worker".to_string(),
                count: 1,
            },
        ]
    );

    let known = harness.cache().load().unwrap().unwrap();
    assert_eq!(known.hosts().count(), 3);
}

#[tokio::test]
async fn dry_run_matches_real_run_without_side_effects() {
    let dry = replace_one_worker();
    let real = replace_one_worker();
    let cache_before = fs::read(dry.cache().path()).unwrap();

    let request = RemovalRequest::by_status(None);

    let dry_executor = dry.executor(true);
    let dry_plan = dry_executor.plan(&request).await.unwrap();
    let dry_report = dry_executor.execute(dry_plan.clone()).await.unwrap();

    let real_executor = real.executor(false);
    let real_plan = real_executor.plan(&request).await.unwrap();
    let real_report = real_executor.execute(real_plan.clone()).await.unwrap();

    assert_eq!(dry_plan, real_plan);
    assert!(dry_report.dry_run);

    assert!(dry.mutating_calls().is_empty());
    assert_eq!(fs::read(dry.cache().path()).unwrap(), cache_before);

    let dry_removal = dry_report.removal.as_ref().unwrap();
    let real_removal = real_report.removal.as_ref().unwrap();
    assert_eq!(
        dry_removal.removed().collect::<Vec<_>>(),
        real_removal.removed().collect::<Vec<_>>()
    );
    assert!(dry_removal
        .steps
        .iter()
        .all(|s| s.status == StepStatus::DryRun && s.cache == CacheAction::Untouched));

    assert_eq!(
        dry_report.addition.as_ref().unwrap().additions,
        real_report.addition.as_ref().unwrap().additions
    );
}

#[tokio::test]
async fn removal_by_name_ignores_status() {
    let harness = Harness::new(
        MockBackend::new(vec![
            worker("a", "10.0.0.1"),
            worker("b", "10.0.0.2"),
            worker("c", "10.0.0.3"),
        ]),
        workers(3),
    );
    harness.seed_cache(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);

    let executor = harness.executor(false);
    let nodes = executor
        .plan_removals(&RemovalRequest::by_name(["c", "a"]))
        .await
        .unwrap();
    let removal = executor.remove_phase(&nodes).await.unwrap();

    assert_eq!(removal.removed().collect::<Vec<_>>(), vec!["a", "c"]);
    let known = harness.cache().load().unwrap().unwrap();
    assert_eq!(known.hosts().collect::<Vec<_>>(), vec!["10.0.0.2"]);
}

#[tokio::test]
async fn removed_node_without_address_drops_cache() {
    let harness = Harness::new(
        MockBackend::new(vec![
            BackendNode::new("a", "worker").with_instance_id("i-a"),
            worker("b", "10.0.0.2"),
        ]),
        workers(2),
    );
    harness.status.set_status("i-a", "TERMINATED");
    harness.seed_cache(&["10.0.0.2"]);

    let executor = harness.executor(false);
    let report = executor
        .execute(executor.plan(&RemovalRequest::by_status(None)).await.unwrap())
        .await
        .unwrap();

    let removal = report.removal.as_ref().unwrap();
    assert_eq!(removal.steps[0].cache, CacheAction::Deleted { existed: true });
    assert!(!harness.cache().path().exists());
}

#[tokio::test]
async fn unreadable_cache_fails_the_pass() {
    let harness = replace_one_worker();
    fs::write(harness.cache().path(), "not a known hosts line\n").unwrap();

    let executor = harness.executor(false);
    let plan = executor.plan(&RemovalRequest::by_status(None)).await.unwrap();
    let result = executor.execute(plan).await;

    assert!(matches!(
        result,
        Err(StewardError::Cache(KnownHostsError::Unreadable { .. }))
    ));
    assert_eq!(
        fs::read_to_string(harness.cache().path()).unwrap(),
        "not a known hosts line\n"
    );
    // The dead node is still there to retry once the cache is fixed
    assert!(harness.mutating_calls().is_empty());
    assert_eq!(harness.backend.nodes().len(), 2);
}

#[tokio::test]
async fn unknown_nodes_kept_when_policy_says_so() {
    let harness = Harness::new(
        MockBackend::new(vec![
            worker("a", "10.0.0.1"),
            BackendNode::new("b", "worker"),
        ]),
        workers(2),
    );
    harness.status.set_status("i-a", "SOMETHING_NEW");

    let config = ClusterConfig {
        policy: RemovalPolicy {
            unknown_is_removable: false,
        },
        ..(*harness.config).clone()
    };
    let executor = PlanExecutor::new(
        Arc::new(config),
        harness.backend.clone(),
        harness.status.clone(),
        harness.cache(),
        false,
    );

    let nodes = executor
        .plan_removals(&RemovalRequest::by_status(None))
        .await
        .unwrap();
    assert!(nodes.is_empty());

    let nodes = harness
        .executor(false)
        .plan_removals(&RemovalRequest::by_status(None))
        .await
        .unwrap();
    assert_eq!(nodes.len(), 2);
}

#[test]
fn cluster_config_loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clusters.toml");
    fs::write(
        &path,
        r#"
[clusters.gridengine]
project_id = "my-project"
zone = "us-central1-f"
known_hosts = "/var/lib/steward/gridengine.known_hosts"
worker_nodes = 4
"#,
    )
    .unwrap();

    let config = ClusterConfig::load(&path, "gridengine").unwrap();
    assert_eq!(config.desired.get("worker"), Some(4));
    assert_eq!(config.template, "gridengine");

    let err = ClusterConfig::load(&path, "slurm").unwrap_err();
    match err.downcast_ref::<StewardError>() {
        Some(StewardError::UnknownCluster { cluster, path: p }) => {
            assert_eq!(cluster, "slurm");
            assert_eq!(p, &path);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

const HASHED_10_0_0_1: &str = "|1|DoM3hY36v/l4Ab7coSlWZqI3PUM=|0VakFWTEOEYAO7riiDsFVEjMaCI=";
const ED25519: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl";

#[tokio::test]
async fn sanitize_keeps_hashed_entries_of_live_nodes() {
    let harness = Harness::new(
        MockBackend::new(vec![worker("a", "10.0.0.1")]),
        workers(1),
    );
    fs::write(
        harness.cache().path(),
        format!("{HASHED_10_0_0_1} ssh-ed25519 {ED25519}\nold,10.0.0.9 ssh-ed25519 {ED25519}\n"),
    )
    .unwrap();

    let rebuild = harness.executor(false).sanitize_identity_cache().await.unwrap();

    assert_eq!(
        rebuild,
        Rebuild::Rewritten {
            kept_hosts: 1,
            kept_keys: 1,
            dropped_hosts: 1,
        }
    );
    let known = harness.cache().load().unwrap().unwrap();
    assert!(known.contains("10.0.0.1"));
    assert!(!known.contains("old"));
    assert_eq!(known.hosts().collect::<Vec<_>>(), vec![HASHED_10_0_0_1]);
}

#[tokio::test]
async fn removal_purges_alias_line_of_dead_node() {
    let harness = replace_one_worker();
    fs::write(
        harness.cache().path(),
        format!("node-a,10.0.0.1 ssh-ed25519 {ED25519}\n10.0.0.2 ssh-ed25519 {ED25519}\n"),
    )
    .unwrap();

    let executor = harness.executor(false);
    let plan = executor.plan(&RemovalRequest::by_status(None)).await.unwrap();
    let report = executor.execute(plan).await.unwrap();

    let removal = report.removal.as_ref().unwrap();
    assert_eq!(removal.steps[0].cache, CacheAction::Purged { keys: 1 });
    let known = harness.cache().load().unwrap().unwrap();
    assert!(!known.contains("node-a"));
    assert!(!known.contains("10.0.0.1"));
    assert!(known.contains("10.0.0.2"));
}
