//! Output formatting for CLI commands.

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use steward_known_hosts::Rebuild;
use steward_reconcile::{Advisory, Node};
use tabled::{Table, Tabled};

use crate::executor::{AdditionOutcome, ExecutionReport, RemovalOutcome, StepStatus};

const CLI_SCHEMA_VERSION: &str = "steward.cli.v1";

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

/// Table row for a cluster node.
#[derive(Debug, Serialize, Tabled)]
pub struct NodeRow {
    #[tabled(rename = "NAME")]
    pub name: String,
    #[tabled(rename = "ROLE")]
    pub role: String,
    #[tabled(rename = "STATE")]
    pub state: String,
    #[tabled(rename = "ADDRESS")]
    pub address: String,
    #[tabled(rename = "INSTANCE")]
    pub instance_id: String,
}

impl From<&Node> for NodeRow {
    fn from(node: &Node) -> Self {
        Self {
            name: node.name.clone(),
            role: node.role.clone(),
            state: node.state.to_string(),
            address: node.preferred_address.clone().unwrap_or_else(|| "-".to_string()),
            instance_id: node.id.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Print data in the specified format.
pub fn print_output<T: Serialize + Tabled>(data: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("{}", "No items found.".dimmed());
            } else {
                println!("{}", Table::new(data));
            }
        }
        OutputFormat::Json => println!("{}", format_json(data, "[]")),
    }
}

/// Print a single item as JSON.
pub fn print_json<T: Serialize>(data: &T) {
    println!("{}", format_json(data, "{}"));
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "Warning:".yellow().bold(), message);
}

fn dry_run_marker(dry_run: bool) -> String {
    if dry_run {
        format!("{} ", "[DRY RUN]".magenta().bold())
    } else {
        String::new()
    }
}

fn status_cell(status: StepStatus) -> String {
    match status {
        StepStatus::Done => status.as_str().green().to_string(),
        StepStatus::Failed => status.as_str().red().to_string(),
        StepStatus::Skipped => status.as_str().dimmed().to_string(),
        StepStatus::DryRun => status.as_str().magenta().to_string(),
    }
}

/// Print an execution report.
pub fn print_report(report: &ExecutionReport, format: OutputFormat) {
    if format == OutputFormat::Json {
        print_json(report);
        return;
    }

    let marker = dry_run_marker(report.dry_run);

    if let Some(removal) = &report.removal {
        print_removal(&marker, removal);
    }
    if let Some(addition) = &report.addition {
        print_addition(&marker, addition);
    }

    for failure in report.failures() {
        print_warning(&format!(
            "{} {} failed: {}",
            failure.operation, failure.target, failure.reason
        ));
    }

    if !report.has_failures() {
        print_success(&format!("{}Cluster {} reconciled", marker, report.cluster));
    }
}

#[derive(Tabled)]
struct RemovalRow {
    #[tabled(rename = "NODE")]
    node: String,
    #[tabled(rename = "ROLE")]
    role: String,
    #[tabled(rename = "ADDRESS")]
    address: String,
    #[tabled(rename = "STATUS")]
    status: String,
}

fn print_removal(marker: &str, removal: &RemovalOutcome) {
    if removal.steps.is_empty() {
        print_info(&format!("{}No nodes to remove", marker));
        return;
    }

    let rows: Vec<RemovalRow> = removal
        .steps
        .iter()
        .map(|s| RemovalRow {
            node: s.node.clone(),
            role: s.role.clone(),
            address: s.address.clone().unwrap_or_else(|| "-".to_string()),
            status: status_cell(s.status),
        })
        .collect();

    print_info(&format!("{}Node removals", marker));
    println!("{}", Table::new(rows));

    if let Some(setup) = removal.setup {
        print_info(&format!("{}Cluster setup: {}", marker, status_cell(setup)));
    }
}

#[derive(Tabled)]
struct AdditionRow {
    #[tabled(rename = "ROLE")]
    role: String,
    #[tabled(rename = "COUNT")]
    count: u32,
    #[tabled(rename = "STATUS")]
    status: String,
}

fn print_addition(marker: &str, addition: &AdditionOutcome) {
    for advisory in &addition.additions.advisories {
        match advisory {
            Advisory::OverProvisioned { .. } => print_warning(&advisory.to_string()),
            Advisory::Unmanaged { .. } => print_info(&advisory.to_string()),
        }
    }

    if addition.steps.is_empty() {
        print_info(&format!("{}Cluster size matches configuration", marker));
        return;
    }

    let rows: Vec<AdditionRow> = addition
        .steps
        .iter()
        .map(|s| AdditionRow {
            role: s.role.clone(),
            count: s.count,
            status: status_cell(s.status),
        })
        .collect();

    print_info(&format!("{}Node additions", marker));
    println!("{}", Table::new(rows));
}

/// Print the outcome of an identity cache rebuild.
pub fn print_rebuild(cluster: &str, rebuild: &Rebuild, dry_run: bool, format: OutputFormat) {
    let marker = dry_run_marker(dry_run);
    match (format, rebuild) {
        (OutputFormat::Json, Rebuild::Missing) => print_json(&serde_json::json!({
            "cluster": cluster,
            "dry_run": dry_run,
            "rebuild": "missing",
        })),
        (
            OutputFormat::Json,
            Rebuild::Rewritten {
                kept_hosts,
                kept_keys,
                dropped_hosts,
            },
        ) => print_json(&serde_json::json!({
            "cluster": cluster,
            "dry_run": dry_run,
            "rebuild": "rewritten",
            "kept_hosts": kept_hosts,
            "kept_keys": kept_keys,
            "dropped_hosts": dropped_hosts,
        })),
        (OutputFormat::Table, Rebuild::Missing) => {
            print_info(&format!("{}No identity cache for cluster {}", marker, cluster))
        }
        (
            OutputFormat::Table,
            Rebuild::Rewritten {
                kept_hosts,
                kept_keys,
                dropped_hosts,
            },
        ) => print_success(&format!(
            "{}Identity cache for {}: kept {} hosts ({} keys), dropped {}",
            marker, cluster, kept_hosts, kept_keys, dropped_hosts
        )),
    }
}

fn format_json<T: Serialize + ?Sized>(data: &T, fallback: &str) -> String {
    let value = serde_json::to_value(data).unwrap_or_else(|_| serde_json::json!({}));
    let wrapped = serde_json::json!({
        "schemaVersion": CLI_SCHEMA_VERSION,
        "data": sort_json_value(value),
    });
    serde_json::to_string_pretty(&wrapped).unwrap_or_else(|_| fallback.to_string())
}

fn sort_json_value(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Array(values) => {
            serde_json::Value::Array(values.into_iter().map(sort_json_value).collect())
        }
        serde_json::Value::Object(entries) => {
            let mut pairs: Vec<_> = entries.into_iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            let mut mapped = serde_json::Map::new();
            for (key, value) in pairs {
                mapped.insert(key, sort_json_value(value));
            }
            serde_json::Value::Object(mapped)
        }
        other => other,
    }
}
