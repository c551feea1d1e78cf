//! stewardctl - keeps elasticluster clusters at their configured size.
//!
//! A reconciliation pass:
//! 1. Snapshot the cluster (elasticluster listing plus cloud status).
//! 2. Remove dead nodes, purging their SSH host keys from the identity cache.
//! 3. Re-snapshot and add nodes for every role below its configured count.
//!
//! The backend and the status provider are traits so passes can run against
//! in-memory fakes.

pub mod backend;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod output;
pub mod snapshot;
pub mod status;

pub use backend::{BackendError, ElasticlusterBackend, MockBackend, OrchestrationBackend};
pub use config::ClusterConfig;
pub use error::StewardError;
pub use executor::{ExecutionReport, PlanExecutor};
pub use status::{GcloudStatusProvider, StaticStatusProvider, StatusProvider};
