pub mod cli;
pub mod cluster;
pub mod config;
pub mod core;
pub mod errors;
pub mod history;
pub mod monitoring;
pub mod replication;
pub mod utils;
pub mod workflow;

// Re-exports
pub use cluster::{ClusterGateway, Credentials, Session};
pub use config::Settings;
pub use errors::{GatewayError, OrchestratorError, OrchestratorResult};
pub use history::MigrationHistory;
pub use monitoring::{InventoryPoller, InventorySnapshot};
pub use replication::{ReplicationJob, ReplicationStore};
pub use workflow::{Workflow, WorkflowOrchestrator, WorkflowStatus};
pub type AsyncMutex<T> = tokio::sync::Mutex<T>;
