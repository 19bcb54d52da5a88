/*
* Cluster Lifecycle Manager - Error Taxonomy
* ------------------------------------------
* @project: cluster-lifecycle-manager
*
* Two layers of errors live here:
*
* 1. GatewayError: whatever the hypervisor control plane threw back at us.
*    We keep the remote message verbatim, operators need the real text and
*    not our paraphrase of it.
*
* 2. OrchestratorError: everything that can go wrong on our side of the wire
*    (config loading, the append-only stores, serialization).
*
* Workflow failures are NOT errors in the Result sense. A half-finished node
* move is a perfectly valid outcome that has to be reported step by step, so
* those land in the workflow trace as StepError values (see workflow::step).
*/

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("{message}")]
    Remote {
        message: String,
    },

    #[error("Target unreachable: {target}")]
    Unreachable {
        target: String,
    },

    #[error("Operation timed out: {operation}")]
    Timeout {
        operation: String,
    },

    #[error("Not found: {what}")]
    NotFound {
        what: String,
    },
}

impl GatewayError {
    pub fn remote(message: impl Into<String>) -> Self {
        GatewayError::Remote {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Gateway Error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Configuration Error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization Error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation Error: {0}")]
    Validation(String),

    #[error("Store Error ({}): {message}", path.display())]
    Store {
        path: PathBuf,
        message: String,
    },
}

// Error context for tracking where a persistence operation blew up
#[derive(Debug)]
pub struct ErrorContext {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub source_location: &'static str,
    pub operation: String,
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

// Helper macro for context addition
#[macro_export]
macro_rules! with_context {
    ($result:expr, $operation:expr) => {
        $result.map_err(|e| {
            let context = $crate::errors::ErrorContext {
                timestamp: chrono::Utc::now(),
                source_location: std::file!(),
                operation: $operation.to_string(),
            };
            tracing::error!(
                error = %e,
                context = ?context,
                "Operation failed"
            );
            e
        })
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_render_verbatim() {
        let err = GatewayError::remote("cluster join failed: node already in cluster");
        assert_eq!(err.to_string(), "cluster join failed: node already in cluster");
    }

    #[test]
    fn gateway_errors_convert_into_orchestrator_errors() {
        let err: OrchestratorError = GatewayError::Timeout {
            operation: "migrate".into(),
        }
        .into();
        assert!(err.to_string().contains("migrate"));
    }
}
