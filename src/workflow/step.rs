use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Error,
}

/// Which bucket of the error taxonomy a halted step falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// Refused locally before any mutating call. Nothing was applied.
    Validation,
    /// The gateway said no. Message is the remote text, untouched.
    Remote,
    /// Earlier steps already changed the cluster and cannot be undone here.
    Inconsistent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: StepErrorKind::Validation,
            message: message.into(),
        }
    }

    pub fn remote(err: &GatewayError) -> Self {
        Self {
            kind: StepErrorKind::Remote,
            message: err.to_string(),
        }
    }

    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self {
            kind: StepErrorKind::Inconsistent,
            message: message.into(),
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            StepErrorKind::Validation => "validation",
            StepErrorKind::Remote => "remote",
            StepErrorKind::Inconsistent => "inconsistent",
        };
        write!(f, "[{kind}] {}", self.message)
    }
}

/// Result of a best-effort follow-up (cleanup, delete source). Lives inside
/// the parent step and never changes the parent's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestEffortOutcome {
    pub label: String,
    pub success: bool,
    pub message: String,
}

impl BestEffortOutcome {
    pub fn status(&self) -> StepStatus {
        if self.success {
            StepStatus::Done
        } else {
            StepStatus::Error
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub description: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub best_effort: Vec<BestEffortOutcome>,
}

impl WorkflowStep {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: StepStatus::Pending,
            detail: None,
            error: None,
            best_effort: Vec::new(),
        }
    }

    pub fn best_effort(&self, label: &str) -> Option<&BestEffortOutcome> {
        self.best_effort.iter().find(|o| o.label == label)
    }
}
