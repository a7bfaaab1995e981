//! Step outcomes as reported by the step executor

use crate::{StepId, SuspendReason, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of one executor invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Success(BTreeMap<String, String>),
    Failure(FailureContext),
    Suspended(SuspendReason),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Failure(_) => "failure",
            Self::Suspended(_) => "suspended",
        }
    }
}

/// Why a step or task failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// A `depends_on` step has no recorded success for this task
    UnmetDependency { missing: Vec<StepId> },
    /// A required input could not be bound
    MissingInput { name: String },
    /// The delegate reported failure or could not be reached
    DelegateFailure,
    /// The delegate succeeded without producing a declared output
    OutputContract { missing: Vec<String> },
    /// The task exceeded its executor invocation budget
    StepBudgetExhausted { limit: u32 },
    /// A prerequisite task ended in `Failed`
    DependencyFailed { tasks: Vec<TaskId> },
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnmetDependency { missing } => {
                let ids: Vec<&str> = missing.iter().map(StepId::as_str).collect();
                write!(f, "unmet dependency: {}", ids.join(", "))
            }
            Self::MissingInput { name } => write!(f, "missing required input '{}'", name),
            Self::DelegateFailure => write!(f, "delegate failure"),
            Self::OutputContract { missing } => {
                write!(f, "declared outputs not produced: {}", missing.join(", "))
            }
            Self::StepBudgetExhausted { limit } => {
                write!(f, "step budget exhausted after {} executions", limit)
            }
            Self::DependencyFailed { tasks } => {
                let ids: Vec<&str> = tasks.iter().map(TaskId::as_str).collect();
                write!(f, "prerequisite task failed: {}", ids.join(", "))
            }
        }
    }
}

/// Failure kind plus whatever detail the source provided
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureContext {
    pub kind: FailureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl FailureContext {
    pub fn new(kind: FailureKind) -> Self {
        Self { kind, detail: None }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Text recorded in the history entry
    pub fn describe(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{}: {}", self.kind, detail),
            None => self.kind.to_string(),
        }
    }
}

impl std::fmt::Display for FailureContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.describe())
    }
}
