//! Error types for the workflow layer
//!
//! Structural errors (`DefError`, `GraphError`) stop a workflow from being
//! published. `StoreError` covers the task record store, including
//! rejected status transitions. Per-task runtime failures are not errors
//! at all: they are step outcomes routed through `error_step`.

use crate::{RoleId, StepId, TaskId, TaskStatus, WorkflowId};

/// Rejection of a malformed or duplicate step definition at registration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefError {
    #[error("Step id must not be empty")]
    EmptyStepId,

    #[error("Workflow id must not be empty")]
    EmptyWorkflowId,

    #[error("Duplicate step id: {0}")]
    DuplicateStepId(StepId),

    #[error("Step '{0}' has no delegate role")]
    MissingDelegate(StepId),

    #[error("Step '{0}' depends on itself")]
    SelfDependency(StepId),

    #[error("Step '{step}' lists dependency '{dependency}' more than once")]
    DuplicateDependency { step: StepId, dependency: StepId },

    #[error("Step '{step}' depends on '{dependency}', which is not defined before it")]
    ForwardDependency { step: StepId, dependency: StepId },

    #[error("Step '{step}' declares input '{name}' more than once")]
    DuplicateInput { step: StepId, name: String },

    #[error("Step '{step}' declares output '{name}' more than once")]
    DuplicateOutput { step: StepId, name: String },

    #[error("Workflow already published: {0}")]
    WorkflowExists(WorkflowId),

    #[error("Malformed workflow definition: {0}")]
    Malformed(String),
}

/// Which kind of reference a graph error is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    DependsOn,
    NextStep,
    ErrorStep,
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DependsOn => write!(f, "depends_on"),
            Self::NextStep => write!(f, "next_step"),
            Self::ErrorStep => write!(f, "error_step"),
        }
    }
}

/// Rejection of a workflow graph at validation; the workflow never activates
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Workflow '{0}' has no steps")]
    EmptyWorkflow(WorkflowId),

    #[error("Duplicate step id in workflow graph: {0}")]
    DuplicateStep(StepId),

    #[error("Step '{step}' {edge} references unknown step '{target}'")]
    DanglingReference {
        step: StepId,
        edge: EdgeKind,
        target: StepId,
    },

    #[error("Cycle detected on the success path: {}", format_path(.path))]
    CycleDetected { path: Vec<StepId> },

    #[error("Step '{0}' routes its own failure back to itself")]
    SelfErrorStep(StepId),

    #[error("Error routing loops without reaching a success path: {}", format_path(.path))]
    ErrorLoop { path: Vec<StepId> },

    #[error("Step '{step}' is delegated to role '{role}', which has no registered delegate")]
    UnknownRole { step: StepId, role: RoleId },
}

fn format_path(path: &[StepId]) -> String {
    path.iter()
        .map(StepId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Task record store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Task already exists: {0}")]
    AlreadyExists(TaskId),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Tasks cannot be created in status {0}")]
    InvalidInitialStatus(TaskStatus),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

/// Errors surfaced by the workflow engine
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Definition(#[from] DefError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Step not found: {0}")]
    StepNotFound(StepId),

    #[error("Task {0} is already being driven by another worker")]
    TaskBusy(TaskId),

    #[error("Task {task_id} is {status}, expected {expected}")]
    UnexpectedStatus {
        task_id: TaskId,
        status: TaskStatus,
        expected: TaskStatus,
    },

    #[error("Task {task_id} waits on unfinished prerequisite tasks: {}", format_tasks(.pending))]
    DependenciesPending { task_id: TaskId, pending: Vec<TaskId> },
}

fn format_tasks(tasks: &[TaskId]) -> String {
    tasks
        .iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for step registration
pub type DefResult<T> = Result<T, DefError>;

/// Result type for graph validation
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type for task record store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for engine operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
