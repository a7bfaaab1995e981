//! Taskflow engine
//!
//! Drives tasks through published step graphs. A task moves through its
//! graph one step at a time; each step is handed to the delegate for its
//! role, and the outcome decides where the task goes next.
//!
//! # Key Principle
//!
//! **The engine coordinates, it never performs step work.** Delegates do
//! the work; the engine records what happened and routes the task.
//!
//! # Architecture
//!
//! - [`StepDefinitionStore`] / [`WorkflowCatalog`]: register, validate and
//!   publish immutable step graphs
//! - [`TaskStore`]: task records, the transition gate, append-only history
//! - [`DecisionGate`]: skip, consult knowledge, escalate, or ask for guidance
//! - [`StepExecutor`]: runs one step and routes the outcome
//! - [`WorkflowEngine`]: drives whole tasks, resumes and cancels them,
//!   and schedules distinct tasks in parallel
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use taskflow_engine::*;
//! use taskflow_types::*;
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Runtime::new().unwrap();
//! # rt.block_on(async {
//! let mut steps = StepDefinitionStore::new(WorkflowId::new("review-v1"), "Review");
//! steps.register(StepDefinition::new("draft", "writer").with_next("review")).unwrap();
//! steps.register(StepDefinition::new("review", "reviewer").depends_on("draft")).unwrap();
//! let workflow = steps.publish().unwrap();
//!
//! let delegates = DelegateRegistry::new()
//!     .with("writer", Arc::new(MockDelegate::succeeding()))
//!     .with("reviewer", Arc::new(MockDelegate::succeeding()));
//! let engine = WorkflowEngine::new(
//!     workflow,
//!     Arc::new(InMemoryTaskStore::new()),
//!     delegates,
//!     EngineConfig::default(),
//! )
//! .unwrap();
//!
//! let task = engine.submit(NewTask::generate()).await.unwrap();
//! let run = engine.run_task(&task.id).await.unwrap();
//! assert_eq!(run.status, TaskStatus::Done);
//! # });
//! # }
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod decision_gate;
pub mod definition_store;
pub mod delegate;
pub mod engine;
pub mod executor;
pub mod knowledge;
pub mod loader;
pub mod task_store;
pub mod telemetry;

// Re-export main types
pub use config::{
    DependencyPolicy, EngineConfig, ExecutorConfig, GateConfig, LoggingConfig, SchedulerConfig,
};
pub use decision_gate::{ComplexityAssessor, DecisionGate, MetadataAssessor};
pub use definition_store::{PublishedWorkflow, StepDefinitionStore, WorkflowCatalog};
pub use delegate::{Delegate, DelegateError, DelegateRegistry, MockDelegate};
pub use engine::{GuidanceSignal, TaskRun, WorkflowEngine};
pub use executor::StepExecutor;
pub use knowledge::{KnowledgeError, KnowledgeSource, NoKnowledge, StaticKnowledgeBase};
pub use loader::{load_workflow_file, parse_workflow};
pub use task_store::{InMemoryTaskStore, NewTask, TaskStore};
pub use telemetry::init_tracing;
