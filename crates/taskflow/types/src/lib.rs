//! Taskflow core types
//!
//! Domain vocabulary for the taskflow engine:
//! - Step definitions and workflow graphs (immutable once published)
//! - Task records with an append-only history and a fixed status
//!   transition table
//! - Delegation requests/responses exchanged with role delegates
//! - Decision gate outcomes and structured escalation requests
//! - The error taxonomy shared by every layer

#![deny(unsafe_code)]

mod context;
mod decision;
mod delegation;
mod errors;
mod execution;
mod step;
mod task;
mod workflow;

pub use context::*;
pub use decision::*;
pub use delegation::*;
pub use errors::*;
pub use execution::*;
pub use step::{GateSpec, InputSpec, OutputSpec, RoleId, StepDefinition, StepId};
pub use task::*;
pub use workflow::*;
