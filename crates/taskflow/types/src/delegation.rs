//! Delegation: the request/response contract between the executor and
//! the role that performs a step

use crate::{RoleId, StepId, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ephemeral request handed to a delegate. Only the history entry it
/// produces outlives the invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRequest {
    pub task_id: TaskId,
    pub step_id: StepId,
    pub role: RoleId,
    /// Inputs bound from the step's contract
    pub inputs: BTreeMap<String, String>,
    pub context: DelegationContext,
}

/// What the engine knows beyond the bound inputs
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationContext {
    /// Knowledge returned by a `ConsultThenProceed` decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge: Option<String>,
    /// Answer supplied by a guidance resume signal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_docs: Vec<String>,
    /// Prior executor invocations of this step for this task
    #[serde(default)]
    pub attempt: u32,
}

/// Whether the delegate reports success
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelegationStatus {
    Success,
    Failure,
}

/// A delegate's answer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationResponse {
    pub outcome: DelegationStatus,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl DelegationResponse {
    pub fn success(outputs: BTreeMap<String, String>) -> Self {
        Self {
            outcome: DelegationStatus::Success,
            outputs,
            error_detail: None,
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            outcome: DelegationStatus::Failure,
            outputs: BTreeMap::new(),
            error_detail: Some(detail.into()),
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == DelegationStatus::Success
    }
}
