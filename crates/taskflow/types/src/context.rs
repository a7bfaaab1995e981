//! Explicit per-step task context
//!
//! Everything the decision gate and the step executor know about the task
//! they are working on is carried in a [`TaskContext`] built from the
//! stored record. There is no ambient "current task".

use crate::{EntryOutcome, StepId, TaskId, TaskRecord};
use std::collections::{BTreeMap, BTreeSet};

/// Snapshot of a task as seen by one step invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub step_id: StepId,
    pub metadata: BTreeMap<String, String>,
    pub related_docs: BTreeSet<String>,
    /// Outputs of every successful step so far
    pub outputs: BTreeMap<String, String>,
    /// Steps with a recorded success for this task
    pub succeeded_steps: BTreeSet<StepId>,
    /// Unconsumed guidance for this step
    pub guidance: Option<String>,
    /// Prior executor invocations of this step
    pub attempt: u32,
}

impl TaskContext {
    pub fn for_step(record: &TaskRecord, step_id: &StepId) -> Self {
        Self {
            task_id: record.id.clone(),
            step_id: step_id.clone(),
            metadata: record.metadata.clone(),
            related_docs: record.related_docs.clone(),
            outputs: record.collected_outputs(),
            succeeded_steps: record
                .history
                .iter()
                .filter(|e| e.outcome == EntryOutcome::Success)
                .filter_map(|e| e.step_id.clone())
                .collect(),
            guidance: record.pending_guidance(step_id).map(str::to_string),
            attempt: record.attempts(step_id),
        }
    }

    /// Resolve a named value: step outputs override task metadata
    pub fn value(&self, name: &str) -> Option<&str> {
        self.outputs
            .get(name)
            .or_else(|| self.metadata.get(name))
            .map(String::as_str)
    }

    pub fn step_succeeded(&self, step_id: &StepId) -> bool {
        self.succeeded_steps.contains(step_id)
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn has_guidance(&self) -> bool {
        self.guidance.is_some()
    }
}
