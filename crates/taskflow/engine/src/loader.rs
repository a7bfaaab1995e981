//! JSON workflow definitions
//!
//! Accepts either a full definition object or a bare array of step
//! records. A bare array is given a generated workflow id.

use serde::Deserialize;
use std::path::Path;
use taskflow_types::{DefError, DefResult, StepDefinition, WorkflowDefinition, WorkflowId};

#[derive(Deserialize)]
#[serde(untagged)]
enum Document {
    Definition(WorkflowDefinition),
    Steps(Vec<StepDefinition>),
}

/// Parse a workflow definition from JSON text
pub fn parse_workflow(json: &str) -> DefResult<WorkflowDefinition> {
    let document: Document =
        serde_json::from_str(json).map_err(|e| DefError::Malformed(e.to_string()))?;
    let definition = match document {
        Document::Definition(definition) => definition,
        Document::Steps(steps) => WorkflowDefinition {
            steps,
            ..WorkflowDefinition::new(WorkflowId::generate(), "")
        },
    };
    if definition.workflow_id.as_str().trim().is_empty() {
        return Err(DefError::EmptyWorkflowId);
    }
    Ok(definition)
}

/// Read and parse a workflow definition file
pub fn load_workflow_file(path: impl AsRef<Path>) -> DefResult<WorkflowDefinition> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .map_err(|e| DefError::Malformed(format!("{}: {}", path.display(), e)))?;
    let definition = parse_workflow(&json)?;
    tracing::debug!(
        path = %path.display(),
        workflow_id = %definition.workflow_id,
        steps = definition.steps.len(),
        "Workflow definition loaded"
    );
    Ok(definition)
}
