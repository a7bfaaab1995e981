//! Workflow definitions: an ordered sequence of steps forming a graph
//!
//! The first step in the sequence is the entry step. Definitions are
//! immutable once published; a changed workflow is published under a new
//! workflow id so that running tasks keep an auditable blueprint.

use crate::{EdgeKind, GraphError, GraphResult, StepDefinition, StepId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ── Identifier ───────────────────────────────────────────────────────

/// Unique identifier for a workflow definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workflow Definition ──────────────────────────────────────────────

/// A workflow blueprint in its persisted layout
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow_id: WorkflowId,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<StepDefinition>,
}

fn default_version() -> u32 {
    1
}

impl WorkflowDefinition {
    pub fn new(workflow_id: WorkflowId, name: impl Into<String>) -> Self {
        Self {
            workflow_id,
            name: name.into(),
            version: 1,
            description: String::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// The step a new task starts at
    pub fn entry_step(&self) -> Option<&StepDefinition> {
        self.steps.first()
    }

    pub fn get_step(&self, id: &StepId) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| &s.step_id == id)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Validate the graph for structural correctness
    pub fn validate(&self) -> GraphResult<()> {
        if self.steps.is_empty() {
            return Err(GraphError::EmptyWorkflow(self.workflow_id.clone()));
        }
        validate_steps(&self.steps)
    }
}

// ── Graph Validation ─────────────────────────────────────────────────

/// Validate a step graph.
///
/// Checks, in order: unique ids, every reference resolves, no step routes
/// its failure to itself, the success path (`next_step` edges plus
/// dependency → dependent edges) is acyclic, and following `error_step`
/// alone never loops. An `error_step` may point back into the success
/// path. Pure: no side effects.
///
/// Counting dependency edges makes this stricter than `next_step` alone:
/// a graph whose `next_step` chain is acyclic is still rejected when a
/// dependency points against it, as in `a.next = b` with
/// `a.depends_on = [b]`. There `b` must succeed before `a` runs, yet only
/// `a` hands over to `b`.
pub fn validate_steps(steps: &[StepDefinition]) -> GraphResult<()> {
    let mut index: HashMap<&StepId, usize> = HashMap::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        if index.insert(&step.step_id, i).is_some() {
            return Err(GraphError::DuplicateStep(step.step_id.clone()));
        }
    }

    let resolve = |step: &StepDefinition, edge: EdgeKind, target: &StepId| {
        index
            .get(target)
            .copied()
            .ok_or_else(|| GraphError::DanglingReference {
                step: step.step_id.clone(),
                edge,
                target: target.clone(),
            })
    };

    let mut success_edges: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    let mut error_edges: Vec<Option<usize>> = vec![None; steps.len()];

    for (i, step) in steps.iter().enumerate() {
        for dependency in &step.depends_on {
            let from = resolve(step, EdgeKind::DependsOn, dependency)?;
            success_edges[from].push(i);
        }
        if let Some(next) = &step.next_step {
            success_edges[i].push(resolve(step, EdgeKind::NextStep, next)?);
        }
        if let Some(error) = &step.error_step {
            let target = resolve(step, EdgeKind::ErrorStep, error)?;
            if target == i {
                return Err(GraphError::SelfErrorStep(step.step_id.clone()));
            }
            error_edges[i] = Some(target);
        }
    }

    if let Some(cycle) = find_cycle(&success_edges) {
        return Err(GraphError::CycleDetected {
            path: cycle.into_iter().map(|i| steps[i].step_id.clone()).collect(),
        });
    }

    let error_adjacency: Vec<Vec<usize>> = error_edges
        .iter()
        .map(|target| target.iter().copied().collect())
        .collect();
    if let Some(cycle) = find_cycle(&error_adjacency) {
        return Err(GraphError::ErrorLoop {
            path: cycle.into_iter().map(|i| steps[i].step_id.clone()).collect(),
        });
    }

    Ok(())
}

/// Iterative three-colour DFS. Returns the nodes of the first cycle found,
/// closed with the repeated start node.
fn find_cycle(adjacency: &[Vec<usize>]) -> Option<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; adjacency.len()];

    for root in 0..adjacency.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        // (node, next edge to explore)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::OnStack;

        while let Some(top) = stack.last_mut() {
            let node = top.0;
            if let Some(&target) = adjacency[node].get(top.1) {
                top.1 += 1;
                match marks[target] {
                    Mark::Unvisited => {
                        marks[target] = Mark::OnStack;
                        stack.push((target, 0));
                    }
                    Mark::OnStack => {
                        let start = stack.iter().position(|(n, _)| *n == target)?;
                        let mut cycle: Vec<usize> = stack[start..].iter().map(|(n, _)| *n).collect();
                        cycle.push(target);
                        return Some(cycle);
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
    }

    None
}

/// Roles referenced by a step graph, deduplicated in first-use order
pub fn referenced_roles(steps: &[StepDefinition]) -> Vec<(&StepId, &crate::RoleId)> {
    let mut seen = HashSet::new();
    steps
        .iter()
        .filter(|s| seen.insert(&s.delegate_to))
        .map(|s| (&s.step_id, &s.delegate_to))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> WorkflowDefinition {
        WorkflowDefinition::new(WorkflowId::new("wf"), "Linear")
            .with_step(StepDefinition::new("S1", "planner").with_next("S2"))
            .with_step(
                StepDefinition::new("S2", "builder")
                    .depends_on("S1")
                    .with_error("EE1"),
            )
            .with_step(StepDefinition::new("EE1", "fixer"))
    }

    #[test]
    fn test_valid_workflow() {
        let wf = linear();
        assert!(wf.validate().is_ok());
        assert_eq!(wf.entry_step().unwrap().step_id, StepId::new("S1"));
        assert_eq!(wf.step_count(), 3);
    }

    #[test]
    fn test_empty_workflow_rejected() {
        let wf = WorkflowDefinition::new(WorkflowId::new("empty"), "Empty");
        assert!(matches!(wf.validate(), Err(GraphError::EmptyWorkflow(_))));
    }

    #[test]
    fn test_dangling_next_step() {
        let wf = WorkflowDefinition::new(WorkflowId::new("wf"), "Dangling")
            .with_step(StepDefinition::new("S1", "planner").with_next("missing"));
        match wf.validate() {
            Err(GraphError::DanglingReference { step, edge, target }) => {
                assert_eq!(step, StepId::new("S1"));
                assert_eq!(edge, EdgeKind::NextStep);
                assert_eq!(target, StepId::new("missing"));
            }
            other => panic!("expected dangling reference, got {:?}", other),
        }
    }

    #[test]
    fn test_dangling_dependency() {
        let wf = WorkflowDefinition::new(WorkflowId::new("wf"), "Dangling")
            .with_step(StepDefinition::new("S1", "planner").depends_on("ghost"));
        assert!(matches!(
            wf.validate(),
            Err(GraphError::DanglingReference {
                edge: EdgeKind::DependsOn,
                ..
            })
        ));
    }

    #[test]
    fn test_success_cycle_rejected() {
        let wf = WorkflowDefinition::new(WorkflowId::new("wf"), "Cycle")
            .with_step(StepDefinition::new("A", "r").with_next("B"))
            .with_step(StepDefinition::new("B", "r").with_next("C"))
            .with_step(StepDefinition::new("C", "r").with_next("A"));
        match wf.validate() {
            Err(GraphError::CycleDetected { path }) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_dependency_against_success_order_is_a_cycle() {
        // B runs after A but A needs B to have succeeded first
        let wf = WorkflowDefinition::new(WorkflowId::new("wf"), "Deadlock")
            .with_step(StepDefinition::new("B", "r"))
            .with_step(StepDefinition::new("A", "r").depends_on("B").with_next("B"));
        assert!(matches!(
            wf.validate(),
            Err(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_self_error_step_rejected() {
        let wf = WorkflowDefinition::new(WorkflowId::new("wf"), "SelfLoop")
            .with_step(StepDefinition::new("A", "r").with_error("A"));
        assert_eq!(
            wf.validate(),
            Err(GraphError::SelfErrorStep(StepId::new("A")))
        );
    }

    #[test]
    fn test_error_step_may_point_back_into_success_path() {
        let wf = WorkflowDefinition::new(WorkflowId::new("wf"), "Retry")
            .with_step(StepDefinition::new("A", "r").with_next("B"))
            .with_step(StepDefinition::new("B", "r").with_error("A"));
        assert!(wf.validate().is_ok());
    }

    #[test]
    fn test_error_only_loop_rejected() {
        let wf = WorkflowDefinition::new(WorkflowId::new("wf"), "PingPong")
            .with_step(StepDefinition::new("A", "r").with_error("B"))
            .with_step(StepDefinition::new("B", "r").with_error("A"));
        assert!(matches!(wf.validate(), Err(GraphError::ErrorLoop { .. })));
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let wf = WorkflowDefinition::new(WorkflowId::new("wf"), "Dup")
            .with_step(StepDefinition::new("A", "r"))
            .with_step(StepDefinition::new("A", "r"));
        assert_eq!(
            wf.validate(),
            Err(GraphError::DuplicateStep(StepId::new("A")))
        );
    }

    #[test]
    fn test_referenced_roles_deduplicated() {
        let wf = linear().with_step(StepDefinition::new("S3", "planner"));
        let roles: Vec<&str> = referenced_roles(&wf.steps)
            .into_iter()
            .map(|(_, r)| r.as_str())
            .collect();
        assert_eq!(roles, vec!["planner", "builder", "fixer"]);
    }

    #[test]
    fn test_definition_json_layout() {
        let json = serde_json::to_value(linear()).unwrap();
        assert_eq!(json["workflow_id"], "wf");
        assert_eq!(json["steps"][0]["next_step"], "S2");
        assert_eq!(json["steps"][0]["error_step"], "");
        assert_eq!(json["steps"][1]["depends_on"][0], "S1");
    }
}
