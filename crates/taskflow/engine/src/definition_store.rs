//! Step definition store and workflow catalog
//!
//! Steps are registered one at a time into a [`StepDefinitionStore`].
//! Registration rejects malformed or duplicate steps without partially
//! applying them. `publish` validates the whole graph and freezes it into
//! a [`PublishedWorkflow`], which is read-only and shared behind an `Arc`,
//! so no locking is needed to read it. A changed workflow is published
//! under a new workflow id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use taskflow_types::{
    validate_steps, DefError, DefResult, GraphError, GraphResult, RoleId, StepDefinition, StepId,
    WorkflowDefinition, WorkflowError, WorkflowId, WorkflowResult,
};

// ── Step Definition Store ────────────────────────────────────────────

/// Mutable, pre-publication home of one workflow's steps
#[derive(Clone, Debug)]
pub struct StepDefinitionStore {
    workflow_id: WorkflowId,
    name: String,
    version: u32,
    description: String,
    /// Steps in registration order; the first one is the entry step
    steps: Vec<StepDefinition>,
    index: HashMap<StepId, usize>,
}

impl StepDefinitionStore {
    pub fn new(workflow_id: WorkflowId, name: impl Into<String>) -> Self {
        Self {
            workflow_id,
            name: name.into(),
            version: 1,
            description: String::new(),
            steps: Vec::new(),
            index: HashMap::new(),
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

    /// Build a store by registering every step of a definition in order
    pub fn from_definition(definition: WorkflowDefinition) -> DefResult<Self> {
        if definition.workflow_id.as_str().trim().is_empty() {
            return Err(DefError::EmptyWorkflowId);
        }
        let mut store = Self::new(definition.workflow_id, definition.name)
            .with_version(definition.version)
            .with_description(definition.description);
        for step in definition.steps {
            store.register(step)?;
        }
        Ok(store)
    }

    /// Register one step definition.
    ///
    /// Dependencies must name steps registered earlier. `next_step` and
    /// `error_step` may point forward; they are resolved by [`validate`].
    ///
    /// [`validate`]: StepDefinitionStore::validate
    pub fn register(&mut self, def: StepDefinition) -> DefResult<()> {
        let id = &def.step_id;
        if id.as_str().trim().is_empty() {
            return Err(DefError::EmptyStepId);
        }
        if self.index.contains_key(id) {
            return Err(DefError::DuplicateStepId(id.clone()));
        }
        if def.delegate_to.as_str().trim().is_empty() {
            return Err(DefError::MissingDelegate(id.clone()));
        }

        let mut seen = HashSet::new();
        for dependency in &def.depends_on {
            if dependency == id {
                return Err(DefError::SelfDependency(id.clone()));
            }
            if !seen.insert(dependency) {
                return Err(DefError::DuplicateDependency {
                    step: id.clone(),
                    dependency: dependency.clone(),
                });
            }
            if !self.index.contains_key(dependency) {
                return Err(DefError::ForwardDependency {
                    step: id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        let mut names = HashSet::new();
        if let Some(input) = def.inputs.iter().find(|i| !names.insert(i.name.as_str())) {
            return Err(DefError::DuplicateInput {
                step: id.clone(),
                name: input.name.clone(),
            });
        }
        let mut names = HashSet::new();
        if let Some(output) = def.outputs.iter().find(|o| !names.insert(o.name.as_str())) {
            return Err(DefError::DuplicateOutput {
                step: id.clone(),
                name: output.name.clone(),
            });
        }

        tracing::debug!(
            workflow_id = %self.workflow_id,
            step_id = %id,
            role = %def.delegate_to,
            "Step registered"
        );
        self.index.insert(id.clone(), self.steps.len());
        self.steps.push(def);
        Ok(())
    }

    pub fn get(&self, step_id: &StepId) -> WorkflowResult<&StepDefinition> {
        self.index
            .get(step_id)
            .map(|&i| &self.steps[i])
            .ok_or_else(|| WorkflowError::StepNotFound(step_id.clone()))
    }

    pub fn contains(&self, step_id: &StepId) -> bool {
        self.index.contains_key(step_id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    /// Validate the registered graph. Pure.
    pub fn validate(&self) -> GraphResult<()> {
        if self.steps.is_empty() {
            return Err(GraphError::EmptyWorkflow(self.workflow_id.clone()));
        }
        validate_steps(&self.steps)
    }

    /// Validate and freeze the graph
    pub fn publish(self) -> GraphResult<Arc<PublishedWorkflow>> {
        self.validate()?;
        tracing::info!(
            workflow_id = %self.workflow_id,
            name = %self.name,
            version = self.version,
            steps = self.steps.len(),
            "Workflow published"
        );
        Ok(Arc::new(PublishedWorkflow {
            definition: WorkflowDefinition {
                workflow_id: self.workflow_id,
                name: self.name,
                version: self.version,
                description: self.description,
                steps: self.steps,
            },
            index: self.index,
        }))
    }
}

// ── Published Workflow ───────────────────────────────────────────────

/// A validated, immutable workflow graph
#[derive(Debug)]
pub struct PublishedWorkflow {
    definition: WorkflowDefinition,
    index: HashMap<StepId, usize>,
}

impl PublishedWorkflow {
    pub fn id(&self) -> &WorkflowId {
        &self.definition.workflow_id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn version(&self) -> u32 {
        self.definition.version
    }

    /// Publication guarantees at least one step
    pub fn entry_step(&self) -> &StepDefinition {
        &self.definition.steps[0]
    }

    pub fn get(&self, step_id: &StepId) -> WorkflowResult<&StepDefinition> {
        self.index
            .get(step_id)
            .map(|&i| &self.definition.steps[i])
            .ok_or_else(|| WorkflowError::StepNotFound(step_id.clone()))
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.definition.steps
    }

    /// Distinct roles the graph delegates to
    pub fn roles(&self) -> Vec<(&StepId, &RoleId)> {
        taskflow_types::referenced_roles(&self.definition.steps)
    }

    /// The graph in its persisted layout
    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }
}

// ── Workflow Catalog ─────────────────────────────────────────────────

/// Registry of published workflows. Entries are never replaced or removed.
#[derive(Clone, Debug, Default)]
pub struct WorkflowCatalog {
    workflows: HashMap<WorkflowId, Arc<PublishedWorkflow>>,
    /// Name → workflow ids in publication order
    by_name: HashMap<String, Vec<WorkflowId>>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and publish a definition
    pub fn publish(
        &mut self,
        definition: WorkflowDefinition,
    ) -> WorkflowResult<Arc<PublishedWorkflow>> {
        if self.workflows.contains_key(&definition.workflow_id) {
            return Err(DefError::WorkflowExists(definition.workflow_id).into());
        }
        let published = StepDefinitionStore::from_definition(definition)?.publish()?;
        self.insert(published.clone());
        Ok(published)
    }

    /// Add an already published workflow
    pub fn insert_published(&mut self, workflow: Arc<PublishedWorkflow>) -> WorkflowResult<()> {
        if self.workflows.contains_key(workflow.id()) {
            return Err(DefError::WorkflowExists(workflow.id().clone()).into());
        }
        self.insert(workflow);
        Ok(())
    }

    fn insert(&mut self, workflow: Arc<PublishedWorkflow>) {
        let id = workflow.id().clone();
        self.by_name
            .entry(workflow.name().to_string())
            .or_default()
            .push(id.clone());
        self.workflows.insert(id, workflow);
    }

    pub fn get(&self, id: &WorkflowId) -> WorkflowResult<Arc<PublishedWorkflow>> {
        self.workflows
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::WorkflowNotFound(id.clone()))
    }

    /// Highest version published under `name`; later publication wins ties
    pub fn latest_by_name(&self, name: &str) -> Option<Arc<PublishedWorkflow>> {
        self.versions_by_name(name)
            .into_iter()
            .max_by_key(|w| w.version())
    }

    /// Every workflow published under `name`, in publication order
    pub fn versions_by_name(&self, name: &str) -> Vec<Arc<PublishedWorkflow>> {
        self.by_name
            .get(name)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.workflows.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn list(&self) -> Vec<Arc<PublishedWorkflow>> {
        self.workflows.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.workflows.len()
    }

    pub fn contains(&self, id: &WorkflowId) -> bool {
        self.workflows.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_types::{InputSpec, OutputSpec};

    fn review_definition(id: &str, version: u32) -> WorkflowDefinition {
        WorkflowDefinition::new(WorkflowId::new(id), "Review")
            .with_version(version)
            .with_step(StepDefinition::new("draft", "writer").with_next("review"))
            .with_step(
                StepDefinition::new("review", "reviewer")
                    .depends_on("draft")
                    .with_error("fix"),
            )
            .with_step(StepDefinition::new("fix", "writer").with_next("review"))
    }

    #[test]
    fn test_register_and_get() {
        let mut store = StepDefinitionStore::new(WorkflowId::new("wf"), "Test");
        store.register(StepDefinition::new("S1", "planner")).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&StepId::new("S1")).unwrap().delegate_to.as_str(), "planner");
        assert!(matches!(
            store.get(&StepId::new("nope")),
            Err(WorkflowError::StepNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_step_rejected_without_partial_apply() {
        let mut store = StepDefinitionStore::new(WorkflowId::new("wf"), "Test");
        store
            .register(StepDefinition::new("S1", "planner").with_title("first"))
            .unwrap();
        let result = store.register(StepDefinition::new("S1", "other").with_title("second"));
        assert_eq!(result, Err(DefError::DuplicateStepId(StepId::new("S1"))));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&StepId::new("S1")).unwrap().title, "first");
    }

    #[test]
    fn test_forward_dependency_rejected() {
        let mut store = StepDefinitionStore::new(WorkflowId::new("wf"), "Test");
        let result = store.register(StepDefinition::new("S1", "planner").depends_on("S2"));
        assert!(matches!(result, Err(DefError::ForwardDependency { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn test_malformed_steps_rejected() {
        let mut store = StepDefinitionStore::new(WorkflowId::new("wf"), "Test");
        assert_eq!(
            store.register(StepDefinition::new("", "planner")),
            Err(DefError::EmptyStepId)
        );
        assert_eq!(
            store.register(StepDefinition::new("S1", " ")),
            Err(DefError::MissingDelegate(StepId::new("S1")))
        );
        assert_eq!(
            store.register(StepDefinition::new("S1", "planner").depends_on("S1")),
            Err(DefError::SelfDependency(StepId::new("S1")))
        );

        store.register(StepDefinition::new("S0", "planner")).unwrap();
        assert!(matches!(
            store.register(
                StepDefinition::new("S1", "planner")
                    .depends_on("S0")
                    .depends_on("S0")
            ),
            Err(DefError::DuplicateDependency { .. })
        ));
        assert!(matches!(
            store.register(
                StepDefinition::new("S1", "planner")
                    .with_input(InputSpec::required("brief"))
                    .with_input(InputSpec::optional("brief"))
            ),
            Err(DefError::DuplicateInput { .. })
        ));
        assert!(matches!(
            store.register(
                StepDefinition::new("S1", "planner")
                    .with_output(OutputSpec::new("plan"))
                    .with_output(OutputSpec::new("plan"))
            ),
            Err(DefError::DuplicateOutput { .. })
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_publish_validates_graph() {
        let mut store = StepDefinitionStore::new(WorkflowId::new("wf"), "Test");
        store
            .register(StepDefinition::new("S1", "planner").with_next("ghost"))
            .unwrap();
        assert!(matches!(
            store.publish(),
            Err(GraphError::DanglingReference { .. })
        ));

        let empty = StepDefinitionStore::new(WorkflowId::new("empty"), "Empty");
        assert!(matches!(empty.publish(), Err(GraphError::EmptyWorkflow(_))));
    }

    #[test]
    fn test_published_workflow_lookup() {
        let published = StepDefinitionStore::from_definition(review_definition("wf-1", 1))
            .unwrap()
            .publish()
            .unwrap();
        assert_eq!(published.entry_step().step_id, StepId::new("draft"));
        assert_eq!(published.steps().len(), 3);
        assert_eq!(published.roles().len(), 2);
        assert!(published.get(&StepId::new("fix")).is_ok());
    }

    #[test]
    fn test_catalog_rejects_republication() {
        let mut catalog = WorkflowCatalog::new();
        catalog.publish(review_definition("wf-1", 1)).unwrap();
        let result = catalog.publish(review_definition("wf-1", 2));
        assert!(matches!(
            result,
            Err(WorkflowError::Definition(DefError::WorkflowExists(_)))
        ));
        assert_eq!(catalog.count(), 1);
    }

    #[test]
    fn test_catalog_versions_by_name() {
        let mut catalog = WorkflowCatalog::new();
        catalog.publish(review_definition("wf-1", 1)).unwrap();
        catalog.publish(review_definition("wf-2", 2)).unwrap();

        assert_eq!(catalog.versions_by_name("Review").len(), 2);
        let latest = catalog.latest_by_name("Review").unwrap();
        assert_eq!(latest.id(), &WorkflowId::new("wf-2"));
        assert!(catalog.latest_by_name("Nonexistent").is_none());
        assert!(catalog.contains(&WorkflowId::new("wf-1")));
        assert_eq!(catalog.list().len(), 2);
    }

    #[test]
    fn test_catalog_invalid_definition_not_stored() {
        let mut catalog = WorkflowCatalog::new();
        let bad = WorkflowDefinition::new(WorkflowId::new("bad"), "Bad")
            .with_step(StepDefinition::new("A", "r").with_next("B"))
            .with_step(StepDefinition::new("B", "r").with_next("A"));
        assert!(matches!(
            catalog.publish(bad),
            Err(WorkflowError::Graph(GraphError::CycleDetected { .. }))
        ));
        assert_eq!(catalog.count(), 0);
        assert!(matches!(
            catalog.get(&WorkflowId::new("bad")),
            Err(WorkflowError::WorkflowNotFound(_))
        ));
    }
}
