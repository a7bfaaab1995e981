//! Workflow engine: drives task instances through a published graph
//!
//! Within one task, steps run strictly one after another and the graph is
//! re-read after every executor call. Distinct tasks may run in parallel;
//! a per-task guard stops two workers from driving the same task.
//!
//! The engine never performs step work itself. Delegates do.

use crate::config::{DependencyPolicy, EngineConfig};
use crate::decision_gate::{ComplexityAssessor, DecisionGate, MetadataAssessor};
use crate::definition_store::PublishedWorkflow;
use crate::delegate::DelegateRegistry;
use crate::executor::StepExecutor;
use crate::knowledge::{KnowledgeSource, NoKnowledge};
use crate::task_store::{NewTask, TaskStore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use taskflow_types::{
    EntryOutcome, FailureContext, FailureKind, GraphError, HistoryEntry, StepId, StepOutcome,
    StoreError, SuspendReason, TaskId, TaskRecord, TaskStatus, WorkflowError, WorkflowResult,
    ENGINE_ACTOR,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Actor recorded for guidance resume entries
pub const GUIDANCE_ACTOR: &str = "guidance";
/// Actor recorded for cancellation entries
pub const OPERATOR_ACTOR: &str = "operator";

/// Resume signal for a `Blocked` task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidanceSignal {
    pub task_id: TaskId,
    pub answer: String,
}

impl GuidanceSignal {
    pub fn new(task_id: TaskId, answer: impl Into<String>) -> Self {
        Self {
            task_id,
            answer: answer.into(),
        }
    }
}

/// Report of one `run_task` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskRun {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub current_step_id: Option<StepId>,
    /// Executor invocations made by this call
    pub steps_executed: u32,
    /// Why the task parked, when it parked during this call
    pub suspension: Option<SuspendReason>,
}

impl TaskRun {
    fn new(record: &TaskRecord, steps_executed: u32, suspension: Option<SuspendReason>) -> Self {
        Self {
            task_id: record.id.clone(),
            status: record.status,
            current_step_id: record.current_step_id.clone(),
            steps_executed,
            suspension,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }

    pub fn is_blocked(&self) -> bool {
        self.status == TaskStatus::Blocked
    }
}

/// Marks a task as being driven; released on drop
struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<TaskId>>,
    task_id: TaskId,
}

impl<'a> RunningGuard<'a> {
    fn acquire(running: &'a Mutex<HashSet<TaskId>>, task_id: &TaskId) -> WorkflowResult<Self> {
        let mut set = running
            .lock()
            .map_err(|_| StoreError::Backend("running set lock poisoned".to_string()))?;
        if !set.insert(task_id.clone()) {
            return Err(WorkflowError::TaskBusy(task_id.clone()));
        }
        Ok(Self {
            running,
            task_id: task_id.clone(),
        })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.running.lock() {
            set.remove(&self.task_id);
        }
    }
}

/// Drives tasks through one published workflow
pub struct WorkflowEngine {
    workflow: Arc<PublishedWorkflow>,
    store: Arc<dyn TaskStore>,
    executor: StepExecutor,
    knowledge: Arc<dyn KnowledgeSource>,
    assessor: Arc<dyn ComplexityAssessor>,
    config: EngineConfig,
    running: Mutex<HashSet<TaskId>>,
}

impl WorkflowEngine {
    /// Bind a published workflow to a store and delegates.
    ///
    /// Every role the graph delegates to must have a delegate, so dispatch
    /// never fails on an unknown role at run time.
    pub fn new(
        workflow: Arc<PublishedWorkflow>,
        store: Arc<dyn TaskStore>,
        delegates: DelegateRegistry,
        config: EngineConfig,
    ) -> WorkflowResult<Self> {
        if let Some((step, role)) = workflow
            .roles()
            .into_iter()
            .find(|(_, role)| !delegates.contains(role))
        {
            return Err(GraphError::UnknownRole {
                step: step.clone(),
                role: role.clone(),
            }
            .into());
        }

        let knowledge: Arc<dyn KnowledgeSource> = Arc::new(NoKnowledge);
        let assessor: Arc<dyn ComplexityAssessor> = Arc::new(MetadataAssessor);
        let gate = DecisionGate::new(knowledge.clone(), assessor.clone(), config.gate.clone());
        let executor = StepExecutor::new(store.clone(), delegates, gate);

        tracing::info!(
            workflow_id = %workflow.id(),
            version = workflow.version(),
            "Workflow engine ready"
        );
        Ok(Self {
            workflow,
            store,
            executor,
            knowledge,
            assessor,
            config,
            running: Mutex::new(HashSet::new()),
        })
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeSource>) -> Self {
        self.knowledge = knowledge;
        self.rebuild_gate();
        self
    }

    pub fn with_assessor(mut self, assessor: Arc<dyn ComplexityAssessor>) -> Self {
        self.assessor = assessor;
        self.rebuild_gate();
        self
    }

    fn rebuild_gate(&mut self) {
        let gate = DecisionGate::new(
            self.knowledge.clone(),
            self.assessor.clone(),
            self.config.gate.clone(),
        );
        self.executor = self.executor.clone().with_gate(gate);
    }

    pub fn workflow(&self) -> &Arc<PublishedWorkflow> {
        &self.workflow
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self, task_id: &TaskId) -> bool {
        self.running
            .lock()
            .map(|set| set.contains(task_id))
            .unwrap_or(false)
    }

    // ── Task Intake ──────────────────────────────────────────────────

    /// Create a task. Prerequisite tasks must already exist, which keeps
    /// the task dependency graph acyclic.
    pub async fn submit(&self, task: NewTask) -> WorkflowResult<TaskRecord> {
        for prerequisite in &task.depends_on {
            self.store.get(prerequisite).await?;
        }
        let record = self.store.create(task).await?;
        tracing::info!(
            task_id = %record.id,
            workflow_id = %self.workflow.id(),
            prerequisites = record.depends_on.len(),
            "Task submitted"
        );
        Ok(record)
    }

    pub async fn get_task(&self, task_id: &TaskId) -> WorkflowResult<TaskRecord> {
        Ok(self.store.get(task_id).await?)
    }

    // ── Driving ──────────────────────────────────────────────────────

    /// Drive a task until it finishes, parks in `Blocked`, or cannot start
    pub async fn run_task(&self, task_id: &TaskId) -> WorkflowResult<TaskRun> {
        let _guard = RunningGuard::acquire(&self.running, task_id)?;
        self.drive(task_id).await
    }

    /// Deliver guidance to a `Blocked` task and continue driving it
    pub async fn resume(&self, signal: GuidanceSignal) -> WorkflowResult<TaskRun> {
        let task_id = &signal.task_id;
        let _guard = RunningGuard::acquire(&self.running, task_id)?;

        let record = self.store.get(task_id).await?;
        if record.status != TaskStatus::Blocked {
            return Err(WorkflowError::UnexpectedStatus {
                task_id: task_id.clone(),
                status: record.status,
                expected: TaskStatus::Blocked,
            });
        }

        let entry = HistoryEntry::new(
            record.current_step_id.clone(),
            EntryOutcome::Resumed,
            GUIDANCE_ACTOR,
        )
        .with_detail(signal.answer.clone());
        self.store
            .transition(task_id, TaskStatus::InProgress, entry)
            .await?;
        tracing::info!(
            task_id = %task_id,
            step_id = ?record.current_step_id,
            "Task resumed with guidance"
        );

        self.drive(task_id).await
    }

    /// Mark a task `Failed` from outside. Cooperative: a step already in
    /// flight finishes and is recorded, but its routing is skipped.
    ///
    /// The status change and the `Cancelled` entry land together, so a
    /// worker that observes `Failed` and archives the task cannot drop
    /// the cancellation from the history.
    pub async fn cancel(&self, task_id: &TaskId, reason: &str) -> WorkflowResult<TaskRecord> {
        let record = self.store.get(task_id).await?;
        let entry = HistoryEntry::new(
            record.current_step_id.clone(),
            EntryOutcome::Cancelled,
            OPERATOR_ACTOR,
        )
        .with_detail(reason);
        let (from, _) = self
            .store
            .transition(task_id, TaskStatus::Failed, entry)
            .await?;

        // archiving is idempotent; a worker may already have done it
        if !self.is_running(task_id) {
            self.store.archive(task_id).await?;
        }
        tracing::info!(task_id = %task_id, from = %from, reason = %reason, "Task cancelled");
        Ok(self.store.get(task_id).await?)
    }

    /// Drive every runnable task, in waves, until nothing more can start.
    ///
    /// A task is runnable when it is `Planned` (or `InProgress` with no
    /// worker) and its prerequisites allow it under the dependency policy.
    /// Each task is attempted at most once per call.
    pub async fn run_pending(self: &Arc<Self>) -> WorkflowResult<Vec<TaskRun>> {
        let semaphore = Arc::new(Semaphore::new(
            self.config.scheduler.max_concurrent_tasks.max(1),
        ));
        let mut attempted: HashSet<TaskId> = HashSet::new();
        let mut runs = Vec::new();

        loop {
            let snapshot = self.store.snapshot().await?;
            let runnable: Vec<TaskId> = snapshot
                .iter()
                .filter(|r| matches!(r.status, TaskStatus::Planned | TaskStatus::InProgress))
                .filter(|r| !attempted.contains(&r.id))
                .filter(|r| self.may_start(r, &snapshot))
                .map(|r| r.id.clone())
                .collect();
            if runnable.is_empty() {
                break;
            }
            tracing::debug!(tasks = runnable.len(), "Starting task wave");

            let mut wave = JoinSet::new();
            for task_id in runnable {
                attempted.insert(task_id.clone());
                let engine = Arc::clone(self);
                let permits = Arc::clone(&semaphore);
                wave.spawn(async move {
                    let _permit = permits.acquire_owned().await.ok();
                    let result = engine.run_task(&task_id).await;
                    (task_id, result)
                });
            }

            while let Some(joined) = wave.join_next().await {
                match joined {
                    Ok((_, Ok(run))) => runs.push(run),
                    Ok((task_id, Err(e))) => {
                        tracing::warn!(task_id = %task_id, error = %e, "Task run failed")
                    }
                    Err(e) => tracing::warn!(error = %e, "Task worker panicked or was aborted"),
                }
            }
        }

        Ok(runs)
    }

    fn may_start(&self, record: &TaskRecord, snapshot: &[TaskRecord]) -> bool {
        if record.status != TaskStatus::Planned
            || self.config.scheduler.dependency_policy == DependencyPolicy::Ignore
        {
            return true;
        }
        record.depends_on.iter().all(|prerequisite| {
            snapshot
                .iter()
                .find(|r| &r.id == prerequisite)
                .is_some_and(|r| r.is_terminal())
        })
    }

    async fn drive(&self, task_id: &TaskId) -> WorkflowResult<TaskRun> {
        let record = self.store.get(task_id).await?;
        match record.status {
            TaskStatus::Done | TaskStatus::Failed => {
                self.store.archive(task_id).await?;
                return Ok(TaskRun::new(&record, 0, None));
            }
            TaskStatus::Blocked => return Ok(TaskRun::new(&record, 0, None)),
            TaskStatus::Planned => {
                if let Some(run) = self.start(&record).await? {
                    return Ok(run);
                }
            }
            TaskStatus::InProgress => {
                if record.current_step_id.is_none() {
                    let entry = self.workflow.entry_step().step_id.clone();
                    self.store.advance(task_id, entry).await?;
                }
            }
        }

        let limit = self.config.executor.max_step_executions;
        let mut steps_executed = 0u32;
        let mut suspension = None;

        loop {
            let record = self.store.get(task_id).await?;
            if record.status != TaskStatus::InProgress {
                break;
            }
            let Some(step_id) = record.current_step_id.clone() else {
                break;
            };

            if steps_executed >= limit {
                self.fail_task(
                    task_id,
                    Some(step_id),
                    FailureContext::new(FailureKind::StepBudgetExhausted { limit }),
                )
                .await?;
                break;
            }

            let step = self.workflow.get(&step_id)?;
            match self.executor.run(task_id, step).await {
                Ok(StepOutcome::Suspended(reason)) => {
                    steps_executed += 1;
                    suspension = Some(reason);
                }
                Ok(_) => steps_executed += 1,
                Err(WorkflowError::UnexpectedStatus { .. }) => break,
                Err(e) => return Err(e),
            }
        }

        let record = self.store.get(task_id).await?;
        if record.is_terminal() {
            self.store.archive(task_id).await?;
        }
        tracing::info!(
            task_id = %task_id,
            status = %record.status,
            current_step = ?record.current_step_id,
            steps_executed,
            "Task run finished"
        );
        Ok(TaskRun::new(&record, steps_executed, suspension))
    }

    /// Move a `Planned` task into the graph. Returns a finished report if
    /// the task failed on its prerequisites instead.
    async fn start(&self, record: &TaskRecord) -> WorkflowResult<Option<TaskRun>> {
        let task_id = &record.id;

        if self.config.scheduler.dependency_policy == DependencyPolicy::WaitForDone {
            let mut pending = Vec::new();
            let mut failed = Vec::new();
            for prerequisite in &record.depends_on {
                match self.store.get(prerequisite).await?.status {
                    TaskStatus::Done => {}
                    TaskStatus::Failed => failed.push(prerequisite.clone()),
                    _ => pending.push(prerequisite.clone()),
                }
            }

            if !failed.is_empty() {
                self.fail_task(
                    task_id,
                    None,
                    FailureContext::new(FailureKind::DependencyFailed { tasks: failed }),
                )
                .await?;
                self.store.archive(task_id).await?;
                let record = self.store.get(task_id).await?;
                return Ok(Some(TaskRun::new(&record, 0, None)));
            }
            if !pending.is_empty() {
                return Err(WorkflowError::DependenciesPending {
                    task_id: task_id.clone(),
                    pending,
                });
            }
        }

        let entry = self.workflow.entry_step().step_id.clone();
        self.store.set_status(task_id, TaskStatus::InProgress).await?;
        self.store.advance(task_id, entry.clone()).await?;
        tracing::info!(
            task_id = %task_id,
            workflow_id = %self.workflow.id(),
            entry_step = %entry,
            "Task started"
        );
        Ok(None)
    }

    /// Record an engine-level failure and fail the task
    async fn fail_task(
        &self,
        task_id: &TaskId,
        step_id: Option<StepId>,
        failure: FailureContext,
    ) -> WorkflowResult<()> {
        tracing::warn!(task_id = %task_id, failure = %failure, "Failing task");
        let entry = HistoryEntry::new(step_id, EntryOutcome::Failure, ENGINE_ACTOR)
            .with_detail(failure.describe());
        match self.store.transition(task_id, TaskStatus::Failed, entry).await {
            Ok(_) => Ok(()),
            // already terminal through cancellation
            Err(e) if e.is_invalid_transition() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("workflow", &self.workflow.id())
            .field("executor", &self.executor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition_store::StepDefinitionStore;
    use crate::delegate::MockDelegate;
    use crate::task_store::InMemoryTaskStore;
    use async_trait::async_trait;
    use taskflow_types::{StepDefinition, StoreResult, WorkflowId};

    /// Archives a task the moment it turns terminal, the way a worker that
    /// observes `Failed` between two store calls would.
    #[derive(Default)]
    struct EagerArchiver {
        inner: InMemoryTaskStore,
    }

    impl EagerArchiver {
        async fn archive_if_terminal(
            &self,
            task_id: &TaskId,
            status: TaskStatus,
        ) -> StoreResult<()> {
            if status.is_terminal() {
                self.inner.archive(task_id).await?;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl TaskStore for EagerArchiver {
        async fn create(&self, task: NewTask) -> StoreResult<TaskRecord> {
            self.inner.create(task).await
        }

        async fn get(&self, task_id: &TaskId) -> StoreResult<TaskRecord> {
            self.inner.get(task_id).await
        }

        async fn append_history(&self, task_id: &TaskId, entry: HistoryEntry) -> StoreResult<u64> {
            self.inner.append_history(task_id, entry).await
        }

        async fn set_status(
            &self,
            task_id: &TaskId,
            new_status: TaskStatus,
        ) -> StoreResult<TaskStatus> {
            let from = self.inner.set_status(task_id, new_status).await?;
            self.archive_if_terminal(task_id, new_status).await?;
            Ok(from)
        }

        async fn transition(
            &self,
            task_id: &TaskId,
            new_status: TaskStatus,
            entry: HistoryEntry,
        ) -> StoreResult<(TaskStatus, u64)> {
            let applied = self.inner.transition(task_id, new_status, entry).await?;
            self.archive_if_terminal(task_id, new_status).await?;
            Ok(applied)
        }

        async fn advance(&self, task_id: &TaskId, step_id: StepId) -> StoreResult<()> {
            self.inner.advance(task_id, step_id).await
        }

        async fn archive(&self, task_id: &TaskId) -> StoreResult<()> {
            self.inner.archive(task_id).await
        }

        async fn is_archived(&self, task_id: &TaskId) -> StoreResult<bool> {
            self.inner.is_archived(task_id).await
        }

        async fn list(&self) -> StoreResult<Vec<TaskRecord>> {
            self.inner.list().await
        }

        async fn list_archived(&self) -> StoreResult<Vec<TaskRecord>> {
            self.inner.list_archived().await
        }

        async fn snapshot(&self) -> StoreResult<Vec<TaskRecord>> {
            self.inner.snapshot().await
        }
    }

    fn single_step_workflow() -> Arc<PublishedWorkflow> {
        let mut store = StepDefinitionStore::new(WorkflowId::new("wf"), "Single");
        store.register(StepDefinition::new("only", "worker")).unwrap();
        store.publish().unwrap()
    }

    fn engine(delegate: Arc<MockDelegate>) -> WorkflowEngine {
        WorkflowEngine::new(
            single_step_workflow(),
            Arc::new(InMemoryTaskStore::new()),
            DelegateRegistry::new().with("worker", delegate),
            EngineConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_unknown_role_rejected() {
        let result = WorkflowEngine::new(
            single_step_workflow(),
            Arc::new(InMemoryTaskStore::new()),
            DelegateRegistry::new(),
            EngineConfig::default(),
        );
        assert!(matches!(
            result,
            Err(WorkflowError::Graph(GraphError::UnknownRole { .. }))
        ));
    }

    #[tokio::test]
    async fn test_single_step_task_completes_and_archives() {
        let engine = engine(Arc::new(MockDelegate::succeeding()));
        let task = engine.submit(NewTask::new(TaskId::new("t1"))).await.unwrap();

        let run = engine.run_task(&task.id).await.unwrap();
        assert!(run.is_done());
        assert_eq!(run.steps_executed, 1);
        assert!(engine.store().is_archived(&task.id).await.unwrap());
        assert!(!engine.is_running(&task.id));

        // a finished task is reported, not re-run
        let again = engine.run_task(&task.id).await.unwrap();
        assert_eq!(again.steps_executed, 0);
    }

    #[tokio::test]
    async fn test_submit_requires_existing_prerequisites() {
        let engine = engine(Arc::new(MockDelegate::succeeding()));
        let result = engine
            .submit(NewTask::new(TaskId::new("t2")).depends_on(TaskId::new("ghost")))
            .await;
        assert!(matches!(
            result,
            Err(WorkflowError::Store(StoreError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_busy_task_rejected() {
        let engine = engine(Arc::new(MockDelegate::succeeding()));
        let id = TaskId::new("t1");
        engine.submit(NewTask::new(id.clone())).await.unwrap();

        let _held = RunningGuard::acquire(&engine.running, &id).unwrap();
        assert!(matches!(
            engine.run_task(&id).await,
            Err(WorkflowError::TaskBusy(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_planned_task() {
        let delegate = Arc::new(MockDelegate::succeeding());
        let engine = engine(delegate.clone());
        let id = TaskId::new("t1");
        engine.submit(NewTask::new(id.clone())).await.unwrap();

        let record = engine.cancel(&id, "no longer needed").await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        let last = record.last_entry().unwrap();
        assert_eq!(last.outcome, EntryOutcome::Cancelled);
        assert_eq!(last.actor, OPERATOR_ACTOR);
        assert!(engine.store().is_archived(&id).await.unwrap());

        let run = engine.run_task(&id).await.unwrap();
        assert!(run.is_failed());
        assert_eq!(delegate.call_count(), 0);

        // terminal tasks cannot be cancelled again
        assert!(matches!(
            engine.cancel(&id, "again").await,
            Err(WorkflowError::Store(StoreError::InvalidTransition { .. }))
        ));
    }

    #[tokio::test]
    async fn test_cancel_records_reason_when_archived_concurrently() {
        let engine = WorkflowEngine::new(
            single_step_workflow(),
            Arc::new(EagerArchiver::default()),
            DelegateRegistry::new().with("worker", Arc::new(MockDelegate::succeeding())),
            EngineConfig::default(),
        )
        .unwrap();
        let id = TaskId::new("t1");
        engine.submit(NewTask::new(id.clone())).await.unwrap();
        engine.store().set_status(&id, TaskStatus::InProgress).await.unwrap();
        engine.store().advance(&id, StepId::new("only")).await.unwrap();

        let record = engine.cancel(&id, "superseded").await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(engine.store().is_archived(&id).await.unwrap());

        let last = record.last_entry().unwrap();
        assert_eq!(last.outcome, EntryOutcome::Cancelled);
        assert_eq!(last.step_id, Some(StepId::new("only")));
        assert_eq!(last.detail.as_deref(), Some("superseded"));
    }

    #[tokio::test]
    async fn test_resume_requires_blocked() {
        let engine = engine(Arc::new(MockDelegate::succeeding()));
        let id = TaskId::new("t1");
        engine.submit(NewTask::new(id.clone())).await.unwrap();
        let result = engine.resume(GuidanceSignal::new(id, "go")).await;
        assert!(matches!(
            result,
            Err(WorkflowError::UnexpectedStatus {
                expected: TaskStatus::Blocked,
                ..
            })
        ));
    }
}
