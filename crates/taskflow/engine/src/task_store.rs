//! Task record store
//!
//! The store is the only mutable state shared between workers. Every
//! status change goes through [`TaskStore::set_status`] or
//! [`TaskStore::transition`], which check the transition table under a
//! per-task lock and fail closed. History is append-only; the store
//! assigns each entry its sequence number.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use taskflow_types::{
    HistoryEntry, StepId, StoreError, StoreResult, TaskId, TaskRecord, TaskStatus,
};

/// Parameters for creating a task
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTask {
    pub task_id: TaskId,
    pub initial_status: TaskStatus,
    pub metadata: BTreeMap<String, String>,
    pub related_docs: BTreeSet<String>,
    pub depends_on: BTreeSet<TaskId>,
}

impl NewTask {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            initial_status: TaskStatus::Planned,
            metadata: BTreeMap::new(),
            related_docs: BTreeSet::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// A task with a freshly generated id
    pub fn generate() -> Self {
        Self::new(TaskId::generate())
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.initial_status = status;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_related_doc(mut self, reference: impl Into<String>) -> Self {
        self.related_docs.insert(reference.into());
        self
    }

    pub fn depends_on(mut self, task_id: TaskId) -> Self {
        self.depends_on.insert(task_id);
        self
    }
}

/// Storage interface for task records
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a task. Terminal initial statuses are rejected.
    async fn create(&self, task: NewTask) -> StoreResult<TaskRecord>;

    /// Get a task, active or archived
    async fn get(&self, task_id: &TaskId) -> StoreResult<TaskRecord>;

    /// Append one history entry and return its sequence number
    async fn append_history(&self, task_id: &TaskId, entry: HistoryEntry) -> StoreResult<u64>;

    /// Apply a status transition, returning the previous status
    async fn set_status(&self, task_id: &TaskId, new_status: TaskStatus)
        -> StoreResult<TaskStatus>;

    /// Apply a status transition and append the entry recording it, under
    /// one lock. A rejected transition appends nothing. Returns the
    /// previous status and the entry's sequence number.
    async fn transition(
        &self,
        task_id: &TaskId,
        new_status: TaskStatus,
        entry: HistoryEntry,
    ) -> StoreResult<(TaskStatus, u64)>;

    /// Move an `InProgress` task to another step without changing status
    async fn advance(&self, task_id: &TaskId, step_id: StepId) -> StoreResult<()>;

    /// Retire a terminal task. Archived tasks stay readable.
    async fn archive(&self, task_id: &TaskId) -> StoreResult<()>;

    async fn is_archived(&self, task_id: &TaskId) -> StoreResult<bool>;

    /// Active (non-archived) tasks ordered by id
    async fn list(&self) -> StoreResult<Vec<TaskRecord>>;

    /// Archived tasks ordered by id
    async fn list_archived(&self) -> StoreResult<Vec<TaskRecord>>;

    /// Every record, active and archived, ordered by id
    async fn snapshot(&self) -> StoreResult<Vec<TaskRecord>>;
}

// ── In-Memory Store ──────────────────────────────────────────────────

#[derive(Debug)]
struct Slot {
    record: TaskRecord,
    archived: bool,
}

type SlotRef = Arc<Mutex<Slot>>;

impl Slot {
    fn push(&mut self, task_id: &TaskId, mut entry: HistoryEntry) -> StoreResult<u64> {
        if self.archived {
            return Err(StoreError::Conflict(format!(
                "task {} is archived; history is closed",
                task_id
            )));
        }
        let sequence = self.record.history.len() as u64;
        entry.sequence = sequence;
        tracing::trace!(
            task_id = %task_id,
            sequence,
            outcome = %entry.outcome,
            actor = %entry.actor,
            "History appended"
        );
        self.record.history.push(entry);
        Ok(sequence)
    }

    fn check_transition(&self, task_id: &TaskId, to: TaskStatus) -> StoreResult<TaskStatus> {
        let from = self.record.status;
        if !from.can_transition_to(to) {
            tracing::warn!(
                task_id = %task_id,
                from = %from,
                to = %to,
                "Rejected status transition"
            );
            return Err(StoreError::InvalidTransition {
                task_id: task_id.clone(),
                from,
                to,
            });
        }
        Ok(from)
    }

    fn apply(&mut self, task_id: &TaskId, to: TaskStatus) {
        let from = self.record.status;
        self.record.status = to;
        tracing::debug!(task_id = %task_id, from = %from, to = %to, "Status changed");
    }
}

/// In-memory task store.
///
/// The outer map lock is held only to find or insert a slot. All
/// per-task reads and writes happen under that task's own mutex, so
/// updates to different tasks never serialize on each other.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, SlotRef>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from exported records. Terminal records are archived.
    pub fn restore(records: impl IntoIterator<Item = TaskRecord>) -> StoreResult<Self> {
        let mut tasks = HashMap::new();
        for record in records {
            let id = record.id.clone();
            if tasks.contains_key(&id) {
                return Err(StoreError::AlreadyExists(id));
            }
            let archived = record.is_terminal();
            tasks.insert(id, Arc::new(Mutex::new(Slot { record, archived })));
        }
        tracing::info!(tasks = tasks.len(), "Task store restored");
        Ok(Self {
            tasks: RwLock::new(tasks),
        })
    }

    fn slot(&self, task_id: &TaskId) -> StoreResult<SlotRef> {
        let guard = self
            .tasks
            .read()
            .map_err(|_| StoreError::Backend("task map lock poisoned".to_string()))?;
        guard
            .get(task_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(task_id.clone()))
    }

    fn with_slot<T>(
        &self,
        task_id: &TaskId,
        f: impl FnOnce(&mut Slot) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let slot = self.slot(task_id)?;
        let mut guard = slot
            .lock()
            .map_err(|_| StoreError::Backend(format!("task {} lock poisoned", task_id)))?;
        f(&mut *guard)
    }

    fn collect(&self, filter: impl Fn(&Slot) -> bool) -> StoreResult<Vec<TaskRecord>> {
        let slots: Vec<SlotRef> = {
            let guard = self
                .tasks
                .read()
                .map_err(|_| StoreError::Backend("task map lock poisoned".to_string()))?;
            guard.values().cloned().collect()
        };

        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            let guard = slot
                .lock()
                .map_err(|_| StoreError::Backend("task lock poisoned".to_string()))?;
            if filter(&*guard) {
                records.push(guard.record.clone());
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: NewTask) -> StoreResult<TaskRecord> {
        if task.initial_status.is_terminal() {
            return Err(StoreError::InvalidInitialStatus(task.initial_status));
        }

        let mut guard = self
            .tasks
            .write()
            .map_err(|_| StoreError::Backend("task map lock poisoned".to_string()))?;
        if guard.contains_key(&task.task_id) {
            return Err(StoreError::AlreadyExists(task.task_id));
        }

        let mut record = TaskRecord::new(task.task_id);
        record.status = task.initial_status;
        record.metadata = task.metadata;
        record.related_docs = task.related_docs;
        record.depends_on = task.depends_on;

        guard.insert(
            record.id.clone(),
            Arc::new(Mutex::new(Slot {
                record: record.clone(),
                archived: false,
            })),
        );
        tracing::debug!(task_id = %record.id, status = %record.status, "Task created");
        Ok(record)
    }

    async fn get(&self, task_id: &TaskId) -> StoreResult<TaskRecord> {
        self.with_slot(task_id, |slot| Ok(slot.record.clone()))
    }

    async fn append_history(&self, task_id: &TaskId, entry: HistoryEntry) -> StoreResult<u64> {
        self.with_slot(task_id, |slot| slot.push(task_id, entry))
    }

    async fn set_status(
        &self,
        task_id: &TaskId,
        new_status: TaskStatus,
    ) -> StoreResult<TaskStatus> {
        self.with_slot(task_id, |slot| {
            let from = slot.check_transition(task_id, new_status)?;
            slot.apply(task_id, new_status);
            Ok(from)
        })
    }

    async fn transition(
        &self,
        task_id: &TaskId,
        new_status: TaskStatus,
        entry: HistoryEntry,
    ) -> StoreResult<(TaskStatus, u64)> {
        self.with_slot(task_id, |slot| {
            let from = slot.check_transition(task_id, new_status)?;
            let sequence = slot.push(task_id, entry)?;
            slot.apply(task_id, new_status);
            Ok((from, sequence))
        })
    }

    async fn advance(&self, task_id: &TaskId, step_id: StepId) -> StoreResult<()> {
        self.with_slot(task_id, |slot| {
            if slot.record.status != TaskStatus::InProgress {
                return Err(StoreError::Conflict(format!(
                    "task {} is {}; only InProgress tasks advance",
                    task_id, slot.record.status
                )));
            }
            slot.record.current_step_id = Some(step_id);
            Ok(())
        })
    }

    async fn archive(&self, task_id: &TaskId) -> StoreResult<()> {
        self.with_slot(task_id, |slot| {
            if !slot.record.is_terminal() {
                return Err(StoreError::Conflict(format!(
                    "task {} is {}; only Done or Failed tasks are archived",
                    task_id, slot.record.status
                )));
            }
            if !slot.archived {
                slot.archived = true;
                tracing::info!(task_id = %task_id, status = %slot.record.status, "Task archived");
            }
            Ok(())
        })
    }

    async fn is_archived(&self, task_id: &TaskId) -> StoreResult<bool> {
        self.with_slot(task_id, |slot| Ok(slot.archived))
    }

    async fn list(&self) -> StoreResult<Vec<TaskRecord>> {
        self.collect(|slot| !slot.archived)
    }

    async fn list_archived(&self) -> StoreResult<Vec<TaskRecord>> {
        self.collect(|slot| slot.archived)
    }

    async fn snapshot(&self) -> StoreResult<Vec<TaskRecord>> {
        self.collect(|_| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_types::EntryOutcome;

    fn entry(step: &str, outcome: EntryOutcome) -> HistoryEntry {
        HistoryEntry::new(Some(StepId::new(step)), outcome, "tester")
    }

    #[test]
    fn test_new_task_starts_planned_and_empty() {
        let task = NewTask::new(TaskId::new("t1"));
        assert_eq!(task.task_id, TaskId::new("t1"));
        assert_eq!(task.initial_status, TaskStatus::Planned);
        assert!(task.metadata.is_empty());
        assert!(task.related_docs.is_empty());
        assert!(task.depends_on.is_empty());
        assert!(!NewTask::generate().task_id.as_str().is_empty());
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryTaskStore::new();
        let created = store
            .create(
                NewTask::new(TaskId::new("t1"))
                    .with_metadata("complexity", "simple")
                    .with_related_doc("docs/a.md"),
            )
            .await
            .unwrap();
        assert_eq!(created.status, TaskStatus::Planned);

        let fetched = store.get(&TaskId::new("t1")).await.unwrap();
        assert_eq!(fetched, created);
        assert!(matches!(
            store.get(&TaskId::new("missing")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_and_terminal_status() {
        let store = InMemoryTaskStore::new();
        store.create(NewTask::new(TaskId::new("t1"))).await.unwrap();
        assert!(matches!(
            store.create(NewTask::new(TaskId::new("t1"))).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert_eq!(
            store
                .create(NewTask::new(TaskId::new("t2")).with_status(TaskStatus::Done))
                .await,
            Err(StoreError::InvalidInitialStatus(TaskStatus::Done))
        );
    }

    #[tokio::test]
    async fn test_append_assigns_sequence() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::new("t1");
        store.create(NewTask::new(id.clone())).await.unwrap();

        assert_eq!(store.append_history(&id, entry("S1", EntryOutcome::Success)).await, Ok(0));
        assert_eq!(store.append_history(&id, entry("S2", EntryOutcome::Failure)).await, Ok(1));

        let record = store.get(&id).await.unwrap();
        let sequences: Vec<u64> = record.history.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_set_status_enforces_table() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::new("t1");
        store.create(NewTask::new(id.clone())).await.unwrap();

        let result = store.set_status(&id, TaskStatus::Done).await;
        assert!(result.as_ref().unwrap_err().is_invalid_transition());
        assert_eq!(store.get(&id).await.unwrap().status, TaskStatus::Planned);

        assert_eq!(
            store.set_status(&id, TaskStatus::InProgress).await,
            Ok(TaskStatus::Planned)
        );
        // the same transition twice is not applied twice
        assert!(matches!(
            store.set_status(&id, TaskStatus::InProgress).await,
            Err(StoreError::InvalidTransition { .. })
        ));
        store.set_status(&id, TaskStatus::Blocked).await.unwrap();
        store.set_status(&id, TaskStatus::InProgress).await.unwrap();
        store.set_status(&id, TaskStatus::Done).await.unwrap();
        assert!(store.set_status(&id, TaskStatus::Failed).await.is_err());
    }

    #[tokio::test]
    async fn test_transition_applies_status_and_entry_together() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::new("t1");
        store.create(NewTask::new(id.clone())).await.unwrap();

        let rejected = store
            .transition(&id, TaskStatus::Done, entry("S1", EntryOutcome::Success))
            .await;
        assert!(rejected.unwrap_err().is_invalid_transition());
        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Planned);
        assert!(record.history.is_empty());

        store.set_status(&id, TaskStatus::InProgress).await.unwrap();
        store.append_history(&id, entry("S1", EntryOutcome::Success)).await.unwrap();
        assert_eq!(
            store
                .transition(&id, TaskStatus::Failed, entry("S1", EntryOutcome::Cancelled))
                .await,
            Ok((TaskStatus::InProgress, 1))
        );
        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.last_entry().unwrap().outcome, EntryOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_advance_requires_in_progress() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::new("t1");
        store.create(NewTask::new(id.clone())).await.unwrap();
        assert!(matches!(
            store.advance(&id, StepId::new("S1")).await,
            Err(StoreError::Conflict(_))
        ));

        store.set_status(&id, TaskStatus::InProgress).await.unwrap();
        store.advance(&id, StepId::new("S1")).await.unwrap();
        assert_eq!(
            store.get(&id).await.unwrap().current_step_id,
            Some(StepId::new("S1"))
        );
    }

    #[tokio::test]
    async fn test_archive_closes_history() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::new("t1");
        store.create(NewTask::new(id.clone())).await.unwrap();
        assert!(matches!(store.archive(&id).await, Err(StoreError::Conflict(_))));

        store.set_status(&id, TaskStatus::Failed).await.unwrap();
        store.archive(&id).await.unwrap();
        assert!(store.is_archived(&id).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(store.list_archived().await.unwrap().len(), 1);
        assert!(store.get(&id).await.is_ok());
        assert!(matches!(
            store.append_history(&id, entry("S1", EntryOutcome::Success)).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_and_restore() {
        let store = InMemoryTaskStore::new();
        let active = TaskId::new("a");
        let finished = TaskId::new("b");
        store.create(NewTask::new(active.clone())).await.unwrap();
        store
            .create(NewTask::new(finished.clone()).depends_on(active.clone()))
            .await
            .unwrap();
        store.set_status(&finished, TaskStatus::Failed).await.unwrap();
        store
            .append_history(&finished, entry("S1", EntryOutcome::Cancelled))
            .await
            .unwrap();

        let snapshot = store.snapshot().await.unwrap();
        let json = serde_json::to_string(&snapshot).unwrap();
        let records: Vec<TaskRecord> = serde_json::from_str(&json).unwrap();

        let restored = InMemoryTaskStore::restore(records).unwrap();
        assert_eq!(restored.snapshot().await.unwrap(), snapshot);
        assert!(restored.is_archived(&finished).await.unwrap());
        assert!(!restored.is_archived(&active).await.unwrap());
    }

    #[tokio::test]
    async fn test_restore_rejects_duplicate_ids() {
        let records = vec![
            TaskRecord::new(TaskId::new("dup")),
            TaskRecord::new(TaskId::new("dup")),
        ];
        assert!(matches!(
            InMemoryTaskStore::restore(records),
            Err(StoreError::AlreadyExists(_))
        ));
    }
}
