//! Task records: the mutable, persisted state of one unit of work
//!
//! A TaskRecord tracks a task instance through the step graph. Its
//! `history` is append-only: entries are never edited or removed, and
//! corrections are recorded as new entries. Status changes go through
//! the transition table in [`TaskStatus::can_transition_to`].

use crate::step::optional_step;
use crate::StepId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Actor recorded for entries produced by the engine itself
pub const ENGINE_ACTOR: &str = "engine";

// ── Identifier ───────────────────────────────────────────────────────

/// Unique identifier for a task
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first eight characters
    pub fn short(&self) -> &str {
        self.0
            .char_indices()
            .nth(8)
            .map_or(self.0.as_str(), |(end, _)| &self.0[..end])
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ── Task Status ──────────────────────────────────────────────────────

/// Lifecycle status of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TaskStatus {
    /// Created, not yet picked up by the engine
    #[default]
    Planned,
    /// Being driven through the step graph
    InProgress,
    /// Suspended until guidance arrives
    Blocked,
    /// Reached a terminal step successfully
    Done,
    /// Failed without recovery, or cancelled
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Planned,
        TaskStatus::InProgress,
        TaskStatus::Blocked,
        TaskStatus::Done,
        TaskStatus::Failed,
    ];

    /// `Done` and `Failed` have no outgoing transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Statuses reachable from this one in a single transition.
    ///
    /// No status lists itself: advancing between steps keeps a task
    /// `InProgress` without a status change.
    pub fn allowed_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Planned => &[TaskStatus::InProgress, TaskStatus::Failed],
            Self::InProgress => &[TaskStatus::Done, TaskStatus::Failed, TaskStatus::Blocked],
            Self::Blocked => &[TaskStatus::InProgress, TaskStatus::Failed],
            Self::Done | Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planned => "Planned",
            Self::InProgress => "InProgress",
            Self::Blocked => "Blocked",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

// ── History ──────────────────────────────────────────────────────────

/// What a history entry records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryOutcome {
    /// The step's delegate succeeded
    Success,
    /// The step failed (unmet dependency, missing input, delegate failure)
    Failure,
    /// The step parked the task awaiting guidance
    Suspended,
    /// Guidance arrived and the task was resumed
    Resumed,
    /// The task was cancelled externally
    Cancelled,
}

impl EntryOutcome {
    /// Outcomes produced by a step executor invocation
    pub fn is_step_outcome(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Suspended)
    }
}

impl std::fmt::Display for EntryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Suspended => "suspended",
            Self::Resumed => "resumed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// One immutable entry in a task's history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Position in the history, assigned by the store on append
    #[serde(default)]
    pub sequence: u64,
    /// Step the entry is about; empty when the task never reached a step
    #[serde(default, with = "optional_step")]
    pub step_id: Option<StepId>,
    pub outcome: EntryOutcome,
    pub timestamp: DateTime<Utc>,
    /// Role or actor responsible for the entry
    pub actor: String,
    /// Failure reason, suspension reason or guidance answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Outputs produced by a successful step
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
}

impl HistoryEntry {
    pub fn new(step_id: Option<StepId>, outcome: EntryOutcome, actor: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            step_id,
            outcome,
            timestamp: Utc::now(),
            actor: actor.into(),
            detail: None,
            outputs: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_outputs(mut self, outputs: BTreeMap<String, String>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn is_for(&self, step: &StepId) -> bool {
        self.step_id.as_ref() == Some(step)
    }
}

// ── Task Record ──────────────────────────────────────────────────────

/// A task in its persisted layout
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub status: TaskStatus,
    #[serde(default, with = "optional_step")]
    pub current_step_id: Option<StepId>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub related_docs: BTreeSet<String>,
    /// Task-level prerequisites, distinct from step dependencies
    #[serde(default)]
    pub depends_on: BTreeSet<TaskId>,
}

impl TaskRecord {
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            status: TaskStatus::Planned,
            current_step_id: None,
            history: Vec::new(),
            metadata: BTreeMap::new(),
            related_docs: BTreeSet::new(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn last_entry(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }

    /// Whether `step` has a recorded successful outcome for this task
    pub fn step_succeeded(&self, step: &StepId) -> bool {
        self.history
            .iter()
            .any(|e| e.is_for(step) && e.outcome == EntryOutcome::Success)
    }

    /// Number of executor invocations recorded for `step`
    pub fn attempts(&self, step: &StepId) -> u32 {
        self.history
            .iter()
            .filter(|e| e.is_for(step) && e.outcome.is_step_outcome())
            .count() as u32
    }

    /// Outputs of all successful steps, later steps overriding earlier ones
    pub fn collected_outputs(&self) -> BTreeMap<String, String> {
        let mut outputs = BTreeMap::new();
        for entry in &self.history {
            if entry.outcome == EntryOutcome::Success {
                outputs.extend(entry.outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        outputs
    }

    /// Guidance delivered for `step` that no executor run has consumed yet
    pub fn pending_guidance(&self, step: &StepId) -> Option<&str> {
        for entry in self.history.iter().rev().filter(|e| e.is_for(step)) {
            match entry.outcome {
                EntryOutcome::Resumed => return entry.detail.as_deref(),
                outcome if outcome.is_step_outcome() => return None,
                _ => continue,
            }
        }
        None
    }

    /// The step that failed last, for post-mortem inspection
    pub fn last_failure(&self) -> Option<&HistoryEntry> {
        self.history
            .iter()
            .rev()
            .find(|e| e.outcome == EntryOutcome::Failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(step: &str, outcome: EntryOutcome) -> HistoryEntry {
        HistoryEntry::new(Some(StepId::new(step)), outcome, "tester")
    }

    #[test]
    fn test_transition_table() {
        use TaskStatus::*;
        assert!(Planned.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Done));
        assert!(InProgress.can_transition_to(Blocked));
        assert!(InProgress.can_transition_to(Failed));
        assert!(Blocked.can_transition_to(InProgress));
        assert!(Blocked.can_transition_to(Failed));
        assert!(Planned.can_transition_to(Failed));

        assert!(!Planned.can_transition_to(Done));
        assert!(!Planned.can_transition_to(Blocked));
        assert!(!Blocked.can_transition_to(Done));
        for status in TaskStatus::ALL {
            assert!(!status.can_transition_to(status));
            assert!(!Done.can_transition_to(status));
            assert!(!Failed.can_transition_to(status));
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
        assert_eq!(TaskStatus::default(), TaskStatus::Planned);
    }

    #[test]
    fn test_step_queries() {
        let mut record = TaskRecord::new(TaskId::new("t1"));
        record.history.push(entry("S1", EntryOutcome::Failure));
        record.history.push(
            entry("S1", EntryOutcome::Success)
                .with_outputs(BTreeMap::from([("design".to_string(), "v1".to_string())])),
        );
        record.history.push(
            entry("S2", EntryOutcome::Success)
                .with_outputs(BTreeMap::from([("design".to_string(), "v2".to_string())])),
        );

        assert!(record.step_succeeded(&StepId::new("S1")));
        assert!(!record.step_succeeded(&StepId::new("S3")));
        assert_eq!(record.attempts(&StepId::new("S1")), 2);
        assert_eq!(record.collected_outputs().get("design").unwrap(), "v2");
        assert_eq!(
            record.last_failure().unwrap().step_id,
            Some(StepId::new("S1"))
        );
    }

    #[test]
    fn test_pending_guidance_is_consumed_by_next_run() {
        let step = StepId::new("S1");
        let mut record = TaskRecord::new(TaskId::new("t1"));
        record.history.push(entry("S1", EntryOutcome::Suspended));
        assert_eq!(record.pending_guidance(&step), None);

        record
            .history
            .push(entry("S1", EntryOutcome::Resumed).with_detail("use the v2 API"));
        assert_eq!(record.pending_guidance(&step), Some("use the v2 API"));

        record.history.push(entry("S1", EntryOutcome::Success));
        assert_eq!(record.pending_guidance(&step), None);
    }

    #[test]
    fn test_record_round_trip() {
        let mut record = TaskRecord::new(TaskId::new("t-42"));
        record.status = TaskStatus::InProgress;
        record.current_step_id = Some(StepId::new("S2"));
        record.history.push(
            entry("S1", EntryOutcome::Success)
                .with_outputs(BTreeMap::from([("plan".to_string(), "ok".to_string())])),
        );
        record.history.push(entry("S2", EntryOutcome::Failure).with_detail("timeout"));
        record
            .metadata
            .insert("complexity".to_string(), "complex".to_string());
        record.related_docs.insert("docs/design.md".to_string());
        record.depends_on.insert(TaskId::new("t-41"));

        let json = serde_json::to_string(&record).unwrap();
        let back: TaskRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_record_layout_field_names() {
        let record = TaskRecord::new(TaskId::new("t1"));
        let value = serde_json::to_value(&record).unwrap();
        let object = value.as_object().unwrap();
        for field in [
            "id",
            "status",
            "current_step_id",
            "history",
            "metadata",
            "related_docs",
            "depends_on",
        ] {
            assert!(object.contains_key(field), "missing field {}", field);
        }
        assert_eq!(value["status"], "Planned");
        assert_eq!(value["current_step_id"], "");
    }

    #[test]
    fn test_task_id() {
        let id = TaskId::generate();
        assert!(!id.0.is_empty());
        assert!(id.short().len() <= 8);
        assert_eq!(format!("{}", TaskId::new("task-1")), "task-1");
    }

    #[test]
    fn test_short_id_respects_char_boundaries() {
        assert_eq!(TaskId::new("aéééé-task").short(), "aéééé-ta");
        assert_eq!(TaskId::new("文档-评审-任务-一").short(), "文档-评审-任务");
        assert_eq!(TaskId::new("short").short(), "short");
        assert_eq!(TaskId::new("").short(), "");
    }
}
