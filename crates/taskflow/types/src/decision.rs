//! Decision vocabulary: complexity assessment, knowledge consultation
//! outcomes and escalation requests
//!
//! Escalation is explicit. When the knowledge available is insufficient
//! the task suspends with a structured request naming what is missing
//! and at least one concrete next action; nothing proceeds by guessing.

use crate::{StepId, TaskId};
use serde::{Deserialize, Serialize};

// ── Complexity ───────────────────────────────────────────────────────

/// Estimated complexity of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Routine,
    LowRisk,
    Complex,
    Novel,
    HighRisk,
}

impl Complexity {
    /// Simple, routine and low-risk work needs no knowledge consultation
    pub fn is_lightweight(&self) -> bool {
        matches!(self, Self::Simple | Self::Routine | Self::LowRisk)
    }
}

impl std::str::FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "simple" => Ok(Self::Simple),
            "routine" => Ok(Self::Routine),
            "lowrisk" => Ok(Self::LowRisk),
            "complex" => Ok(Self::Complex),
            "novel" => Ok(Self::Novel),
            "highrisk" => Ok(Self::HighRisk),
            _ => Err(format!("unknown complexity '{}'", s)),
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Simple => "simple",
            Self::Routine => "routine",
            Self::LowRisk => "low_risk",
            Self::Complex => "complex",
            Self::Novel => "novel",
            Self::HighRisk => "high_risk",
        };
        write!(f, "{}", s)
    }
}

/// Result of assessing a task's complexity
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Assessment {
    /// `None` when the assessor could not classify the task
    pub estimate: Option<Complexity>,
    /// 0.0 ..= 1.0; anything that is not a finite number counts as 0.0
    pub confidence: f32,
}

impl Assessment {
    pub fn new(estimate: Complexity, confidence: f32) -> Self {
        Self {
            estimate: Some(estimate),
            confidence: if confidence.is_finite() {
                confidence.clamp(0.0, 1.0)
            } else {
                0.0
            },
        }
    }

    pub fn unknown() -> Self {
        Self {
            estimate: None,
            confidence: 0.0,
        }
    }

    /// No estimate, or one not held with at least `threshold` confidence.
    /// A NaN confidence never meets the threshold.
    pub fn is_ambiguous(&self, threshold: f32) -> bool {
        self.estimate.is_none() || self.confidence.is_nan() || self.confidence < threshold
    }
}

/// Scratch state of a single gate evaluation. Never stored.
#[derive(Clone, Debug, PartialEq)]
pub struct DecisionContext {
    pub task_complexity_estimate: Option<Complexity>,
    pub confidence: f32,
    pub kb_consulted: bool,
    pub kb_sufficient: bool,
}

impl DecisionContext {
    pub fn from_assessment(assessment: &Assessment) -> Self {
        Self {
            task_complexity_estimate: assessment.estimate,
            confidence: assessment.confidence,
            kb_consulted: false,
            kb_sufficient: false,
        }
    }
}

// ── Knowledge Lookup ─────────────────────────────────────────────────

/// Query sent to the knowledge source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeQuery {
    pub keywords: Vec<String>,
}

/// Answer from the knowledge source
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeResult {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl KnowledgeResult {
    pub fn found(content: impl Into<String>) -> Self {
        Self {
            found: true,
            content: Some(content.into()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

// ── Decisions ────────────────────────────────────────────────────────

/// Outcome of the decision gate
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Simple/routine/low-risk: delegate with general capability only
    Skip,
    /// Knowledge was consulted and judged sufficient
    ConsultThenProceed { knowledge: String },
    /// Knowledge was consulted and judged insufficient
    ConsultThenEscalate(EscalationRequest),
    /// The assessment itself was ambiguous; ask instead of guessing
    AskForGuidance { question: String },
}

impl Decision {
    /// Decisions that park the task until a resume signal arrives
    pub fn suspend_reason(&self) -> Option<SuspendReason> {
        match self {
            Self::Skip | Self::ConsultThenProceed { .. } => None,
            Self::ConsultThenEscalate(request) => Some(SuspendReason::Escalated(request.clone())),
            Self::AskForGuidance { question } => Some(SuspendReason::AwaitingGuidance {
                question: question.clone(),
            }),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::ConsultThenProceed { .. } => "consult_then_proceed",
            Self::ConsultThenEscalate(_) => "consult_then_escalate",
            Self::AskForGuidance { .. } => "ask_for_guidance",
        }
    }
}

/// Concrete next action offered with an escalation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Search an external source
    ExternalSearch { query: String },
    /// Read a specific file or document directly
    ReadReference { reference: String },
    /// Ask the requester a direct clarification question
    AskClarification { question: String },
    /// Proceed on general knowledge, flagging the result as uncertain
    ProceedFlaggedUncertain,
}

/// Structured request surfaced to a human or coordinator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub task_id: TaskId,
    pub step_id: StepId,
    pub missing_information: String,
    /// Never empty
    pub suggestions: Vec<SuggestedAction>,
}

impl EscalationRequest {
    /// The first suggestion is mandatory so a request always offers a way forward
    pub fn new(
        task_id: TaskId,
        step_id: StepId,
        missing_information: impl Into<String>,
        first: SuggestedAction,
    ) -> Self {
        Self {
            task_id,
            step_id,
            missing_information: missing_information.into(),
            suggestions: vec![first],
        }
    }

    pub fn with_suggestion(mut self, suggestion: SuggestedAction) -> Self {
        self.suggestions.push(suggestion);
        self
    }
}

/// Why a step parked its task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuspendReason {
    AwaitingGuidance { question: String },
    Escalated(EscalationRequest),
}

impl std::fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingGuidance { question } => write!(f, "awaiting guidance: {}", question),
            Self::Escalated(request) => write!(
                f,
                "escalated: {} ({} suggested action(s))",
                request.missing_information,
                request.suggestions.len()
            ),
        }
    }
}
