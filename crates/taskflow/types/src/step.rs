//! Step definitions: the immutable nodes of a workflow graph
//!
//! A StepDefinition names its prerequisites, where to go on success
//! (`next_step`), where to go on failure (`error_step`), the role that
//! performs the work, and the typed input/output contract of that work.
//!
//! In the persisted layout an empty string means "no successor", so
//! `next_step = ""` marks a terminal step and `error_step = ""` means the
//! step has no recovery path.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique, stable identifier for a step within a workflow
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StepId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of the role a step is delegated to
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleId(pub String);

impl RoleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── I/O Contract ─────────────────────────────────────────────────────

/// A named data requirement of a step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    /// Name the value is bound under in the delegation request
    pub name: String,
    /// Free-text constraint passed through to the delegate
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub constraint: String,
    /// Whether a missing value fails the step before delegation
    #[serde(default = "default_true")]
    pub required: bool,
}

impl InputSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: String::new(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: String::new(),
            required: false,
        }
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = constraint.into();
        self
    }
}

/// A named result a step promises to produce
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl OutputSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Marks a step as requiring a knowledge-consultation decision before
/// its delegate is invoked
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSpec {
    /// Keywords used for the knowledge lookup
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl GateSpec {
    pub fn with_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }
}

fn default_true() -> bool {
    true
}

// ── Step Definition ──────────────────────────────────────────────────

/// An immutable step specification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique identifier within the workflow
    pub step_id: StepId,
    /// Short human-readable title
    #[serde(default)]
    pub title: String,
    /// What the step accomplishes
    #[serde(default)]
    pub description: String,
    /// Steps that must have succeeded for this task before this one runs
    #[serde(default)]
    pub depends_on: Vec<StepId>,
    /// Successor on success; `None` makes the step terminal
    #[serde(default, with = "optional_step")]
    pub next_step: Option<StepId>,
    /// Successor on failure; `None` means failure ends the task
    #[serde(default, with = "optional_step")]
    pub error_step: Option<StepId>,
    /// Role that performs the step
    pub delegate_to: RoleId,
    /// Ordered data requirements
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    /// Ordered named results
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    /// Knowledge-consultation gate, if the step needs one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateSpec>,
}

impl StepDefinition {
    /// Create a terminal step delegated to `role`
    pub fn new(step_id: impl Into<StepId>, role: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            title: String::new(),
            description: String::new(),
            depends_on: Vec::new(),
            next_step: None,
            error_step: None,
            delegate_to: RoleId::new(role),
            inputs: Vec::new(),
            outputs: Vec::new(),
            gate: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn depends_on(mut self, step: impl Into<StepId>) -> Self {
        self.depends_on.push(step.into());
        self
    }

    pub fn with_next(mut self, step: impl Into<StepId>) -> Self {
        self.next_step = Some(step.into());
        self
    }

    pub fn with_error(mut self, step: impl Into<StepId>) -> Self {
        self.error_step = Some(step.into());
        self
    }

    pub fn with_input(mut self, input: InputSpec) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, output: OutputSpec) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_gate(mut self, gate: GateSpec) -> Self {
        self.gate = Some(gate);
        self
    }

    /// A step with no `next_step` completes the task on success
    pub fn is_terminal(&self) -> bool {
        self.next_step.is_none()
    }

    pub fn requires_gate(&self) -> bool {
        self.gate.is_some()
    }

    /// Keywords for the knowledge lookup, falling back to the title and
    /// then the step id when the gate declares none
    pub fn lookup_keywords(&self) -> Vec<String> {
        match &self.gate {
            Some(gate) if !gate.keywords.is_empty() => gate.keywords.clone(),
            _ if !self.title.trim().is_empty() => vec![self.title.clone()],
            _ => vec![self.step_id.0.clone()],
        }
    }
}

/// Serializes `Option<StepId>` as a plain string, `""` standing for `None`
pub(crate) mod optional_step {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<StepId>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(id) => s.serialize_str(id.as_str()),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<StepId>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.filter(|s| !s.trim().is_empty()).map(StepId))
    }
}
