//! Decision gate: whether a step needs knowledge before it is delegated
//!
//! Policy, in order:
//! 1. An ambiguous assessment is never guessed at: `AskForGuidance`.
//! 2. Simple, routine and low-risk work skips consultation: `Skip`.
//! 3. Anything else consults the knowledge source. Sufficient knowledge
//!    gives `ConsultThenProceed`, otherwise `ConsultThenEscalate` with a
//!    structured request and concrete suggested actions.
//!
//! The gate decides; it never suspends or resumes tasks itself.

use crate::config::GateConfig;
use crate::knowledge::KnowledgeSource;
use std::sync::Arc;
use taskflow_types::{
    Assessment, Complexity, Decision, DecisionContext, EscalationRequest, KnowledgeQuery,
    StepDefinition, SuggestedAction, TaskContext,
};

/// Metadata key holding the complexity estimate
pub const COMPLEXITY_KEY: &str = "complexity";
/// Metadata key holding the confidence of the estimate
pub const CONFIDENCE_KEY: &str = "confidence";

// ── Assessment ───────────────────────────────────────────────────────

/// Estimates how complex a task is
pub trait ComplexityAssessor: Send + Sync {
    fn assess(&self, ctx: &TaskContext) -> Assessment;
}

/// Reads `complexity` and `confidence` from task metadata.
///
/// A missing or unrecognised complexity is ambiguous. A missing
/// confidence means the estimate is taken as certain; an unparseable or
/// non-finite one means it is not trusted at all.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetadataAssessor;

impl ComplexityAssessor for MetadataAssessor {
    fn assess(&self, ctx: &TaskContext) -> Assessment {
        let estimate = match ctx
            .metadata_value(COMPLEXITY_KEY)
            .and_then(|raw| raw.parse::<Complexity>().ok())
        {
            Some(estimate) => estimate,
            None => return Assessment::unknown(),
        };
        let confidence = match ctx.metadata_value(CONFIDENCE_KEY) {
            None => 1.0,
            Some(raw) => raw
                .trim()
                .parse::<f32>()
                .ok()
                .filter(|c| c.is_finite())
                .unwrap_or(0.0),
        };
        Assessment::new(estimate, confidence)
    }
}

// ── Gate ─────────────────────────────────────────────────────────────

/// Evaluates the consultation policy for gated steps
#[derive(Clone)]
pub struct DecisionGate {
    knowledge: Arc<dyn KnowledgeSource>,
    assessor: Arc<dyn ComplexityAssessor>,
    config: GateConfig,
}

impl DecisionGate {
    pub fn new(
        knowledge: Arc<dyn KnowledgeSource>,
        assessor: Arc<dyn ComplexityAssessor>,
        config: GateConfig,
    ) -> Self {
        Self {
            knowledge,
            assessor,
            config,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Decide how `step` proceeds for the task described by `ctx`
    pub async fn evaluate(&self, ctx: &TaskContext, step: &StepDefinition) -> Decision {
        let assessment = self.assessor.assess(ctx);
        let mut decision_ctx = DecisionContext::from_assessment(&assessment);

        let decision = if assessment.is_ambiguous(self.config.confidence_threshold) {
            Decision::AskForGuidance {
                question: guidance_question(ctx, step, &assessment),
            }
        } else if assessment.estimate.is_some_and(|c| c.is_lightweight()) {
            Decision::Skip
        } else {
            let keywords = step.lookup_keywords();
            decision_ctx.kb_consulted = true;
            let content = self.consult(ctx, &keywords).await;
            match content {
                Some(knowledge) => {
                    decision_ctx.kb_sufficient = true;
                    Decision::ConsultThenProceed { knowledge }
                }
                None => Decision::ConsultThenEscalate(escalation(ctx, step, &keywords)),
            }
        };

        tracing::debug!(
            task_id = %ctx.task_id,
            step_id = %ctx.step_id,
            estimate = ?decision_ctx.task_complexity_estimate,
            confidence = decision_ctx.confidence,
            kb_consulted = decision_ctx.kb_consulted,
            kb_sufficient = decision_ctx.kb_sufficient,
            decision = decision.label(),
            "Decision gate evaluated"
        );
        decision
    }

    /// Sufficient knowledge content, if any
    async fn consult(&self, ctx: &TaskContext, keywords: &[String]) -> Option<String> {
        let query = KnowledgeQuery {
            keywords: keywords.to_vec(),
        };
        match self.knowledge.lookup(query).await {
            Ok(result) if result.found => result
                .content
                .filter(|c| c.trim().chars().count() >= self.config.min_knowledge_chars),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(
                    task_id = %ctx.task_id,
                    step_id = %ctx.step_id,
                    error = %e,
                    "Knowledge lookup failed; treating as not found"
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for DecisionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionGate")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn step_label(step: &StepDefinition) -> &str {
    if step.title.trim().is_empty() {
        step.step_id.as_str()
    } else {
        step.title.as_str()
    }
}

fn guidance_question(ctx: &TaskContext, step: &StepDefinition, assessment: &Assessment) -> String {
    match assessment.estimate {
        None => format!(
            "Task {} has no usable complexity assessment for step '{}'. \
             Is this routine work, or does it need reference material first?",
            ctx.task_id,
            step_label(step)
        ),
        Some(estimate) => format!(
            "Task {} was assessed as {} with confidence {:.2} for step '{}'. \
             How should it proceed?",
            ctx.task_id,
            estimate,
            assessment.confidence,
            step_label(step)
        ),
    }
}

fn escalation(ctx: &TaskContext, step: &StepDefinition, keywords: &[String]) -> EscalationRequest {
    let topic = keywords.join(" ");
    let mut request = EscalationRequest::new(
        ctx.task_id.clone(),
        ctx.step_id.clone(),
        format!(
            "No sufficient knowledge found for step '{}' (keywords: {})",
            step_label(step),
            keywords.join(", ")
        ),
        SuggestedAction::ExternalSearch {
            query: topic.clone(),
        },
    );
    if let Some(reference) = ctx.related_docs.iter().next() {
        request = request.with_suggestion(SuggestedAction::ReadReference {
            reference: reference.clone(),
        });
    }
    request
        .with_suggestion(SuggestedAction::AskClarification {
            question: format!(
                "What should '{}' rely on regarding {}?",
                step_label(step),
                topic
            ),
        })
        .with_suggestion(SuggestedAction::ProceedFlaggedUncertain)
}
