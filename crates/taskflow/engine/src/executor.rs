//! Step executor: runs exactly one step of one task
//!
//! One invocation:
//! 1. checks the step's dependencies have succeeded for this task
//! 2. consults the decision gate when the step is gated (guidance
//!    delivered by a resume signal replaces the gate for that attempt)
//! 3. binds the step's inputs from task metadata and earlier outputs
//! 4. invokes the delegate for the step's role and checks its outputs
//! 5. appends exactly one history entry
//! 6. routes the task: advance on success, `error_step` or `Failed` on
//!    failure, `Blocked` on suspension
//!
//! Failures are never retried here. They are routed.

use crate::decision_gate::DecisionGate;
use crate::delegate::DelegateRegistry;
use crate::task_store::TaskStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use taskflow_types::{
    Decision, DelegationContext, DelegationRequest, EntryOutcome, FailureContext, FailureKind,
    HistoryEntry, StepDefinition, StepOutcome, StoreError, TaskContext, TaskId, TaskStatus,
    WorkflowError, WorkflowResult, ENGINE_ACTOR,
};

/// Input name under which delivered guidance is bound when the step does
/// not bind that name itself
pub const GUIDANCE_INPUT: &str = "guidance";

/// Runs single steps against the task store
#[derive(Clone)]
pub struct StepExecutor {
    store: Arc<dyn TaskStore>,
    delegates: DelegateRegistry,
    gate: DecisionGate,
}

impl StepExecutor {
    pub fn new(store: Arc<dyn TaskStore>, delegates: DelegateRegistry, gate: DecisionGate) -> Self {
        Self {
            store,
            delegates,
            gate,
        }
    }

    pub fn with_gate(mut self, gate: DecisionGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn delegates(&self) -> &DelegateRegistry {
        &self.delegates
    }

    /// Run `step` for the task. The task must be `InProgress`.
    pub async fn run(&self, task_id: &TaskId, step: &StepDefinition) -> WorkflowResult<StepOutcome> {
        let record = self.store.get(task_id).await?;
        if record.status != TaskStatus::InProgress {
            return Err(WorkflowError::UnexpectedStatus {
                task_id: task_id.clone(),
                status: record.status,
                expected: TaskStatus::InProgress,
            });
        }
        let ctx = TaskContext::for_step(&record, &step.step_id);

        let (outcome, actor) = self.execute(&ctx, step).await;

        let entry = match &outcome {
            StepOutcome::Success(outputs) => {
                HistoryEntry::new(Some(step.step_id.clone()), EntryOutcome::Success, actor)
                    .with_outputs(outputs.clone())
            }
            StepOutcome::Failure(failure) => {
                HistoryEntry::new(Some(step.step_id.clone()), EntryOutcome::Failure, actor)
                    .with_detail(failure.describe())
            }
            StepOutcome::Suspended(reason) => {
                HistoryEntry::new(Some(step.step_id.clone()), EntryOutcome::Suspended, actor)
                    .with_detail(reason.to_string())
            }
        };
        self.store.append_history(task_id, entry).await?;

        self.route(task_id, step, &outcome).await?;
        Ok(outcome)
    }

    /// Produce the outcome and the actor it is attributed to
    async fn execute(&self, ctx: &TaskContext, step: &StepDefinition) -> (StepOutcome, String) {
        let missing: Vec<_> = step
            .depends_on
            .iter()
            .filter(|dependency| !ctx.step_succeeded(dependency))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let failure = FailureContext::new(FailureKind::UnmetDependency { missing });
            return (StepOutcome::Failure(failure), ENGINE_ACTOR.to_string());
        }

        let mut knowledge = None;
        if step.requires_gate() && !ctx.has_guidance() {
            match self.gate.evaluate(ctx, step).await {
                Decision::Skip => {}
                Decision::ConsultThenProceed { knowledge: content } => knowledge = Some(content),
                decision => {
                    if let Some(reason) = decision.suspend_reason() {
                        tracing::info!(
                            task_id = %ctx.task_id,
                            step_id = %step.step_id,
                            reason = %reason,
                            "Step suspended"
                        );
                        return (StepOutcome::Suspended(reason), ENGINE_ACTOR.to_string());
                    }
                }
            }
        }

        let inputs = match bind_inputs(ctx, step) {
            Ok(inputs) => inputs,
            Err(failure) => return (StepOutcome::Failure(failure), ENGINE_ACTOR.to_string()),
        };

        let role = step.delegate_to.clone();
        let actor = role.to_string();
        let Some(delegate) = self.delegates.get(&role) else {
            let failure = FailureContext::new(FailureKind::DelegateFailure)
                .with_detail(format!("no delegate registered for role '{}'", role));
            return (StepOutcome::Failure(failure), actor);
        };

        let request = DelegationRequest {
            task_id: ctx.task_id.clone(),
            step_id: step.step_id.clone(),
            role,
            inputs,
            context: DelegationContext {
                knowledge,
                guidance: ctx.guidance.clone(),
                related_docs: ctx.related_docs.iter().cloned().collect(),
                attempt: ctx.attempt,
            },
        };

        let outcome = match delegate.invoke(request).await {
            Ok(response) if response.is_success() => {
                let missing: Vec<String> = step
                    .outputs
                    .iter()
                    .filter(|o| !response.outputs.contains_key(&o.name))
                    .map(|o| o.name.clone())
                    .collect();
                if missing.is_empty() {
                    StepOutcome::Success(response.outputs)
                } else {
                    StepOutcome::Failure(FailureContext::new(FailureKind::OutputContract {
                        missing,
                    }))
                }
            }
            Ok(response) => {
                let detail = response
                    .error_detail
                    .unwrap_or_else(|| "no detail given".to_string());
                StepOutcome::Failure(
                    FailureContext::new(FailureKind::DelegateFailure).with_detail(detail),
                )
            }
            Err(e) => StepOutcome::Failure(
                FailureContext::new(FailureKind::DelegateFailure).with_detail(e.to_string()),
            ),
        };

        if let StepOutcome::Failure(failure) = &outcome {
            tracing::warn!(
                task_id = %ctx.task_id,
                step_id = %step.step_id,
                role = %actor,
                failure = %failure,
                "Step failed"
            );
        }
        (outcome, actor)
    }

    /// Apply the routing for an outcome. A task whose status changed
    /// underneath the step (cancellation) keeps that status.
    async fn route(
        &self,
        task_id: &TaskId,
        step: &StepDefinition,
        outcome: &StepOutcome,
    ) -> WorkflowResult<()> {
        let result = match outcome {
            StepOutcome::Success(_) => match &step.next_step {
                Some(next) => {
                    tracing::debug!(task_id = %task_id, from = %step.step_id, to = %next, "Advancing");
                    self.store.advance(task_id, next.clone()).await
                }
                None => self.store.set_status(task_id, TaskStatus::Done).await.map(|_| ()),
            },
            StepOutcome::Failure(_) => match &step.error_step {
                Some(error_step) => {
                    tracing::debug!(
                        task_id = %task_id,
                        from = %step.step_id,
                        to = %error_step,
                        "Routing failure to error step"
                    );
                    self.store.advance(task_id, error_step.clone()).await
                }
                None => self.store.set_status(task_id, TaskStatus::Failed).await.map(|_| ()),
            },
            StepOutcome::Suspended(_) => {
                self.store.set_status(task_id, TaskStatus::Blocked).await.map(|_| ())
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(e @ (StoreError::InvalidTransition { .. } | StoreError::Conflict(_))) => {
                tracing::warn!(
                    task_id = %task_id,
                    step_id = %step.step_id,
                    outcome = outcome.label(),
                    error = %e,
                    "Task changed status during step; routing skipped"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("delegates", &self.delegates)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

/// Bind declared inputs; later sources win (metadata, then step outputs)
fn bind_inputs(
    ctx: &TaskContext,
    step: &StepDefinition,
) -> Result<BTreeMap<String, String>, FailureContext> {
    let mut inputs = BTreeMap::new();
    for spec in &step.inputs {
        match ctx.value(&spec.name) {
            Some(value) => {
                inputs.insert(spec.name.clone(), value.to_string());
            }
            None if spec.required => {
                return Err(FailureContext::new(FailureKind::MissingInput {
                    name: spec.name.clone(),
                }));
            }
            None => {}
        }
    }
    if let Some(guidance) = &ctx.guidance {
        inputs
            .entry(GUIDANCE_INPUT.to_string())
            .or_insert_with(|| guidance.clone());
    }
    Ok(inputs)
}
