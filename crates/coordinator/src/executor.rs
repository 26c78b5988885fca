//! Stage execution.
//!
//! The executor runs exactly one stage against the workflow state, applies
//! the retry policy around every capability call and reports a
//! [`StageOutcome`]. It never decides what runs next.

use crate::retry::{invoke_with_retry, RetryPolicy};
use crate::routing::StageOutcome;
use scanue_common::{
    AgentOutput, AgentSet, CapabilityError, IntegratedResult, SpecialistResult, Stage,
    WorkflowState,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Reason recorded for specialists skipped because delegation produced no subtasks.
pub const NOT_DISPATCHED: &str = "not dispatched";

pub struct StageExecutor {
    agents: AgentSet,
    retry: RetryPolicy,
    specialist_ids: Vec<String>,
}

impl StageExecutor {
    pub fn new(agents: AgentSet, retry: RetryPolicy) -> Self {
        let specialist_ids = agents.specialist_ids();
        Self {
            agents,
            retry,
            specialist_ids,
        }
    }

    /// Configured specialist ids, in dispatch order.
    pub fn specialist_ids(&self) -> &[String] {
        &self.specialist_ids
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn execute(
        &self,
        stage: Stage,
        mut state: WorkflowState,
    ) -> (WorkflowState, StageOutcome) {
        let started = Instant::now();
        let outcome = match stage {
            Stage::Delegation => self.delegate(&mut state).await,
            Stage::SpecialistFanout => self.fan_out(&mut state).await,
            Stage::Integration => self.integrate(&mut state).await,
            Stage::HumanCheckpoint => StageOutcome::AwaitingHuman,
            Stage::Done | Stage::Failed => StageOutcome::Failed(CapabilityError::permanent(
                format!("stage {stage} is terminal and cannot be executed"),
            )),
        };

        debug!(
            run_id = %state.run_id,
            stage = %stage,
            duration_ms = started.elapsed().as_millis() as u64,
            outcome = ?outcome,
            "Stage executed"
        );
        state.touch();
        (state, outcome)
    }

    async fn delegate(&self, state: &mut WorkflowState) -> StageOutcome {
        let delegator = &self.agents.delegator;
        let snapshot: &WorkflowState = state;
        let result = invoke_with_retry(&self.retry, delegator.id(), || delegator.process(snapshot)).await;

        match result {
            Ok(AgentOutput::Subtasks { subtasks }) => {
                let subtask_count = subtasks.len();
                state.subtasks = subtasks;
                info!(
                    run_id = %state.run_id,
                    iteration = state.iteration,
                    subtask_count,
                    "Delegation complete"
                );
                StageOutcome::Delegated { subtask_count }
            }
            Ok(other) => StageOutcome::Failed(unexpected_output(delegator.id(), &other)),
            Err(e) => StageOutcome::Failed(e),
        }
    }

    async fn fan_out(&self, state: &mut WorkflowState) -> StageOutcome {
        let snapshot = Arc::new(state.clone());
        let iteration = state.iteration;

        info!(
            run_id = %state.run_id,
            iteration,
            specialists = self.agents.specialists.len(),
            "Dispatching specialists"
        );

        let mut handles = Vec::with_capacity(self.agents.specialists.len());
        for agent in &self.agents.specialists {
            let agent = agent.clone();
            let snapshot = snapshot.clone();
            let retry = self.retry.clone();
            let id = agent.id().to_string();

            let handle = tokio::spawn(async move {
                invoke_with_retry(&retry, agent.id(), || agent.process(&snapshot)).await
            });
            handles.push((id, handle));
        }

        // Every handle is awaited: the barrier holds even when a task panics.
        for (id, handle) in handles {
            let result = match handle.await {
                Ok(Ok(AgentOutput::Analysis { content })) => {
                    SpecialistResult::Available { content, iteration }
                }
                Ok(Ok(other)) => SpecialistResult::Unavailable {
                    reason: unexpected_output(&id, &other).to_string(),
                    iteration,
                },
                Ok(Err(e)) => {
                    warn!(
                        run_id = %state.run_id,
                        specialist = %id,
                        error = %e,
                        "Specialist unavailable, using placeholder"
                    );
                    SpecialistResult::Unavailable {
                        reason: e.to_string(),
                        iteration,
                    }
                }
                Err(join_error) => {
                    error!(
                        run_id = %state.run_id,
                        specialist = %id,
                        error = %join_error,
                        "Specialist task aborted"
                    );
                    SpecialistResult::Unavailable {
                        reason: format!("specialist task aborted: {join_error}"),
                        iteration,
                    }
                }
            };
            state.record_specialist_result(id, result);
        }

        let (available, unavailable) = state
            .current_results()
            .fold((0, 0), |(a, u), (_, r)| if r.is_available() { (a + 1, u) } else { (a, u + 1) });

        info!(
            run_id = %state.run_id,
            iteration,
            available,
            unavailable,
            "Specialist fan-in complete"
        );
        StageOutcome::FanoutComplete {
            available,
            unavailable,
        }
    }

    async fn integrate(&self, state: &mut WorkflowState) -> StageOutcome {
        for id in state.missing_specialists(&self.specialist_ids) {
            debug!(run_id = %state.run_id, specialist = %id, "Recording placeholder for undispatched specialist");
            let placeholder = SpecialistResult::Unavailable {
                reason: NOT_DISPATCHED.to_string(),
                iteration: state.iteration,
            };
            state.record_specialist_result(id, placeholder);
        }

        if !state.fanin_complete(&self.specialist_ids) {
            return StageOutcome::Failed(CapabilityError::permanent(
                "integration started before every specialist reported",
            ));
        }

        let integrator = &self.agents.integrator;
        let snapshot: &WorkflowState = state;
        let result =
            invoke_with_retry(&self.retry, integrator.id(), || integrator.process(snapshot)).await;

        match result {
            Ok(AgentOutput::Integration(output)) => {
                let unavailable_specialists: Vec<String> = self
                    .specialist_ids
                    .iter()
                    .filter(|id| {
                        state
                            .current_result(id)
                            .is_some_and(|r| !r.is_available())
                    })
                    .cloned()
                    .collect();

                let confidence = output.confidence.clamp(0.0, 1.0);
                let conflict_detected = output.conflict_detected;
                info!(
                    run_id = %state.run_id,
                    iteration = state.iteration,
                    confidence,
                    conflict_detected,
                    degraded = !unavailable_specialists.is_empty(),
                    "Integration complete"
                );

                state.integrated_result = Some(IntegratedResult {
                    content: output.content,
                    confidence,
                    conflict_detected,
                    unavailable_specialists,
                    iteration: state.iteration,
                });
                StageOutcome::Integrated {
                    confidence,
                    conflict_detected,
                }
            }
            Ok(other) => StageOutcome::Failed(unexpected_output(integrator.id(), &other)),
            Err(e) => StageOutcome::Failed(e),
        }
    }
}

fn unexpected_output(agent: &str, output: &AgentOutput) -> CapabilityError {
    let kind = match output {
        AgentOutput::Subtasks { .. } => "subtasks",
        AgentOutput::Analysis { .. } => "analysis",
        AgentOutput::Integration(_) => "integration",
    };
    CapabilityError::permanent(format!("{agent} returned unexpected {kind} output"))
}
