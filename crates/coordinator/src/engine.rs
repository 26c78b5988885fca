//! The workflow engine.
//!
//! Drives one run at a time per run id through
//! execute stage → route → persist, suspending at human checkpoints and
//! resuming when a response (or the deadline) arrives.

use crate::config::CoordinatorConfig;
use crate::executor::StageExecutor;
use crate::gate::{CheckpointPolicy, GateState, HumanCheckpointGate, Resolution};
use crate::retry::RetryPolicy;
use crate::routing::{ReviewPolicy, Router, StageOutcome};
use crate::store::{decode_snapshot, encode_snapshot, CheckpointStore};
use scanue_common::{
    now_millis, AgentSet, CapabilityError, CheckpointRequest, HumanResponse, IntegratedResult,
    Result, RunFailure, RunStatus, ScanueError, Stage, WorkflowState,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Where a call into the engine left the run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        run_id: String,
        result: IntegratedResult,
    },
    /// Waiting at a human checkpoint
    Suspended {
        run_id: String,
        checkpoint: CheckpointRequest,
    },
    Failed {
        run_id: String,
        failure: RunFailure,
    },
}

impl RunOutcome {
    pub fn run_id(&self) -> &str {
        match self {
            Self::Completed { run_id, .. }
            | Self::Suspended { run_id, .. }
            | Self::Failed { run_id, .. } => run_id,
        }
    }

    fn from_state(state: &WorkflowState) -> Result<Self> {
        let run_id = state.run_id.clone();
        match (state.status, &state.integrated_result, &state.pending_checkpoint, &state.failure) {
            (RunStatus::Completed, Some(result), _, _) => Ok(Self::Completed {
                run_id,
                result: result.clone(),
            }),
            (RunStatus::AwaitingHuman, _, Some(checkpoint), _) => Ok(Self::Suspended {
                run_id,
                checkpoint: checkpoint.clone(),
            }),
            (RunStatus::Failed, _, _, Some(failure)) => Ok(Self::Failed {
                run_id,
                failure: failure.clone(),
            }),
            _ => Err(ScanueError::Store(format!(
                "run {run_id} is in an inconsistent state ({:?} at {})",
                state.status, state.current_stage
            ))),
        }
    }
}

/// What the submission interface reports about a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub stage: Stage,
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<IntegratedResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_checkpoint: Option<CheckpointRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub feedback_count: usize,
}

impl From<&WorkflowState> for RunReport {
    fn from(state: &WorkflowState) -> Self {
        Self {
            run_id: state.run_id.clone(),
            status: state.status,
            stage: state.current_stage,
            iteration: state.iteration,
            // Only a finished run has a final answer.
            result: if state.status == RunStatus::Completed {
                state.integrated_result.clone()
            } else {
                None
            },
            pending_checkpoint: state.pending_checkpoint.clone(),
            failure: state.failure.clone(),
            feedback_count: state.feedback_history.len(),
        }
    }
}

/// Runs found in the store by [`WorkflowEngine::recover`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Suspended at a checkpoint, now tracked for expiry
    pub awaiting: Vec<String>,
    /// Stopped mid-run; continue them with [`WorkflowEngine::continue_run`]
    pub interrupted: Vec<String>,
}

type RunLocks = parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// Exclusive hold on one run id. The lock entry is forgotten on drop once
/// nobody else holds or waits for it.
struct RunGuard<'a> {
    locks: &'a RunLocks,
    run_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock();
        if locks
            .get(&self.run_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.run_id);
        }
    }
}

/// Cheap to clone; clones share runs, locks and the store.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    executor: StageExecutor,
    router: Router,
    gate: HumanCheckpointGate,
    store: Arc<dyn CheckpointStore>,
    run_locks: RunLocks,
    awaiting: Mutex<HashSet<String>>,
}

impl WorkflowEngine {
    /// Engine with default retry, review and checkpoint policies.
    pub fn new(agents: AgentSet, store: Arc<dyn CheckpointStore>) -> Self {
        Self::with_policies(
            agents,
            store,
            RetryPolicy::default(),
            ReviewPolicy::default(),
            CheckpointPolicy::default(),
        )
    }

    pub fn with_policies(
        agents: AgentSet,
        store: Arc<dyn CheckpointStore>,
        retry: RetryPolicy,
        review: ReviewPolicy,
        checkpoint: CheckpointPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                executor: StageExecutor::new(agents, retry),
                router: Router::new(review),
                gate: HumanCheckpointGate::new(checkpoint),
                store,
                run_locks: RunLocks::default(),
                awaiting: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn from_config(
        config: &CoordinatorConfig,
        agents: AgentSet,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self::with_policies(
            agents,
            store,
            config.retry.clone(),
            config.review.clone(),
            config.checkpoint.clone(),
        )
    }

    pub fn specialist_ids(&self) -> &[String] {
        self.inner.executor.specialist_ids()
    }

    /// Start a new run and drive it until it completes, fails or suspends.
    pub async fn run(&self, task: impl Into<String>) -> Result<RunOutcome> {
        let state = WorkflowState::new(task);
        info!(run_id = %state.run_id, "Starting run");

        let run_id = state.run_id.clone();
        self.spawn_run(&run_id, move |engine, _| async move {
            engine.persist(&state).await?;
            let state = engine.drive(state).await?;
            RunOutcome::from_state(&state)
        })
        .await
    }

    /// Apply a human response to a suspended run and continue it.
    ///
    /// Fails with `NotFound` for unknown runs and for runs that are not
    /// awaiting a response, so a second resume of the same checkpoint is
    /// rejected. `InvalidResponse` leaves the checkpoint open.
    pub async fn resume(&self, run_id: &str, response: HumanResponse) -> Result<RunOutcome> {
        self.spawn_run(run_id, move |engine, run_id| async move {
            let state = engine.resume_locked(&run_id, &response).await?;
            RunOutcome::from_state(&state)
        })
        .await
    }

    /// `submit(task) -> {run_id, status}`
    pub async fn submit(&self, task: impl Into<String>) -> Result<RunReport> {
        let outcome = self.run(task).await?;
        self.get_status(outcome.run_id()).await
    }

    /// `provide_feedback(run_id, response) -> {status, result?}`
    pub async fn provide_feedback(
        &self,
        run_id: &str,
        response: HumanResponse,
    ) -> Result<RunReport> {
        self.spawn_run(run_id, move |engine, run_id| async move {
            let state = engine.resume_locked(&run_id, &response).await?;
            Ok(RunReport::from(&state))
        })
        .await
    }

    /// Current status of a run. An overdue checkpoint is expired first.
    pub async fn get_status(&self, run_id: &str) -> Result<RunReport> {
        self.spawn_run(run_id, |engine, run_id| async move {
            let state = engine.load(&run_id).await?;
            let state = engine.expire_locked(state).await?;
            Ok(RunReport::from(&state))
        })
        .await
    }

    /// Continue a run that stopped mid-flight, e.g. after a crash.
    ///
    /// Only runs persisted with `status = running` qualify; anything else is
    /// `NotFound`.
    pub async fn continue_run(&self, run_id: &str) -> Result<RunOutcome> {
        self.spawn_run(run_id, |engine, run_id| async move {
            let state = engine.load(&run_id).await?;
            if state.status != RunStatus::Running {
                return Err(ScanueError::NotFound(run_id));
            }
            info!(run_id = %run_id, stage = %state.current_stage, "Continuing interrupted run");
            let state = engine.drive(state).await?;
            RunOutcome::from_state(&state)
        })
        .await
    }

    /// Rebuild the suspended-run index from the store after a restart.
    pub async fn recover(&self) -> Result<Recovery> {
        let engine = &self.inner;
        let mut recovery = Recovery::default();
        for run_id in engine.store.run_ids().await? {
            let state = match engine.load(&run_id).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "Skipping unreadable snapshot");
                    continue;
                }
            };
            match (state.status, GateState::of(&state)) {
                (RunStatus::AwaitingHuman, GateState::Pending(_)) => recovery.awaiting.push(run_id),
                (RunStatus::AwaitingHuman, gate) => {
                    warn!(run_id = %run_id, gate = ?gate, "Awaiting run has no open checkpoint");
                }
                (RunStatus::Running, _) => recovery.interrupted.push(run_id),
                (RunStatus::Completed | RunStatus::Failed, _) => {}
            }
        }

        engine
            .awaiting
            .lock()
            .await
            .extend(recovery.awaiting.iter().cloned());

        info!(
            awaiting = recovery.awaiting.len(),
            interrupted = recovery.interrupted.len(),
            "Recovered runs from checkpoint store"
        );
        Ok(recovery)
    }

    /// Ids of runs currently suspended at a checkpoint.
    pub async fn awaiting_runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.awaiting.lock().await.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Apply the default response to every overdue checkpoint.
    ///
    /// Returns how many checkpoints were expired.
    pub async fn expire_due_checkpoints(&self) -> Result<usize> {
        let mut expired = 0;
        for run_id in self.awaiting_runs().await {
            let result = self
                .spawn_run(&run_id, |engine, run_id| async move {
                    let state = engine.load(&run_id).await?;
                    let before = state.feedback_history.len();
                    let state = engine.expire_locked(state).await?;
                    Ok(state.feedback_history.len() > before)
                })
                .await;

            match result {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(ScanueError::NotFound(_)) => {
                    self.inner.awaiting.lock().await.remove(&run_id);
                }
                Err(e) => warn!(run_id = %run_id, error = %e, "Checkpoint expiry failed"),
            }
        }
        Ok(expired)
    }

    /// Periodically expire overdue checkpoints.
    pub fn spawn_expiry_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        // tokio intervals must be non-zero
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match engine.expire_due_checkpoints().await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "Expired overdue checkpoints"),
                    Err(e) => warn!(error = %e, "Checkpoint sweep failed"),
                }
            }
        })
    }

    /// Run `op` under the run's lock on a task of its own. A caller that
    /// stops waiting does not stop the run, and the lock is released when
    /// the task ends.
    async fn spawn_run<T, F, Fut>(&self, run_id: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<EngineInner>, String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let run_id = run_id.to_string();
        let task = tokio::spawn(async move {
            let _guard = inner.lock_run(&run_id).await;
            op(Arc::clone(&inner), run_id.clone()).await
        });
        task.await
            .map_err(|e| ScanueError::Store(format!("run task ended abnormally: {e}")))?
    }
}

impl EngineInner {
    async fn resume_locked(&self, run_id: &str, response: &HumanResponse) -> Result<WorkflowState> {
        let mut state = self.load(run_id).await?;
        let GateState::Pending(_) = GateState::of(&state) else {
            debug!(run_id, status = ?state.status, "Resume rejected, no open checkpoint");
            return Err(ScanueError::NotFound(run_id.to_string()));
        };

        let resolution = self.gate.resolve(&mut state, response, now_millis())?;
        self.continue_after_checkpoint(state, resolution).await
    }

    /// Expire the checkpoint if it is overdue, then continue the run.
    async fn expire_locked(&self, mut state: WorkflowState) -> Result<WorkflowState> {
        match self.gate.expire_if_due(&mut state, now_millis()) {
            Some(resolution) => self.continue_after_checkpoint(state, resolution).await,
            None => Ok(state),
        }
    }

    async fn continue_after_checkpoint(
        &self,
        mut state: WorkflowState,
        resolution: Resolution,
    ) -> Result<WorkflowState> {
        self.awaiting.lock().await.remove(&state.run_id);

        let outcome = StageOutcome::HumanResolved(resolution.decision);
        let next = self.router.next_stage(&state, &outcome);
        self.transition(&mut state, Stage::HumanCheckpoint, next, outcome)
            .await;
        self.persist(&state).await?;
        self.drive(state).await
    }

    /// The stage loop: execute → route → persist, while the run is running.
    async fn drive(&self, mut state: WorkflowState) -> Result<WorkflowState> {
        while state.status == RunStatus::Running {
            let stage = state.current_stage;
            let (next_state, outcome) = self.executor.execute(stage, state).await;
            state = next_state;

            let next = self.router.next_stage(&state, &outcome);
            debug!(
                run_id = %state.run_id,
                from = %stage,
                to = %next,
                "Routing"
            );
            self.transition(&mut state, stage, next, outcome).await;
            self.persist(&state).await?;
        }
        Ok(state)
    }

    async fn transition(
        &self,
        state: &mut WorkflowState,
        from: Stage,
        next: Stage,
        outcome: StageOutcome,
    ) {
        match next {
            Stage::HumanCheckpoint => {
                if state.pending_checkpoint.is_none() {
                    self.gate.open(state, now_millis());
                }
                self.awaiting.lock().await.insert(state.run_id.clone());
            }
            Stage::Done => {
                state.current_stage = Stage::Done;
                state.status = RunStatus::Completed;
                info!(
                    run_id = %state.run_id,
                    iteration = state.iteration,
                    feedback = state.feedback_history.len(),
                    "Run completed"
                );
            }
            Stage::Failed => {
                let error = match outcome {
                    StageOutcome::Failed(error) => error,
                    other => CapabilityError::permanent(format!(
                        "no route from stage {from} for outcome {other:?}"
                    )),
                };
                error!(
                    run_id = %state.run_id,
                    stage = %from,
                    error = %error,
                    "Run failed"
                );
                state.failure = Some(RunFailure {
                    stage: from,
                    error,
                    occurred_at: now_millis(),
                });
                state.current_stage = Stage::Failed;
                state.status = RunStatus::Failed;
            }
            Stage::Delegation if from == Stage::HumanCheckpoint => {
                state.begin_iteration();
                info!(
                    run_id = %state.run_id,
                    iteration = state.iteration,
                    "Starting new iteration with feedback"
                );
            }
            other => state.current_stage = other,
        }
        state.touch();
    }

    async fn load(&self, run_id: &str) -> Result<WorkflowState> {
        let bytes = self.store.get(run_id).await?;
        decode_snapshot(&bytes, self.executor.specialist_ids())
    }

    async fn persist(&self, state: &WorkflowState) -> Result<()> {
        let bytes = encode_snapshot(state)?;
        self.store.put(&state.run_id, bytes).await.map_err(|e| {
            error!(run_id = %state.run_id, error = %e, "Failed to persist snapshot");
            e
        })
    }

    async fn lock_run(&self, run_id: &str) -> RunGuard<'_> {
        let lock = {
            let mut locks = self.run_locks.lock();
            locks.entry(run_id.to_string()).or_default().clone()
        };
        RunGuard {
            locks: &self.run_locks,
            run_id: run_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCheckpointStore;
    use async_trait::async_trait;
    use scanue_common::{
        Agent, AgentOutput, AgentRole, CapabilityResult, HumanDecision, IntegrationOutput,
        Subtask,
    };

    struct Fixed(&'static str, AgentRole, AgentOutput);

    #[async_trait]
    impl Agent for Fixed {
        fn id(&self) -> &str {
            self.0
        }
        fn name(&self) -> &str {
            self.0
        }
        fn role(&self) -> AgentRole {
            self.1
        }
        async fn process(&self, _state: &WorkflowState) -> CapabilityResult<AgentOutput> {
            Ok(self.2.clone())
        }
        fn system_prompt(&self) -> &str {
            ""
        }
    }

    fn agents(confidence: f32) -> AgentSet {
        AgentSet::new(
            Arc::new(Fixed(
                "delegator",
                AgentRole::Delegator,
                AgentOutput::Subtasks {
                    subtasks: vec![Subtask::new("weigh costs")],
                },
            )),
            vec![Arc::new(Fixed(
                "reward_processing",
                AgentRole::Specialist,
                AgentOutput::Analysis {
                    content: "costs are fine".into(),
                },
            ))],
            Arc::new(Fixed(
                "integrator",
                AgentRole::Integrator,
                AgentOutput::Integration(IntegrationOutput {
                    content: "go ahead".into(),
                    confidence,
                    conflict_detected: false,
                }),
            )),
        )
    }

    #[test]
    fn report_hides_result_until_completed() {
        let mut state = WorkflowState::new("t");
        state.integrated_result = Some(IntegratedResult {
            content: "draft".into(),
            confidence: 0.2,
            conflict_detected: false,
            unavailable_specialists: vec![],
            iteration: 0,
        });
        assert!(RunReport::from(&state).result.is_none());

        state.status = RunStatus::Completed;
        state.current_stage = Stage::Done;
        assert_eq!(RunReport::from(&state).result.unwrap().content, "draft");
    }

    #[tokio::test]
    async fn confident_run_completes() {
        let engine = WorkflowEngine::new(agents(0.95), Arc::new(InMemoryCheckpointStore::new()));
        let outcome = engine.run("plan a budget").await.unwrap();
        let RunOutcome::Completed { result, .. } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(result.content, "go ahead");
    }

    #[tokio::test]
    async fn approve_after_suspension_completes() {
        let engine = WorkflowEngine::new(agents(0.3), Arc::new(InMemoryCheckpointStore::new()));
        let outcome = engine.run("plan a budget").await.unwrap();
        assert!(matches!(outcome, RunOutcome::Suspended { .. }));
        let run_id = outcome.run_id().to_string();
        assert_eq!(engine.awaiting_runs().await, vec![run_id.clone()]);

        let outcome = engine.resume(&run_id, HumanResponse::approve()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        assert!(engine.awaiting_runs().await.is_empty());

        let report = engine.get_status(&run_id).await.unwrap();
        assert_eq!(report.feedback_count, 1);
        assert_eq!(report.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let engine = WorkflowEngine::new(agents(0.9), Arc::new(InMemoryCheckpointStore::new()));
        assert!(matches!(
            engine.resume("run_missing", HumanResponse::approve()).await,
            Err(ScanueError::NotFound(_))
        ));
        assert!(matches!(
            engine.get_status("run_missing").await,
            Err(ScanueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn locks_are_released() {
        let engine = WorkflowEngine::new(agents(0.9), Arc::new(InMemoryCheckpointStore::new()));
        engine.run("t").await.unwrap();
        assert!(engine.inner.run_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn run_guard_forgets_uncontended_lock() {
        let engine = WorkflowEngine::new(agents(0.9), Arc::new(InMemoryCheckpointStore::new()));
        let guard = engine.inner.lock_run("run_a").await;
        assert_eq!(engine.inner.run_locks.lock().len(), 1);

        drop(guard);
        assert!(engine.inner.run_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn resume_of_running_run_is_not_found() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = WorkflowEngine::new(agents(0.9), store.clone());
        let state = WorkflowState::new("t");
        store
            .put(&state.run_id, encode_snapshot(&state).unwrap())
            .await
            .unwrap();

        assert!(matches!(
            engine.resume(&state.run_id, HumanResponse::approve()).await,
            Err(ScanueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reject_starts_new_iteration() {
        let engine = WorkflowEngine::with_policies(
            agents(0.3),
            Arc::new(InMemoryCheckpointStore::new()),
            RetryPolicy::default(),
            ReviewPolicy::default(),
            CheckpointPolicy::default(),
        );
        let run_id = engine.run("t").await.unwrap().run_id().to_string();

        let outcome = engine
            .resume(&run_id, HumanResponse::reject("start over"))
            .await
            .unwrap();
        let RunOutcome::Suspended { checkpoint, .. } = outcome else {
            panic!("low confidence should suspend again");
        };
        assert_eq!(checkpoint.iteration, 1);
        assert_eq!(checkpoint.default_response, HumanDecision::Approve);
    }
}
