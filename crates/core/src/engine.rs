use crate::error::IndexingError;
use crate::models::{RunState, RunStatus};
use crate::traits::{Activity, ActivityContext, Workflow, WorkflowEngine};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_RETAINED_RUNS: usize = 1_000;

struct EngineState {
    activities: RwLock<HashMap<String, Arc<dyn Activity>>>,
    workflows: RwLock<HashMap<String, Arc<dyn Workflow>>>,
    runs: tokio::sync::RwLock<HashMap<String, RunStatus>>,
    attempts: u32,
    retry_delay: Duration,
    retained_runs: usize,
}

impl EngineState {
    fn activity(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.activities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn workflow(&self, name: &str) -> Option<Arc<dyn Workflow>> {
        self.workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    async fn update_run(&self, run_id: &str, change: impl FnOnce(&mut RunStatus)) {
        if let Some(run) = self.runs.write().await.get_mut(run_id) {
            change(run);
        }
    }

    async fn finish_run(&self, run_id: &str, outcome: Result<(), String>) {
        self.update_run(run_id, |run| {
            run.finished_at = Some(Utc::now());
            match outcome {
                Ok(()) => run.state = RunState::Completed,
                Err(message) => {
                    run.state = RunState::Failed;
                    run.error = Some(message);
                }
            }
        })
        .await;
        self.forget_oldest_finished().await;
    }

    /// Keeps at most `retained_runs` finished runs, dropping the ones that
    /// finished first. Unfinished runs are never dropped.
    async fn forget_oldest_finished(&self) {
        let mut runs = self.runs.write().await;
        let mut finished: Vec<_> = runs
            .values()
            .filter(|run| run.state.is_finished())
            .map(|run| (run.finished_at, run.run_id.clone()))
            .collect();
        if finished.len() <= self.retained_runs {
            return;
        }

        finished.sort();
        let excess = finished.len() - self.retained_runs;
        for (_, run_id) in finished.into_iter().take(excess) {
            runs.remove(&run_id);
        }
        debug!(forgotten = excess, retained = self.retained_runs, "dropped finished runs");
    }
}

/// In-process workflow engine. Runs are tokio tasks; progress lives in memory
/// only, so a restarted process forgets earlier runs. Only the most recent
/// finished runs stay queryable.
pub struct LocalWorkflowEngine {
    state: Arc<EngineState>,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Default for LocalWorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalWorkflowEngine {
    pub fn new() -> Self {
        Self::with_retries(1, Duration::from_millis(200))
    }

    /// `attempts` is the number of times an activity may run before its error
    /// fails the workflow. Values below one are treated as one.
    pub fn with_retries(attempts: u32, retry_delay: Duration) -> Self {
        Self {
            state: Arc::new(EngineState {
                activities: RwLock::new(HashMap::new()),
                workflows: RwLock::new(HashMap::new()),
                runs: tokio::sync::RwLock::new(HashMap::new()),
                attempts: attempts.max(1),
                retry_delay,
                retained_runs: DEFAULT_RETAINED_RUNS,
            }),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// How many finished runs `get_run_status` can still report on. Values
    /// below one are treated as one. Call before the engine is shared.
    pub fn with_run_retention(mut self, retained_runs: usize) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.retained_runs = retained_runs.max(1);
        }
        self
    }

    /// Waits until the run reaches a terminal state and returns its status.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<RunStatus, IndexingError> {
        let handle = self.handles.lock().await.remove(run_id);

        if let Some(handle) = handle {
            self.settle(run_id, handle).await;
        }

        self.get_run_status(run_id).await
    }

    async fn settle(&self, run_id: &str, handle: JoinHandle<()>) {
        if let Err(join_error) = handle.await {
            error!(run_id, error = %join_error, "workflow task aborted");
            self.state
                .finish_run(run_id, Err(format!("workflow task aborted: {join_error}")))
                .await;
        }
    }

    /// Drops the handles of tasks that already ended, recording aborted ones
    /// as failed runs.
    async fn reap_finished(&self) {
        let finished: Vec<(String, JoinHandle<()>)> = {
            let mut handles = self.handles.lock().await;
            let run_ids: Vec<String> = handles
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(run_id, _)| run_id.clone())
                .collect();
            run_ids
                .into_iter()
                .filter_map(|run_id| handles.remove_entry(&run_id))
                .collect()
        };

        for (run_id, handle) in finished {
            self.settle(&run_id, handle).await;
        }
    }
}

struct RunContext {
    state: Arc<EngineState>,
    run_id: String,
}

#[async_trait]
impl ActivityContext for RunContext {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    async fn call_activity(&self, name: &str, args: Value) -> Result<Value, IndexingError> {
        let activity = self
            .state
            .activity(name)
            .ok_or_else(|| IndexingError::not_found("activity", name))?;

        let mut attempt = 1;
        loop {
            match activity.execute(args.clone()).await {
                Ok(output) => {
                    debug!(run_id = %self.run_id, activity = name, attempt, "activity finished");
                    self.state
                        .update_run(&self.run_id, |run| {
                            run.completed_activities.push(name.to_string())
                        })
                        .await;
                    return Ok(output);
                }
                Err(failure) if attempt < self.state.attempts => {
                    warn!(
                        run_id = %self.run_id,
                        activity = name,
                        attempt,
                        error = %failure,
                        "activity failed, retrying"
                    );
                    tokio::time::sleep(self.state.retry_delay * attempt).await;
                    attempt += 1;
                }
                Err(failure) => return Err(failure),
            }
        }
    }
}

#[async_trait]
impl WorkflowEngine for LocalWorkflowEngine {
    fn register_activity(&self, name: &str, activity: Arc<dyn Activity>) {
        self.state
            .activities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), activity);
    }

    fn register_workflow(&self, name: &str, workflow: Arc<dyn Workflow>) {
        self.state
            .workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), workflow);
    }

    async fn invoke_workflow(&self, name: &str, args: Value) -> Result<String, IndexingError> {
        let workflow = self
            .state
            .workflow(name)
            .ok_or_else(|| IndexingError::not_found("workflow", name))?;
        self.reap_finished().await;

        let run_id = Uuid::new_v4().to_string();
        self.state.runs.write().await.insert(
            run_id.clone(),
            RunStatus {
                run_id: run_id.clone(),
                workflow: name.to_string(),
                state: RunState::Pending,
                error: None,
                completed_activities: Vec::new(),
                started_at: Utc::now(),
                finished_at: None,
            },
        );

        let context = RunContext {
            state: Arc::clone(&self.state),
            run_id: run_id.clone(),
        };
        let task = tokio::spawn(async move {
            context
                .state
                .update_run(&context.run_id, |run| run.state = RunState::Running)
                .await;

            let outcome = workflow
                .run(&context, args)
                .await
                .map(|_| ())
                .map_err(|failure| failure.to_string());

            if let Err(message) = &outcome {
                error!(run_id = %context.run_id, error = %message, "workflow run failed");
            }
            context.state.finish_run(&context.run_id, outcome).await;
        });

        self.handles.lock().await.insert(run_id.clone(), task);
        info!(workflow = name, run_id = %run_id, "workflow run scheduled");
        Ok(run_id)
    }

    async fn get_run_status(&self, run_id: &str) -> Result<RunStatus, IndexingError> {
        self.state
            .runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| IndexingError::not_found("workflow run", run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Double;

    #[async_trait]
    impl Activity for Double {
        async fn execute(&self, args: Value) -> Result<Value, IndexingError> {
            let value = args.as_i64().unwrap_or_default();
            Ok(json!(value * 2))
        }
    }

    struct Flaky {
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl Activity for Flaky {
        async fn execute(&self, _args: Value) -> Result<Value, IndexingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(IndexingError::upstream("flaky", "temporarily unavailable"))
            } else {
                Ok(json!("ok"))
            }
        }
    }

    struct Pipeline(&'static [&'static str]);

    #[async_trait]
    impl Workflow for Pipeline {
        async fn run(&self, ctx: &dyn ActivityContext, args: Value) -> Result<Value, IndexingError> {
            let mut value = args;
            for name in self.0 {
                value = ctx.call_activity(name, value).await?;
            }
            Ok(value)
        }
    }

    #[tokio::test]
    async fn runs_complete_and_record_their_activities() -> Result<(), IndexingError> {
        let engine = LocalWorkflowEngine::new();
        engine.register_activity("double", Arc::new(Double));
        engine.register_workflow("twice", Arc::new(Pipeline(&["double", "double"])));

        let run_id = engine.invoke_workflow("twice", json!(3)).await?;
        let status = engine.wait_for_run(&run_id).await?;

        assert_eq!(status.state, RunState::Completed);
        assert_eq!(status.completed_activities, vec!["double", "double"]);
        assert!(status.finished_at.is_some());
        assert!(status.error.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn activity_errors_fail_the_run_with_their_message() -> Result<(), IndexingError> {
        let engine = LocalWorkflowEngine::new();
        engine.register_activity(
            "flaky",
            Arc::new(Flaky {
                calls: AtomicUsize::new(0),
                failures: 1,
            }),
        );
        engine.register_workflow("once", Arc::new(Pipeline(&["flaky"])));

        let run_id = engine.invoke_workflow("once", Value::Null).await?;
        let status = engine.wait_for_run(&run_id).await?;

        assert_eq!(status.state, RunState::Failed);
        assert!(status
            .error
            .as_deref()
            .is_some_and(|message| message.contains("temporarily unavailable")));
        Ok(())
    }

    #[tokio::test]
    async fn retries_give_activities_another_attempt() -> Result<(), IndexingError> {
        let engine = LocalWorkflowEngine::with_retries(3, Duration::from_millis(1));
        let flaky = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            failures: 2,
        });
        engine.register_activity("flaky", flaky.clone());
        engine.register_workflow("once", Arc::new(Pipeline(&["flaky"])));

        let run_id = engine.invoke_workflow("once", Value::Null).await?;
        let status = engine.wait_for_run(&run_id).await?;

        assert_eq!(status.state, RunState::Completed);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn finished_runs_are_reaped_and_capped() -> Result<(), IndexingError> {
        let engine = LocalWorkflowEngine::new().with_run_retention(2);
        engine.register_activity("double", Arc::new(Double));
        engine.register_workflow("twice", Arc::new(Pipeline(&["double", "double"])));

        let mut run_ids = Vec::new();
        for value in 0..5 {
            run_ids.push(engine.invoke_workflow("twice", json!(value)).await?);
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let ended = engine
                    .handles
                    .lock()
                    .await
                    .values()
                    .all(|handle| handle.is_finished());
                if ended {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("runs finish");

        let last = engine.invoke_workflow("twice", json!(5)).await?;
        assert!(engine.handles.lock().await.len() <= 1);

        let status = engine.wait_for_run(&last).await?;
        assert_eq!(status.state, RunState::Completed);
        assert!(engine.handles.lock().await.is_empty());
        assert_eq!(engine.state.runs.read().await.len(), 2);

        let mut forgotten = 0;
        for run_id in &run_ids {
            if engine
                .get_run_status(run_id)
                .await
                .is_err_and(|error| error.is_not_found())
            {
                forgotten += 1;
            }
        }
        assert_eq!(forgotten, 4);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_names_and_runs_are_not_found() -> Result<(), IndexingError> {
        let engine = LocalWorkflowEngine::new();
        engine.register_workflow("missing-step", Arc::new(Pipeline(&["nope"])));

        assert!(engine
            .invoke_workflow("unregistered", Value::Null)
            .await
            .is_err_and(|error| error.is_not_found()));
        assert!(engine
            .get_run_status("no-such-run")
            .await
            .is_err_and(|error| error.is_not_found()));

        let run_id = engine.invoke_workflow("missing-step", Value::Null).await?;
        let status = engine.wait_for_run(&run_id).await?;
        assert_eq!(status.state, RunState::Failed);
        Ok(())
    }
}
