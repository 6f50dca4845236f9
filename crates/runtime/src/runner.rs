use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use taskcell_core::{Error, Message, Result, RuntimeConfig, ShellConfig, Task, TaskStatus};
use taskcell_skills::{SkillContext, SkillLoader};

use crate::context::ContextManager;

struct TaskEntry {
    task: Task,
    cancel: CancellationToken,
    status_tx: watch::Sender<TaskStatus>,
}

/// Counts of tasks by status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskSummary {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Accepts task submissions, resolves skills through the loader and runs
/// them with bounded concurrency, producing a terminal outcome for every
/// accepted task.
///
/// Admission is gated by a semaphore with `concurrency_limit` permits;
/// waiters are served first-submitted-first-admitted, and `submit` itself
/// never blocks on the gate. A skill failure is captured into its task's
/// terminal state and never disturbs other tasks or the runner.
#[derive(Clone)]
pub struct TaskRunner {
    loader: Arc<SkillLoader>,
    context: Arc<ContextManager>,
    shell: ShellConfig,
    semaphore: Arc<Semaphore>,
    tasks: Arc<Mutex<HashMap<String, TaskEntry>>>,
}

impl TaskRunner {
    pub fn new(
        loader: Arc<SkillLoader>,
        context: Arc<ContextManager>,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            loader,
            context,
            shell: config.shell.clone(),
            semaphore: Arc::new(Semaphore::new(config.concurrency_limit)),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validate and enqueue a task, returning its id immediately.
    ///
    /// The skill must resolve in the current registry snapshot and the
    /// parameters must satisfy the action's declared schema; otherwise the
    /// submission is rejected here and no task ever reaches `running`.
    pub async fn submit(
        &self,
        skill: &str,
        action: &str,
        params: Value,
        session_id: &str,
    ) -> Result<String> {
        let descriptor = self.loader.get(skill).await?;
        let action_spec = descriptor.get_action(action).ok_or_else(|| {
            Error::NotFound(format!("Skill '{}' has no action '{}'", skill, action))
        })?;
        action_spec.validate_params(&params)?;

        let task = Task::new(skill, action, params, session_id);
        let task_id = task.id.clone();
        let cancel = CancellationToken::new();
        let (status_tx, _rx) = watch::channel(TaskStatus::Pending);

        info!(task = %task_id, skill, action, "Task submitted");
        {
            let mut tasks = self.tasks.lock().await;
            tasks.insert(
                task_id.clone(),
                TaskEntry {
                    task,
                    cancel: cancel.clone(),
                    status_tx,
                },
            );
        }

        let runner = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            runner.run_task(id, cancel).await;
        });

        Ok(task_id)
    }

    /// Block up to `timeout` for the task to reach a terminal state. On
    /// timeout the task is returned in its current state; the underlying
    /// work is unaffected.
    pub async fn await_result(&self, task_id: &str, timeout: Duration) -> Result<Task> {
        let mut rx = {
            let tasks = self.tasks.lock().await;
            let entry = tasks
                .get(task_id)
                .ok_or_else(|| Error::NotFound(format!("Unknown task: {}", task_id)))?;
            if entry.task.status.is_terminal() {
                return Ok(entry.task.clone());
            }
            entry.status_tx.subscribe()
        };

        let _ = tokio::time::timeout(timeout, async {
            loop {
                if rx.borrow_and_update().is_terminal() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        self.get_task(task_id).await
    }

    /// Best-effort cancellation. A pending task becomes `cancelled`
    /// immediately and its skill never runs; a running task gets its
    /// cancellation token fired and is expected to observe it at its own
    /// suspension points. Terminal tasks are untouched.
    pub async fn cancel(&self, task_id: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::NotFound(format!("Unknown task: {}", task_id)))?;

        match entry.task.status {
            TaskStatus::Pending => {
                entry.task.status = TaskStatus::Cancelled;
                entry.task.finished_at = Some(Utc::now());
                entry.cancel.cancel();
                entry.status_tx.send_replace(TaskStatus::Cancelled);
                info!(task = %task_id, "Cancelled pending task");
            }
            TaskStatus::Running => {
                entry.cancel.cancel();
                info!(task = %task_id, "Requested cooperative cancellation");
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        let tasks = self.tasks.lock().await;
        tasks
            .get(task_id)
            .map(|entry| entry.task.clone())
            .ok_or_else(|| Error::NotFound(format!("Unknown task: {}", task_id)))
    }

    /// List tasks, optionally filtered by status, newest first.
    pub async fn list_tasks(&self, status_filter: Option<TaskStatus>) -> Vec<Task> {
        let tasks = self.tasks.lock().await;
        let mut result: Vec<Task> = tasks
            .values()
            .filter(|entry| status_filter.map_or(true, |s| entry.task.status == s))
            .map(|entry| entry.task.clone())
            .collect();
        result.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        result
    }

    pub async fn summary(&self) -> TaskSummary {
        let tasks = self.tasks.lock().await;
        let mut summary = TaskSummary::default();
        for entry in tasks.values() {
            match entry.task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Succeeded => summary.succeeded += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    /// Drop terminal tasks older than `max_age`.
    pub async fn cleanup_old_tasks(&self, max_age: Duration) {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|_, entry| {
            if entry.task.status.is_terminal() {
                entry.task.finished_at.map_or(true, |f| f > cutoff)
            } else {
                true
            }
        });
        let removed = before - tasks.len();
        if removed > 0 {
            debug!(removed, "Cleaned up old tasks");
        }
    }

    async fn run_task(&self, task_id: String, cancel: CancellationToken) {
        // FIFO admission: wait for a slot, but bail out promptly if the
        // task is cancelled while still pending.
        let permit = tokio::select! {
            _ = cancel.cancelled() => {
                self.finish(&task_id, TaskStatus::Cancelled, None, None).await;
                return;
            }
            permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.finish(
                        &task_id,
                        TaskStatus::Failed,
                        None,
                        Some("Runner shut down before the task was admitted".to_string()),
                    )
                    .await;
                    return;
                }
            },
        };

        let Some(task) = self.mark_running(&task_id).await else {
            // Cancelled between the select above and the state change.
            drop(permit);
            return;
        };

        let skill = match self.loader.instantiate(&task.skill).await {
            Ok(skill) => skill,
            Err(e) => {
                self.finish(&task_id, TaskStatus::Failed, None, Some(e.to_string()))
                    .await;
                return;
            }
        };

        let session = match self.context.get_or_create_session(&task.session_id).await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(task = %task_id, error = %e, "Session unavailable, running detached");
                None
            }
        };

        let ctx = SkillContext {
            session,
            cancel: cancel.clone(),
            shell: self.shell.clone(),
        };

        let outcome = skill.execute(&task.action, ctx, task.params.clone()).await;
        drop(permit);

        match outcome {
            Ok(result) => {
                info!(task = %task_id, skill = %task.skill, "Task succeeded");
                self.finish(&task_id, TaskStatus::Succeeded, Some(result), None)
                    .await;
            }
            Err(_) if cancel.is_cancelled() => {
                info!(task = %task_id, skill = %task.skill, "Task cancelled during execution");
                self.finish(&task_id, TaskStatus::Cancelled, None, None).await;
            }
            Err(e) => {
                let detail = Error::SkillExecution {
                    skill: task.skill.clone(),
                    action: task.action.clone(),
                    message: e.to_string(),
                }
                .to_string();
                error!(task = %task_id, error = %detail, "Task failed");
                self.finish(&task_id, TaskStatus::Failed, None, Some(detail))
                    .await;
            }
        }

        self.record_outcome(&task_id).await;
    }

    /// Transition a pending task to running. Returns the task snapshot, or
    /// `None` when the task was cancelled first.
    async fn mark_running(&self, task_id: &str) -> Option<Task> {
        let mut tasks = self.tasks.lock().await;
        let entry = tasks.get_mut(task_id)?;
        if entry.task.status != TaskStatus::Pending {
            return None;
        }
        entry.task.status = TaskStatus::Running;
        entry.task.started_at = Some(Utc::now());
        entry.status_tx.send_replace(TaskStatus::Running);
        debug!(task = %task_id, skill = %entry.task.skill, "Task running");
        Some(entry.task.clone())
    }

    /// Move a task into a terminal state. Already-terminal tasks are left
    /// untouched, keeping transitions monotonic.
    async fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) {
        let mut tasks = self.tasks.lock().await;
        let Some(entry) = tasks.get_mut(task_id) else {
            return;
        };
        if entry.task.status.is_terminal() {
            return;
        }
        entry.task.status = status;
        entry.task.finished_at = Some(Utc::now());
        entry.task.result = result;
        entry.task.error = error;
        entry.status_tx.send_replace(status);
    }

    /// Audit append: record the terminal outcome into the session history.
    async fn record_outcome(&self, task_id: &str) {
        let Ok(task) = self.get_task(task_id).await else {
            return;
        };
        let note = match task.status {
            TaskStatus::Succeeded => format!("Task {} ({}.{}) succeeded", task.id, task.skill, task.action),
            TaskStatus::Failed => format!(
                "Task {} ({}.{}) failed: {}",
                task.id,
                task.skill,
                task.action,
                task.error.as_deref().unwrap_or("unknown error")
            ),
            TaskStatus::Cancelled => {
                format!("Task {} ({}.{}) cancelled", task.id, task.skill, task.action)
            }
            _ => return,
        };
        if let Err(e) = self
            .context
            .append_message(&task.session_id, Message::tool(&note))
            .await
        {
            warn!(task = %task_id, error = %e, "Failed to record task outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use taskcell_memory::InMemory;
    use taskcell_skills::{ActionSpec, BuiltinSource, Skill, SkillDescriptor};

    fn runtime_parts(config: RuntimeConfig) -> (Arc<SkillLoader>, Arc<ContextManager>, TaskRunner) {
        let memory = Arc::new(InMemory::new());
        let context = Arc::new(ContextManager::new(memory, &config));
        let loader = Arc::new(SkillLoader::with_defaults());
        let runner = TaskRunner::new(Arc::clone(&loader), Arc::clone(&context), &config);
        (loader, context, runner)
    }

    async fn ready_runner(config: RuntimeConfig) -> (Arc<ContextManager>, TaskRunner) {
        let (loader, context, runner) = runtime_parts(config);
        loader.discover().await;
        (context, runner)
    }

    /// Skill that sleeps while tracking its own concurrency high-water mark.
    struct GaugeSkill {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Skill for GaugeSkill {
        fn descriptor(&self) -> SkillDescriptor {
            SkillDescriptor::new("gauge", "concurrency probe").action(ActionSpec::new("work"))
        }

        fn reusable(&self) -> bool {
            true
        }

        async fn execute(&self, _action: &str, _ctx: SkillContext, _params: Value) -> Result<Value> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(json!({"done": true}))
        }
    }

    struct FailingSkill;

    #[async_trait]
    impl Skill for FailingSkill {
        fn descriptor(&self) -> SkillDescriptor {
            SkillDescriptor::new("flaky", "always fails").action(ActionSpec::new("boom"))
        }

        async fn execute(&self, _action: &str, _ctx: SkillContext, _params: Value) -> Result<Value> {
            Err(Error::Other("exploded".to_string()))
        }
    }

    /// Skill that waits on the cancellation token, recording whether it ran.
    struct SleeperSkill {
        ran: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Skill for SleeperSkill {
        fn descriptor(&self) -> SkillDescriptor {
            SkillDescriptor::new("sleeper", "sleeps until cancelled").action(ActionSpec::new("nap"))
        }

        fn reusable(&self) -> bool {
            true
        }

        async fn execute(&self, _action: &str, ctx: SkillContext, _params: Value) -> Result<Value> {
            self.ran.fetch_add(1, Ordering::SeqCst);
            tokio::select! {
                _ = ctx.cancel.cancelled() => Err(Error::Cancelled("nap interrupted".to_string())),
                _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(json!({"slept": true})),
            }
        }
    }

    #[tokio::test]
    async fn test_submit_unknown_skill_rejected() {
        let (_context, runner) = ready_runner(RuntimeConfig::default()).await;
        let err = runner
            .submit("nope", "run", json!({}), "s1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(runner.summary().await.pending, 0);
    }

    #[tokio::test]
    async fn test_submit_invalid_params_rejected() {
        let (_context, runner) = ready_runner(RuntimeConfig::default()).await;
        let err = runner.submit("shell", "run", json!({}), "s1").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = runner
            .submit("shell", "fly", json!({"cmd": "ls"}), "s1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_shell_run_succeeds() {
        let (context, runner) = ready_runner(RuntimeConfig::default()).await;
        let task_id = runner
            .submit("shell", "run", json!({"cmd": "echo hi"}), "s1")
            .await
            .unwrap();

        let task = runner
            .await_result(&task_id, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        let result = task.result.unwrap();
        assert!(result["stdout"].as_str().unwrap().contains("hi"));
        assert!(task.error.is_none());
        assert!(task.started_at.is_some());
        assert!(task.finished_at.is_some());

        // The outcome lands in the session history as an audit entry.
        let session = context.get_or_create_session("s1").await.unwrap();
        assert!(session
            .messages
            .iter()
            .any(|m| m.content.contains("succeeded")));
    }

    #[tokio::test]
    async fn test_failed_skill_captured_not_propagated() {
        let config = RuntimeConfig::default();
        let memory = Arc::new(InMemory::new());
        let context = Arc::new(ContextManager::new(memory, &config));
        let source = BuiltinSource::with_defaults().register("test:flaky", || {
            Ok(Arc::new(FailingSkill) as Arc<dyn Skill>)
        });
        let loader = Arc::new(SkillLoader::new(vec![Box::new(source)]));
        loader.discover().await;
        let runner = TaskRunner::new(loader, context, &config);

        let failing = runner.submit("flaky", "boom", json!({}), "s1").await.unwrap();
        let healthy = runner
            .submit("echo", "say", json!({"text": "still fine"}), "s1")
            .await
            .unwrap();

        let failed = runner
            .await_result(&failing, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        let detail = failed.error.unwrap();
        assert!(detail.contains("flaky"));
        assert!(detail.contains("boom"));
        assert!(failed.result.is_none());

        let ok = runner
            .await_result(&healthy, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(ok.status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_concurrency_limit_enforced() {
        let config = RuntimeConfig {
            concurrency_limit: 2,
            ..Default::default()
        };
        let memory = Arc::new(InMemory::new());
        let context = Arc::new(ContextManager::new(memory, &config));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (c, p) = (Arc::clone(&current), Arc::clone(&peak));
        let source = BuiltinSource::new().register("test:gauge", move || {
            Ok(Arc::new(GaugeSkill {
                current: Arc::clone(&c),
                peak: Arc::clone(&p),
            }) as Arc<dyn Skill>)
        });
        let loader = Arc::new(SkillLoader::new(vec![Box::new(source)]));
        loader.discover().await;
        let runner = TaskRunner::new(loader, context, &config);

        let mut ids = Vec::new();
        for _ in 0..8 {
            ids.push(runner.submit("gauge", "work", json!({}), "s1").await.unwrap());
        }
        for id in &ids {
            let task = runner.await_result(id, Duration::from_secs(10)).await.unwrap();
            assert_eq!(task.status, TaskStatus::Succeeded);
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancel_pending_task_never_runs() {
        let config = RuntimeConfig {
            concurrency_limit: 1,
            ..Default::default()
        };
        let memory = Arc::new(InMemory::new());
        let context = Arc::new(ContextManager::new(memory, &config));
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        let source = BuiltinSource::new().register("test:sleeper", move || {
            Ok(Arc::new(SleeperSkill {
                ran: Arc::clone(&ran_clone),
            }) as Arc<dyn Skill>)
        });
        let loader = Arc::new(SkillLoader::new(vec![Box::new(source)]));
        loader.discover().await;
        let runner = TaskRunner::new(loader, context, &config);

        // First task occupies the only slot; the second stays pending.
        let first = runner.submit("sleeper", "nap", json!({}), "s1").await.unwrap();
        let second = runner.submit("sleeper", "nap", json!({}), "s1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        runner.cancel(&second).await.unwrap();
        let cancelled = runner
            .await_result(&second, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        // Only the first task ever executed.
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        runner.cancel(&first).await.unwrap();
        let first_task = runner
            .await_result(&first, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(first_task.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_running_task_cooperatively() {
        let (_context, runner) = ready_runner(RuntimeConfig::default()).await;
        let task_id = runner
            .submit("shell", "run", json!({"cmd": "sleep 30"}), "s1")
            .await
            .unwrap();
        // Let it reach running before requesting cancellation.
        tokio::time::sleep(Duration::from_millis(200)).await;
        runner.cancel(&task_id).await.unwrap();

        let task = runner
            .await_result(&task_id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.result.is_none());
    }

    #[tokio::test]
    async fn test_await_result_timeout_is_soft() {
        let (_context, runner) = ready_runner(RuntimeConfig::default()).await;
        let task_id = runner
            .submit("shell", "run", json!({"cmd": "sleep 5"}), "s1")
            .await
            .unwrap();

        let snapshot = runner
            .await_result(&task_id, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(!snapshot.status.is_terminal());

        // The task is unaffected and still completes.
        runner.cancel(&task_id).await.unwrap();
        let done = runner
            .await_result(&task_id, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(done.status.is_terminal());
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let (_context, runner) = ready_runner(RuntimeConfig::default()).await;
        assert!(runner.get_task("missing").await.unwrap_err().is_not_found());
        assert!(runner.cancel("missing").await.unwrap_err().is_not_found());
        assert!(runner
            .await_result("missing", Duration::from_millis(10))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_list_and_summary() {
        let (_context, runner) = ready_runner(RuntimeConfig::default()).await;
        let id = runner
            .submit("echo", "say", json!({"text": "hi"}), "s1")
            .await
            .unwrap();
        runner.await_result(&id, Duration::from_secs(5)).await.unwrap();

        let summary = runner.summary().await;
        assert_eq!(summary.succeeded, 1);
        let all = runner.list_tasks(None).await;
        assert_eq!(all.len(), 1);
        let succeeded = runner.list_tasks(Some(TaskStatus::Succeeded)).await;
        assert_eq!(succeeded.len(), 1);
        assert!(runner.list_tasks(Some(TaskStatus::Failed)).await.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_old_tasks() {
        let (_context, runner) = ready_runner(RuntimeConfig::default()).await;
        let id = runner
            .submit("echo", "say", json!({"text": "hi"}), "s1")
            .await
            .unwrap();
        runner.await_result(&id, Duration::from_secs(5)).await.unwrap();
        runner.cleanup_old_tasks(Duration::from_secs(0)).await;
        assert!(runner.get_task(&id).await.unwrap_err().is_not_found());
    }
}
