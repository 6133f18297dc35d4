//! The orchestrator: pool init, authentication, wave scheduling.
//!
//! Runs the dependency DAG against a small pool of browser connections.
//! Concurrency is bounded two ways: a semaphore caps simultaneously
//! running tasks at `max_parallel`, and each connection's tab lock
//! serializes (switch-tab, act) pairs between the tasks sharing it.
//!
//! Failure semantics: authentication failure is fatal to the whole run.
//! Pool initialization is fatal only if zero connections come up; a
//! partial pool degrades to the available count. Individual task
//! failures are isolated — they surface in the summary and never abort
//! sibling tasks. Every exit path, fatal or not, runs cleanup.

use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::backoff;
use crate::browser::{Connector, SharedBrowser};
use crate::core::task::RetryPolicy;
use crate::core::{TaskList, TaskStatus};
use crate::detect::CompletionDetector;
use crate::error::{Error, Result};
use crate::notify::{Event, Notifier, Severity};
use crate::orchestration::auth::{AuthFlow, AuthStatus};
use crate::orchestration::executor::{AttemptOutcome, ExecutorConfig, TaskExecutor};
use crate::session::SessionManager;
use crate::{clog, clog_warn};

/// Orchestrator phases, advanced monotonically during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    ConnectPool,
    Authenticate,
    ScheduleWaves,
    Summarize,
    Cleanup,
}

/// Run-level settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bound on simultaneously running tasks (1-10).
    pub max_parallel: usize,
    pub headless: bool,
    pub auth_timeout: Duration,
    pub auth_check_interval: Duration,
    /// Connection attempts per pool slot before giving up on it.
    pub connect_max_retries: u32,
    pub executor: ExecutorConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel: 1,
            headless: false,
            auth_timeout: Duration::from_secs(300),
            auth_check_interval: Duration::from_secs(2),
            connect_max_retries: 3,
            executor: ExecutorConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Build from the user-level config file.
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            max_parallel: config.execution.max_parallel,
            headless: config.auth.headless,
            auth_timeout: Duration::from_secs(config.auth.timeout_secs),
            auth_check_interval: Duration::from_secs_f64(config.auth.check_interval_secs),
            connect_max_retries: config.connection.max_retries,
            executor: ExecutorConfig::default(),
        }
    }
}

/// Final counts and branches for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub branches: Vec<String>,
}

impl RunSummary {
    /// Whether the run finished without task failures.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Orchestrates the whole run: pool, auth, waves, summary, cleanup.
pub struct Orchestrator {
    task_list: Arc<RwLock<TaskList>>,
    connector: Arc<dyn Connector>,
    sessions: Arc<Mutex<SessionManager>>,
    notifier: Arc<dyn Notifier>,
    detector: CompletionDetector,
    config: OrchestratorConfig,
    cancel: CancellationToken,
    browsers: Vec<SharedBrowser>,
    next_browser: AtomicUsize,
    phase: Phase,
}

impl Orchestrator {
    pub fn new(
        task_list: TaskList,
        connector: Arc<dyn Connector>,
        sessions: SessionManager,
        notifier: Arc<dyn Notifier>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            task_list: Arc::new(RwLock::new(task_list)),
            connector,
            sessions: Arc::new(Mutex::new(sessions)),
            notifier,
            detector: CompletionDetector::default(),
            config,
            cancel: CancellationToken::new(),
            browsers: Vec::new(),
            next_browser: AtomicUsize::new(0),
            phase: Phase::Init,
        }
    }

    /// Override the default completion detector.
    pub fn with_detector(mut self, detector: CompletionDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Token observed between waves and during retry backoff. Cancelling
    /// it stops new work; in-flight attempts drain on their own.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the orchestration to completion.
    ///
    /// Cleanup runs on every exit path, including fatal pool and auth
    /// failures.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let result = self.run_phases().await;

        self.phase = Phase::Cleanup;
        self.cleanup().await;

        result
    }

    async fn run_phases(&mut self) -> Result<RunSummary> {
        let total_tasks = self.task_list.read().await.len();
        self.notifier.notify(Event::RunStarted {
            total_tasks,
            max_parallel: self.config.max_parallel,
        });

        self.phase = Phase::ConnectPool;
        self.connect_pool().await?;

        self.phase = Phase::Authenticate;
        self.authenticate().await?;

        self.phase = Phase::ScheduleWaves;
        self.schedule_waves().await;

        self.phase = Phase::Summarize;
        Ok(self.summarize().await)
    }

    /// Bring up to `max_parallel` connections, each retried with backoff.
    ///
    /// A slot that exhausts its retries is abandoned with a warning; the
    /// run degrades to the connections that did come up. Zero usable
    /// connections is fatal.
    async fn connect_pool(&mut self) -> Result<()> {
        let requested = self.config.max_parallel;
        let connect_policy = RetryPolicy {
            max_attempts: self.config.connect_max_retries.max(1),
            ..RetryPolicy::default()
        };

        for slot in 0..requested {
            match self.connect_one(&connect_policy).await {
                Ok(browser) => {
                    self.notifier
                        .notify(Event::ConnectionReady { slot, requested });
                    self.browsers.push(browser);
                }
                Err(e) => {
                    self.notifier.notify(Event::ConnectionFailed {
                        slot,
                        error: e.to_string(),
                    });
                }
            }
        }

        if self.browsers.is_empty() {
            return Err(Error::Connection(format!(
                "failed to establish any of {} browser connections",
                requested
            )));
        }

        clog!(
            "Connection pool ready: {}/{} browsers",
            self.browsers.len(),
            requested
        );
        Ok(())
    }

    async fn connect_one(&self, policy: &RetryPolicy) -> Result<SharedBrowser> {
        let mut last_error = None;
        for attempt in 0..policy.max_attempts {
            match self.connector.connect().await {
                Ok(browser) => {
                    browser.launch(self.config.headless).await?;
                    return Ok(SharedBrowser::new(browser));
                }
                Err(e) => {
                    clog_warn!(
                        "connection attempt {}/{} failed: {}",
                        attempt + 1,
                        policy.max_attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt + 1 < policy.max_attempts {
                        let delay = backoff::delay_for_attempt(attempt, policy);
                        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                    }
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| Error::Connection("no connection attempts made".to_string())))
    }

    /// Authenticate on the first pooled connection. Fatal on failure or
    /// timeout.
    async fn authenticate(&mut self) -> Result<()> {
        let browser = self.browsers[0].clone();
        let mut flow = AuthFlow::new(
            browser,
            self.config.auth_timeout,
            self.config.auth_check_interval,
        );

        let status = flow.start(&self.config.executor.base_url).await?;
        match status {
            AuthStatus::Authenticated => {
                self.notifier.notify(Event::Authenticated);
                Ok(())
            }
            other => Err(Error::Auth(format!("authentication {}", other))),
        }
    }

    /// Wave loop over the runnable frontier.
    ///
    /// Each wave launches every currently runnable task under the
    /// semaphore and joins the whole wave before recomputing the
    /// frontier. The iteration budget of 2x the task count is the formal
    /// cap against pathological dependency configurations slipping past
    /// validation. Tasks still pending when the loop stops are skipped.
    async fn schedule_waves(&self) {
        let total = self.task_list.read().await.len();
        let max_iterations = total * 2;
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));
        let mut wave = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                self.notifier.notify(Event::RunCancelled);
                break;
            }

            let runnable: Vec<String> = {
                let list = self.task_list.read().await;
                list.get_runnable_tasks().iter().map(|t| t.id.clone()).collect()
            };
            if runnable.is_empty() {
                break;
            }

            wave += 1;
            if wave > max_iterations {
                clog_warn!(
                    "wave budget exhausted after {} iterations; abandoning scheduling",
                    max_iterations
                );
                self.notifier.notify(Event::Message {
                    severity: Severity::Warning,
                    text: format!("scheduling stopped after {} waves", max_iterations),
                });
                break;
            }

            self.notifier.notify(Event::WaveStarted {
                wave,
                task_ids: runnable.clone(),
            });

            let mut handles = Vec::new();
            for task_id in runnable {
                let semaphore = Arc::clone(&semaphore);
                let executor = self.executor_for_next_slot();
                let task_list = Arc::clone(&self.task_list);
                let notifier = Arc::clone(&self.notifier);
                let cancel = self.cancel.clone();

                handles.push(tokio::spawn(async move {
                    // Bound simultaneous executors; permit is held for the
                    // whole task including its retries
                    let _permit = semaphore.acquire().await;
                    Self::run_task_with_retry(task_id, executor, task_list, notifier, cancel)
                        .await;
                }));
            }

            for result in join_all(handles).await {
                if let Err(e) = result {
                    clog_warn!("task join error: {}", e);
                }
            }
        }

        self.skip_unrunnable().await;
    }

    /// Build an executor bound to the next pool connection, round-robin.
    fn executor_for_next_slot(&self) -> TaskExecutor {
        let index = self.next_browser.fetch_add(1, Ordering::Relaxed) % self.browsers.len();
        TaskExecutor::new(
            self.browsers[index].clone(),
            self.detector.clone(),
            Arc::clone(&self.sessions),
            Arc::clone(&self.notifier),
            self.config.executor.clone(),
        )
    }

    /// Per-task retry loop: attempts up to the task's policy, sleeping a
    /// jittered backoff between attempts. A non-retryable error,
    /// exhaustion, an exceeded wait budget, or cancellation during
    /// backoff finalizes the task as failed; siblings in the wave are
    /// unaffected.
    async fn run_task_with_retry(
        task_id: String,
        executor: TaskExecutor,
        task_list: Arc<RwLock<TaskList>>,
        notifier: Arc<dyn Notifier>,
        cancel: CancellationToken,
    ) {
        let (policy, wait_budget) = {
            let mut list = task_list.write().await;
            let Some(task) = list.get_task_mut(&task_id) else {
                return;
            };
            task.start();
            (task.retry_policy.clone(), task.wait_budget_secs())
        };

        let started = tokio::time::Instant::now();

        loop {
            let (task_snapshot, attempt) = {
                let list = task_list.read().await;
                let Some(task) = list.get_task(&task_id) else {
                    return;
                };
                (task.clone(), task.retry_count)
            };

            notifier.notify(Event::TaskStarted {
                task_id: task_id.clone(),
                attempt,
            });

            let (error_message, retryable) = match executor.run_attempt(&task_snapshot).await {
                Ok(AttemptOutcome::Completed {
                    session_id,
                    branch_name,
                    ..
                }) => {
                    let mut list = task_list.write().await;
                    if let Some(task) = list.get_task_mut(&task_id) {
                        task.complete(Some(session_id), Some(branch_name.clone()));
                    }
                    notifier.notify(Event::TaskFinished {
                        task_id: task_id.clone(),
                        status: TaskStatus::Completed,
                        branch_name: Some(branch_name),
                    });
                    return;
                }
                Ok(AttemptOutcome::Indeterminate { waited, .. }) => {
                    // The remote session may still be running; retrying is
                    // the policy's call
                    (format!("completion not detected within {:?}", waited), true)
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    (e.to_string(), retryable)
                }
            };

            // Failed or indeterminate attempt: decide between retry and
            // final failure. The retry counter is only advanced when
            // another attempt will actually run, so an exhausted task
            // ends with retry_count == max_attempts - 1.
            let budget_exceeded = wait_budget
                .map(|budget| started.elapsed() >= Duration::from_secs(budget))
                .unwrap_or(false);

            let attempts_exhausted = attempt + 1 >= policy.max_attempts;
            if !retryable || attempts_exhausted || budget_exceeded {
                let reason = if budget_exceeded && !attempts_exhausted {
                    format!("completion wait budget exceeded: {}", error_message)
                } else {
                    error_message
                };
                Self::finalize_failure(&task_id, &reason, &task_list, &notifier).await;
                return;
            }

            {
                let mut list = task_list.write().await;
                if let Some(task) = list.get_task_mut(&task_id) {
                    task.increment_retry();
                }
            }

            let delay = backoff::delay_for_attempt(attempt, &policy);
            notifier.notify(Event::TaskRetrying {
                task_id: task_id.clone(),
                attempt,
                delay_secs: delay,
                error: error_message.clone(),
            });

            tokio::select! {
                _ = cancel.cancelled() => {
                    Self::finalize_failure(
                        &task_id,
                        &format!("run cancelled before retry: {}", error_message),
                        &task_list,
                        &notifier,
                    )
                    .await;
                    return;
                }
                _ = tokio::time::sleep(Duration::from_secs_f64(delay)) => {}
            }
        }
    }

    async fn finalize_failure(
        task_id: &str,
        reason: &str,
        task_list: &Arc<RwLock<TaskList>>,
        notifier: &Arc<dyn Notifier>,
    ) {
        let mut list = task_list.write().await;
        if let Some(task) = list.get_task_mut(task_id) {
            task.fail(reason);
        }
        notifier.notify(Event::TaskFinished {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
            branch_name: None,
        });
    }

    /// Skip tasks left pending after scheduling stopped: their
    /// dependencies failed, were skipped, or the run was cancelled.
    async fn skip_unrunnable(&self) {
        let mut list = self.task_list.write().await;
        let pending: Vec<String> = list
            .get_pending_tasks()
            .iter()
            .map(|t| t.id.clone())
            .collect();
        for task_id in pending {
            if let Some(task) = list.get_task_mut(&task_id) {
                task.skip();
            }
            self.notifier.notify(Event::TaskFinished {
                task_id,
                status: TaskStatus::Skipped,
                branch_name: None,
            });
        }
    }

    async fn summarize(&self) -> RunSummary {
        let list = self.task_list.read().await;
        let summary = RunSummary {
            completed: list.count_status(TaskStatus::Completed),
            failed: list.count_status(TaskStatus::Failed),
            skipped: list.count_status(TaskStatus::Skipped),
            branches: self.sessions.lock().await.get_all_branches(),
        };

        self.notifier.notify(Event::RunSummary {
            completed: summary.completed,
            failed: summary.failed,
            skipped: summary.skipped,
            branches: summary.branches.clone(),
        });
        summary
    }

    /// Close every pooled connection, tolerating individual failures.
    async fn cleanup(&mut self) {
        for browser in &self.browsers {
            if let Err(e) = browser.close().await {
                clog_warn!("error closing browser: {}", e);
            }
        }
        clog!("Cleanup complete");
    }

    /// Final task states, for reporting after `run` returns.
    pub async fn task_states(&self) -> Vec<(String, TaskStatus)> {
        let list = self.task_list.read().await;
        list.tasks()
            .iter()
            .map(|t| (t.id.clone(), t.status))
            .collect()
    }

    /// Clone of every task with its full runtime state.
    pub async fn tasks_snapshot(&self) -> Vec<crate::core::Task> {
        let list = self.task_list.read().await;
        list.tasks().to_vec()
    }
}
