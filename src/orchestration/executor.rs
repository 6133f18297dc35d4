//! Single-task execution.
//!
//! Drives one task through one browser attempt:
//! tab creation -> navigation -> repository selection (best-effort) ->
//! prompt submission -> session-id extraction -> completion polling ->
//! branch extraction -> session recording.
//!
//! Failures at or before prompt submission are attempt failures and
//! eligible for retry. Expiry of the completion poll is *indeterminate*:
//! the remote session may still be running, so the attempt neither
//! succeeds nor hard-fails — the caller's retry policy decides. Tabs are
//! deliberately left open for inspection; tab growth over a run is an
//! accepted characteristic, not a leak to fix here.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::browser::SharedBrowser;
use crate::core::{Priority, Task};
use crate::detect::{extract_branch_name, CompletionDetector};
use crate::error::Result;
use crate::notify::{Event, Notifier};
use crate::session::SessionManager;
use crate::{clog, clog_debug, clog_warn};

/// Executor settings shared by all tasks in a run.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Assistant base URL each task tab opens.
    pub base_url: String,
    /// Path marker preceding the session id in session URLs.
    pub session_path_marker: String,
    /// Interval between completion polls.
    pub poll_interval: Duration,
    /// Per-attempt completion-poll timeout when the task has no override.
    pub default_poll_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://claude.ai/code".to_string(),
            session_path_marker: "/code/".to_string(),
            poll_interval: Duration::from_secs(10),
            default_poll_timeout: Duration::from_secs(600),
        }
    }
}

/// Outcome of one browser attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Completion was detected; session and branch were recorded.
    Completed {
        session_id: String,
        branch_name: String,
        url: String,
        tab_index: usize,
    },
    /// The poll budget expired without a completion signal. The remote
    /// session may still be running.
    Indeterminate {
        session_id: Option<String>,
        tab_index: usize,
        waited: Duration,
    },
}

/// Extract the session id from a session URL.
///
/// Takes the path segment after the session path marker and strips any
/// query or fragment. An empty segment yields no id.
pub fn extract_session_id(url: &str, marker: &str) -> Option<String> {
    let (_, after) = url.split_once(marker)?;
    let id = after
        .split(['?', '#'])
        .next()
        .unwrap_or("")
        .trim_end_matches('/');
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Assemble the full prompt submitted for a task.
pub fn build_prompt(task: &Task) -> String {
    let mut parts = vec![
        format!("[Task ID: {}]", task.id),
        task.prompt.clone(),
        format!("Expected Deliverable: {}", task.expected_deliverable),
    ];
    if task.priority == Priority::High {
        parts.push("Priority: HIGH - Please prioritize this task.".to_string());
    }
    parts.join("\n\n")
}

/// Drives single task attempts against one shared browser connection.
pub struct TaskExecutor {
    browser: SharedBrowser,
    detector: CompletionDetector,
    sessions: Arc<Mutex<SessionManager>>,
    notifier: Arc<dyn Notifier>,
    config: ExecutorConfig,
}

impl TaskExecutor {
    pub fn new(
        browser: SharedBrowser,
        detector: CompletionDetector,
        sessions: Arc<Mutex<SessionManager>>,
        notifier: Arc<dyn Notifier>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            browser,
            detector,
            sessions,
            notifier,
            config,
        }
    }

    /// Run one attempt for the task.
    ///
    /// # Errors
    ///
    /// Propagates failures up to and including prompt submission; these
    /// are retryable attempt failures. After submission, problems degrade
    /// to an indeterminate outcome instead of an error.
    pub async fn run_attempt(&self, task: &Task) -> Result<AttemptOutcome> {
        clog!("Executing task {} (attempt {})", task.id, task.retry_count);

        // One fresh tab per attempt, opened directly at the assistant
        let tab = self.browser.create_tab(Some(&self.config.base_url)).await?;

        self.select_repository(task, tab).await;

        // Prompt submission failures propagate: nothing was started remotely
        self.browser
            .fill_on(tab, "Message input textbox", &build_prompt(task))
            .await?;
        self.browser.click_on(tab, "Submit button").await?;

        let url = self.browser.url_on(tab).await.unwrap_or_default();
        let session_id = extract_session_id(&url, &self.config.session_path_marker);
        clog_debug!("task {} session url: {} (id: {:?})", task.id, url, session_id);

        self.dismiss_notification_dialog(tab).await;

        let timeout = Duration::from_secs(
            task.completion_timeout_secs
                .unwrap_or(self.config.default_poll_timeout.as_secs()),
        );
        let detected = self.poll_completion(task, tab, timeout).await;

        if !detected {
            self.notifier.notify(Event::TaskIndeterminate {
                task_id: task.id.clone(),
                waited_secs: timeout.as_secs(),
            });
            // The submission went out, so the session is still recorded
            if let Some(id) = &session_id {
                let final_url = self.browser.url_on(tab).await.ok();
                self.sessions
                    .lock()
                    .await
                    .add_session(id, &task.id, None, final_url);
            }
            return Ok(AttemptOutcome::Indeterminate {
                session_id,
                tab_index: tab,
                waited: timeout,
            });
        }

        // Branch extraction is best-effort with a deterministic fallback
        let branch_name = match self.browser.text_on(tab, "body").await {
            Ok(text) => extract_branch_name(&text)
                .unwrap_or_else(|| format!("claude/{}", task.id.to_lowercase())),
            Err(e) => {
                clog_debug!("could not read page text for branch: {}", e);
                format!("claude/{}", task.id.to_lowercase())
            }
        };

        let final_url = self.browser.url_on(tab).await.unwrap_or(url);
        let session_id = session_id.unwrap_or_else(|| {
            format!("session_{}_{}", task.id, &uuid::Uuid::new_v4().to_string()[..8])
        });

        self.sessions.lock().await.add_session(
            &session_id,
            &task.id,
            Some(branch_name.clone()),
            Some(final_url.clone()),
        );

        clog!("Task {} completed on branch {}", task.id, branch_name);
        Ok(AttemptOutcome::Completed {
            session_id,
            branch_name,
            url: final_url,
            tab_index: tab,
        })
    }

    /// Best-effort repository selection.
    ///
    /// The default-selected repository may already be correct, so a
    /// failure here logs a warning and proceeds.
    async fn select_repository(&self, task: &Task, tab: usize) {
        let Some(repository) = &task.repository else {
            return;
        };

        let result = async {
            self.browser
                .click_on(tab, "Select repository button")
                .await?;
            let description = match repository.split_once('/') {
                Some((owner, repo)) => format!("{} {} repository option", repo, owner),
                None => format!("{} repository option", repository),
            };
            self.browser.click_on(tab, &description).await
        }
        .await;

        if let Err(e) = result {
            clog_warn!(
                "could not select repository {} for task {}: {}",
                repository,
                task.id,
                e
            );
        }
    }

    /// Dismiss the notification permission dialog if it appeared.
    async fn dismiss_notification_dialog(&self, tab: usize) {
        if let Err(e) = self.browser.click_on(tab, "Not Now button").await {
            clog_debug!("no notification dialog to dismiss: {}", e);
        }
    }

    /// Poll the task's tab until completion is detected or the budget
    /// expires. Snapshot failures are tolerated; the page may be mid-load.
    async fn poll_completion(&self, task: &Task, tab: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.browser.snapshot_on(tab).await {
                Ok(snapshot) => {
                    if self.detector.is_complete(&snapshot) {
                        clog_debug!("task {} completion detected", task.id);
                        return true;
                    }
                }
                Err(e) => {
                    clog_debug!("completion check failed for task {}: {}", task.id, e);
                }
            }

            if tokio::time::Instant::now() + self.config.poll_interval > deadline {
                clog_warn!(
                    "task {} completion check timed out after {:?}; session may still be running",
                    task.id,
                    timeout
                );
                return false;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
