//! Task data model for the execution DAG.
//!
//! Tasks are the atomic units of work submitted to the coding assistant.
//! Each task tracks its prompt, dependencies, retry policy, and runtime
//! state (status, timestamps, session and branch produced).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Task execution status.
///
/// Transitions are monotonic along pending -> running -> terminal.
/// Retries loop inside `Running`; they are not a visible state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task created but not yet started.
    Pending,
    /// Task is currently being driven through the browser.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed after exhausting its retry policy.
    Failed,
    /// Task was skipped because its dependencies never completed.
    Skipped,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Task priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

/// PR creation strategy, mapped to a completion-poll budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrStrategy {
    /// 30 minutes.
    Aggressive,
    /// 60 minutes.
    Normal,
    /// 120 minutes.
    Patient,
    /// No automatic timeout; bounded only by run cancellation.
    Manual,
}

impl Default for PrStrategy {
    fn default() -> Self {
        Self::Normal
    }
}

impl PrStrategy {
    /// Poll budget in seconds, or `None` for manual strategy.
    pub fn timeout_secs(&self) -> Option<u64> {
        match self {
            PrStrategy::Aggressive => Some(1800),
            PrStrategy::Normal => Some(3600),
            PrStrategy::Patient => Some(7200),
            PrStrategy::Manual => None,
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay: f64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> f64 {
    5.0
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay() -> f64 {
    300.0
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            backoff_factor: default_backoff_factor(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// Validate field ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 || self.max_attempts > 10 {
            return Err(Error::Validation(format!(
                "retry_policy.max_attempts must be between 1 and 10, got {}",
                self.max_attempts
            )));
        }
        if self.backoff_factor < 1.0 || self.backoff_factor > 5.0 {
            return Err(Error::Validation(format!(
                "retry_policy.backoff_factor must be between 1.0 and 5.0, got {}",
                self.backoff_factor
            )));
        }
        if self.initial_delay < 1.0 {
            return Err(Error::Validation(format!(
                "retry_policy.initial_delay must be at least 1.0, got {}",
                self.initial_delay
            )));
        }
        if self.max_delay < 10.0 {
            return Err(Error::Validation(format!(
                "retry_policy.max_delay must be at least 10.0, got {}",
                self.max_delay
            )));
        }
        if !(0.0..=0.5).contains(&self.jitter) {
            return Err(Error::Validation(format!(
                "retry_policy.jitter must be between 0.0 and 0.5, got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

/// Check a task id: 1-50 ASCII alphanumerics, hyphens, or underscores.
pub fn is_valid_task_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 50
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// A single task in the execution DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier (alphanumeric, hyphens, underscores).
    pub id: String,
    /// Short display name.
    pub name: String,
    /// Full prompt submitted to the assistant.
    pub prompt: String,
    /// Description of what the task should produce.
    pub expected_deliverable: String,
    /// Task priority level.
    #[serde(default)]
    pub priority: Priority,
    /// IDs of tasks that must complete before this one may start.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Target repository in owner/repo format.
    #[serde(default)]
    pub repository: Option<String>,
    /// Retry configuration for browser attempts.
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// PR creation strategy controlling the total completion-wait budget.
    #[serde(default)]
    pub pr_strategy: PrStrategy,
    /// Per-attempt completion-poll timeout override, in seconds.
    #[serde(default)]
    pub completion_timeout_secs: Option<u64>,

    // Runtime state
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

impl Task {
    /// Create a new pending task with default policies.
    pub fn new(id: &str, name: &str, prompt: &str, expected_deliverable: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            prompt: prompt.to_string(),
            expected_deliverable: expected_deliverable.to_string(),
            priority: Priority::default(),
            dependencies: Vec::new(),
            repository: None,
            retry_policy: RetryPolicy::default(),
            pr_strategy: PrStrategy::default(),
            completion_timeout_secs: None,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            session_id: None,
            branch_name: None,
            error_message: None,
            retry_count: 0,
        }
    }

    /// Validate identity, dependency list, and policy ranges.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_task_id(&self.id) {
            return Err(Error::Validation(format!(
                "task id must contain only alphanumeric characters, hyphens, and underscores: {:?}",
                self.id
            )));
        }
        if self.name.is_empty() {
            return Err(Error::Validation(format!("task {} has an empty name", self.id)));
        }
        if self.prompt.is_empty() {
            return Err(Error::Validation(format!("task {} has an empty prompt", self.id)));
        }
        let mut seen = std::collections::HashSet::new();
        for dep in &self.dependencies {
            if !seen.insert(dep.as_str()) {
                return Err(Error::Validation(format!(
                    "task {} lists dependency {} more than once",
                    self.id, dep
                )));
            }
        }
        self.retry_policy.validate()?;
        Ok(())
    }

    /// Name truncated for display.
    pub fn display_name(&self) -> String {
        if self.name.len() <= 20 {
            self.name.clone()
        } else {
            format!("{}...", &self.name[..17])
        }
    }

    /// Mark the task as started.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the task as completed, recording session and branch if known.
    pub fn complete(&mut self, session_id: Option<String>, branch_name: Option<String>) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        if session_id.is_some() {
            self.session_id = session_id;
        }
        if branch_name.is_some() {
            self.branch_name = branch_name;
        }
    }

    /// Mark the task as failed with an error message.
    pub fn fail(&mut self, error: &str) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error.to_string());
    }

    /// Mark the task as skipped.
    pub fn skip(&mut self) {
        self.status = TaskStatus::Skipped;
        self.completed_at = Some(Utc::now());
    }

    /// Increment the retry counter.
    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    /// Whether another attempt is allowed under the retry policy.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.retry_policy.max_attempts
    }

    /// Check if the task is in a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Total completion-wait budget across attempts, from the PR
    /// strategy. `None` (manual) leaves the task bounded only by its
    /// retry policy and run cancellation.
    pub fn wait_budget_secs(&self) -> Option<u64> {
        self.pr_strategy.timeout_secs()
    }
}
